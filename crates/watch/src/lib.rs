//! `inspect-watch` -- terminal consumer of the inspect job stream.
//!
//! Watches the jobs of one project, follows the progress and log of the
//! job in flight, prints the model table whenever a training run
//! finishes, and can queue a training run or a one-shot inference on
//! startup.

pub mod follow;
pub mod options;

use std::sync::Arc;

use inspect_client::api::{ApiError, InspectApi};
use inspect_client::cache::ModelsCache;
use inspect_client::config::{ClientConfig, ConfigError};
use inspect_client::events::JobEvent;
use inspect_client::fetcher::FetcherConfig;
use inspect_client::monitor::{JobMonitor, MonitorError};
use inspect_client::session::{InferenceSession, InferenceState};
use inspect_core::dataset::TrainingReadiness;
use inspect_core::error::CoreError;
use inspect_core::job::{Job, JobStatus};
use inspect_core::models::build_model_rows;
use inspect_core::snapshot::JobScope;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::follow::Follower;
use crate::options::{PredictOptions, WatchOptions};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Read the client configuration and the watch options from the
/// environment.
pub fn load_config() -> Result<(ClientConfig, WatchOptions), WatchError> {
    Ok((ClientConfig::from_env()?, WatchOptions::from_env()?))
}

/// Run until `shutdown` fires.
pub async fn run(
    config: &ClientConfig,
    options: WatchOptions,
    shutdown: CancellationToken,
) -> Result<(), WatchError> {
    let api = Arc::new(InspectApi::from_config(config)?);
    let cache = Arc::new(ModelsCache::new(api.clone()));
    let monitor = JobMonitor::start(
        Arc::clone(&api),
        Arc::clone(&cache),
        JobScope::project(options.project_id.clone()),
        FetcherConfig {
            active_interval_ms: config.poll_interval_ms,
            ..Default::default()
        },
    );
    let mut events = monitor.subscribe();

    if let Some(model_name) = &options.train_model {
        start_training(&api, &monitor, model_name).await?;
    }

    if let Some(predict) = &options.predict {
        run_prediction(Arc::clone(&api), &cache, &options.project_id, predict).await?;
    }

    let mut follower: Option<Follower> = None;
    let mut models_shown = false;

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(JobEvent::SnapshotChanged { job_count, polling, .. }) => {
                tracing::debug!(job_count, polling, "Job list changed");
                if !models_shown {
                    show_models(&monitor, &cache).await;
                    models_shown = true;
                }
                follower =
                    update_follower(follower, &api, running_job(&monitor), config.stream_buffer)
                        .await;
            }
            Ok(JobEvent::JobAdded { job_id, status, .. }) => {
                tracing::info!(job_id = %job_id, %status, "Job added");
            }
            Ok(JobEvent::StatusChanged { job_id, from, to, .. }) => {
                tracing::info!(job_id = %job_id, %from, %to, "Job status changed");
            }
            Ok(JobEvent::JobRemoved { job_id, .. }) => {
                tracing::info!(job_id = %job_id, "Job no longer listed");
            }
            Ok(JobEvent::ModelsInvalidated { project_id }) => {
                tracing::info!(project_id = %project_id, "Training finished, reloading models");
                show_models(&monitor, &cache).await;
            }
            Ok(JobEvent::FetchFailed { error, stale, .. }) => {
                tracing::warn!(%error, stale, "Failed to fetch jobs");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Job event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    if let Some(follower) = follower {
        follower.stop().await;
    }
    monitor.shutdown().await;
    Ok(())
}

/// Queue a training run if the project has enough images.
async fn start_training(
    api: &InspectApi,
    monitor: &JobMonitor,
    model_name: &str,
) -> Result<(), WatchError> {
    let images = api.list_images(&monitor.scope().project_id).await?;
    match TrainingReadiness::for_image_count(images.len()) {
        TrainingReadiness::Ready => {
            let job = monitor.start_training(model_name).await?;
            tracing::info!(job_id = %job.id, model_name, "Training started");
        }
        TrainingReadiness::NeedsImages(missing) => {
            tracing::warn!(
                model_name,
                images = images.len(),
                missing,
                "Not enough images to train",
            );
        }
    }
    Ok(())
}

/// Run one inference through an [`InferenceSession`] and log the result.
async fn run_prediction(
    api: Arc<InspectApi>,
    cache: &ModelsCache,
    project_id: &str,
    predict: &PredictOptions,
) -> Result<(), WatchError> {
    let models = cache.get(project_id).await?;
    if !models.iter().any(|m| m.id == predict.model_id) {
        return Err(CoreError::NotFound {
            entity: "model",
            id: predict.model_id.clone(),
        }
        .into());
    }

    let images = api.list_images(project_id).await?;
    let media = match &predict.media_id {
        Some(media_id) => images.into_iter().find(|m| &m.id == media_id),
        None => images.into_iter().next(),
    }
    .ok_or_else(|| CoreError::NotFound {
        entity: "media",
        id: predict
            .media_id
            .clone()
            .unwrap_or_else(|| format!("any image of project {project_id}")),
    })?;

    let mut session = InferenceSession::new(api);
    let mut notifications = session.notifications();
    session.select_media(Some(media));
    session.select_device(predict.device);
    if let Some(ticket) = session.select_model(Some(predict.model_id.clone())) {
        ticket.finished().await;
    }

    match session.current() {
        InferenceState::Ready {
            model_id,
            device,
            response,
            ..
        } => tracing::info!(
            model_id = %model_id,
            %device,
            label = %response.label,
            score = response.score,
            heatmap = response.anomaly_map.is_some(),
            "Inference result",
        ),
        other => tracing::debug!(state = ?other, "No inference result"),
    }
    while let Ok(notification) = notifications.try_recv() {
        tracing::error!(message = %notification.message, "Inference failed");
    }
    Ok(())
}

/// Log the models table of the watched project.
async fn show_models(monitor: &JobMonitor, cache: &ModelsCache) {
    let project_id = &monitor.scope().project_id;
    let models = match cache.get(project_id).await {
        Ok(models) => models,
        Err(e) => {
            tracing::warn!(project_id = %project_id, error = %e, "Failed to load models");
            return;
        }
    };

    let jobs = monitor.snapshot().unwrap_or_default().jobs;
    for row in build_model_rows(&models, &jobs) {
        tracing::info!(
            id = %row.id,
            name = %row.name,
            status = ?row.status,
            started_at = ?row.started_at,
            duration_secs = ?row.duration_secs,
            selectable = row.is_selectable(),
            "Model",
        );
    }
}

fn running_job(monitor: &JobMonitor) -> Option<Job> {
    monitor
        .current_job()
        .filter(|job| job.status == JobStatus::Running)
}

/// Follow `running`, keeping the current follower if it is already on
/// that job and stopping it otherwise.
async fn update_follower(
    current: Option<Follower>,
    api: &InspectApi,
    running: Option<Job>,
    buffer: usize,
) -> Option<Follower> {
    match (current, running) {
        (Some(follower), Some(job)) if follower.job_id() == job.id => Some(follower),
        (current, running) => {
            if let Some(follower) = current {
                follower.stop().await;
            }
            running.map(|job| {
                tracing::info!(job_id = %job.id, "Following job");
                Follower::start(api, job, buffer)
            })
        }
    }
}
