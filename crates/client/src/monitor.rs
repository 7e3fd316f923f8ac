//! Job monitor for one project.
//!
//! [`JobMonitor`] ties a [`JobSnapshotFetcher`] to a [`ChangeDetector`]:
//! every snapshot the fetcher publishes is diffed against the previous
//! one, finished training runs invalidate the [`ModelsCache`], and the
//! resulting [`JobEvent`]s are broadcast to subscribers.
//!
//! The fetcher task is the only writer of the snapshot and the monitor
//! task the only writer of the detector state; everything else reads.

use std::sync::Arc;
use std::time::Duration;

use inspect_core::diff::ChangeDetector;
use inspect_core::error::CoreError;
use inspect_core::job::Job;
use inspect_core::poll_policy::PollPolicy;
use inspect_core::snapshot::{JobScope, JobSnapshot};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ApiError;
use crate::cache::ModelsCache;
use crate::events::JobEvent;
use crate::fetcher::{FetchState, FetcherConfig, JobSnapshotFetcher};
use crate::source::{JobControl, JobSource};

/// Broadcast channel capacity for job events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Watches the jobs of one scope and keeps dependent caches fresh.
///
/// Created via [`JobMonitor::start`]; the returned `Arc` can be cloned into
/// every consumer.
pub struct JobMonitor {
    scope: JobScope,
    control: Arc<dyn JobControl>,
    fetcher: JobSnapshotFetcher,
    models: Arc<ModelsCache>,
    event_tx: broadcast::Sender<JobEvent>,
    /// Master cancellation token; the fetcher runs on a child of it.
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobMonitor {
    /// Start polling `backend` for `scope` and detecting changes.
    ///
    /// Subscribe right after this returns to see the baseline snapshot.
    pub fn start<B: JobControl>(
        backend: Arc<B>,
        models: Arc<ModelsCache>,
        scope: JobScope,
        config: FetcherConfig,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let source: Arc<dyn JobSource> = backend.clone();
        let fetcher = JobSnapshotFetcher::spawn(source, scope.clone(), config, cancel.child_token());

        let state_rx = fetcher.subscribe();
        let task_scope = scope.clone();
        let task_models = Arc::clone(&models);
        let task_tx = event_tx.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_detector(state_rx, &task_scope, &task_models, &task_tx, &task_cancel).await;
            tracing::info!(project_id = %task_scope.project_id, "Job monitor exited");
        });

        Arc::new(Self {
            scope,
            control: backend,
            fetcher,
            models,
            event_tx,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Subscribe to job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Follow the raw fetch state (snapshot, policy, last error).
    pub fn watch_state(&self) -> watch::Receiver<FetchState> {
        self.fetcher.subscribe()
    }

    pub fn scope(&self) -> &JobScope {
        &self.scope
    }

    pub fn models(&self) -> &Arc<ModelsCache> {
        &self.models
    }

    pub fn snapshot(&self) -> Option<JobSnapshot> {
        self.fetcher.snapshot()
    }

    pub fn policy(&self) -> PollPolicy {
        self.fetcher.policy()
    }

    /// The job the status panel should show: the first pending or running
    /// job in scope.
    pub fn current_job(&self) -> Option<Job> {
        self.snapshot()
            .and_then(|snapshot| snapshot.current_job().cloned())
    }

    /// Fetch the job list now.
    pub fn refresh(&self) {
        self.fetcher.refresh();
    }

    /// Queue a training run in this project and resume polling.
    pub async fn start_training(&self, model_name: &str) -> Result<Job, MonitorError> {
        let job = self
            .control
            .start_training(&self.scope.project_id, model_name)
            .await?;

        tracing::info!(
            project_id = %self.scope.project_id,
            job_id = %job.id,
            model_name,
            "Training job queued",
        );

        self.fetcher.refresh();
        Ok(job)
    }

    /// Cancel a pending or running job of this scope.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), MonitorError> {
        let snapshot = self.snapshot().unwrap_or_default();
        let job = snapshot.require(job_id)?;
        if job.status.is_terminal() {
            return Err(CoreError::Validation(format!(
                "Job {job_id} is already {}",
                job.status
            ))
            .into());
        }

        self.control.cancel_job(&job.id).await?;
        tracing::info!(project_id = %self.scope.project_id, job_id, "Job cancel requested");

        self.fetcher.refresh();
        Ok(())
    }

    /// Stop polling and change detection.
    ///
    /// Cancels the master token, then waits up to 5 seconds for each task.
    pub async fn shutdown(&self) {
        tracing::info!(project_id = %self.scope.project_id, "Shutting down job monitor");
        self.cancel.cancel();
        self.fetcher.shutdown().await;
        if let Some(task) = self.task.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}

/// Diff every published snapshot and fan out the result.
///
/// Runs until `cancel` fires or the fetcher goes away.
async fn run_detector(
    mut state_rx: watch::Receiver<FetchState>,
    scope: &JobScope,
    models: &ModelsCache,
    event_tx: &broadcast::Sender<JobEvent>,
    cancel: &CancellationToken,
) {
    let mut detector = ChangeDetector::new();
    let mut reported_error: Option<String> = None;

    loop {
        let state = state_rx.borrow_and_update().clone();

        if state.last_error != reported_error {
            if let Some(error) = &state.last_error {
                let _ = event_tx.send(JobEvent::FetchFailed {
                    project_id: scope.project_id.clone(),
                    error: error.clone(),
                    stale: state.snapshot.is_some(),
                });
            }
            reported_error = state.last_error.clone();
        }

        if let Some(snapshot) = &state.snapshot {
            if let Some(change) = detector.observe(snapshot) {
                for transition in &change.transitions {
                    if transition.is_regression() {
                        tracing::warn!(
                            job_id = %transition.job_id,
                            from = ?transition.from,
                            to = %transition.to,
                            "Job moved backwards in its lifecycle",
                        );
                    } else {
                        tracing::debug!(
                            job_id = %transition.job_id,
                            from = ?transition.from,
                            to = %transition.to,
                            "Job status changed",
                        );
                    }
                }

                for project_id in &change.invalidate_models {
                    models.invalidate(project_id).await;
                }

                for event in
                    JobEvent::from_change(&scope.project_id, &change, snapshot, state.policy.is_enabled())
                {
                    let _ = event_tx.send(event);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Errors from monitor actions.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The backend rejected or failed the request.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The job is unknown or in the wrong state.
    #[error(transparent)]
    Core(#[from] CoreError),
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use inspect_core::job::JobStatus;
    use inspect_core::models::TrainedModel;
    use inspect_core::types::JobId;

    use super::*;
    use crate::fetcher::tests::{job, ScriptedJobs};
    use crate::source::ModelSource;

    struct FakeBackend {
        jobs: Arc<ScriptedJobs>,
        started: std::sync::Mutex<Vec<String>>,
        canceled: std::sync::Mutex<Vec<JobId>>,
    }

    impl FakeBackend {
        fn new(script: Vec<Option<Vec<Job>>>) -> Arc<Self> {
            Arc::new(Self {
                jobs: ScriptedJobs::new(script),
                started: Default::default(),
                canceled: Default::default(),
            })
        }
    }

    #[async_trait]
    impl JobSource for FakeBackend {
        async fn list_jobs(&self) -> Result<Vec<Job>, ApiError> {
            self.jobs.list_jobs().await
        }
    }

    #[async_trait]
    impl JobControl for FakeBackend {
        async fn start_training(&self, project_id: &str, model_name: &str) -> Result<Job, ApiError> {
            self.started.lock().unwrap().push(model_name.to_string());
            Ok(job("new", project_id, JobStatus::Pending))
        }

        async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError> {
            self.canceled.lock().unwrap().push(job_id.clone());
            Ok(())
        }
    }

    struct StaticModels {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelSource for StaticModels {
        async fn list_models(&self, _project_id: &str) -> Result<Vec<TrainedModel>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn models() -> Arc<ModelsCache> {
        Arc::new(ModelsCache::new(Arc::new(StaticModels {
            calls: AtomicUsize::new(0),
        })))
    }

    /// Everything broadcast until the channel stays quiet for 10 seconds
    /// of (paused) time.
    async fn collect(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            events.push(event);
        }
        events
    }

    fn invalidations(events: &[JobEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, JobEvent::ModelsInvalidated { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn completion_invalidates_models_once() {
        let backend = FakeBackend::new(vec![
            Some(vec![job("a", "p1", JobStatus::Running)]),
            Some(vec![job("a", "p1", JobStatus::Running)]),
            Some(vec![job("a", "p1", JobStatus::Completed)]),
        ]);
        let cache = models();
        cache.get("p1").await.unwrap();

        let monitor = JobMonitor::start(
            backend,
            Arc::clone(&cache),
            JobScope::project("p1"),
            FetcherConfig::default(),
        );
        let mut rx = monitor.subscribe();
        let events = collect(&mut rx).await;

        assert_eq!(invalidations(&events), 1);
        assert!(events.contains(&JobEvent::StatusChanged {
            job_id: "a".into(),
            project_id: "p1".into(),
            from: JobStatus::Running,
            to: JobStatus::Completed,
        }));
        assert!(cache.cached("p1").await.is_none());
        assert_eq!(monitor.policy(), PollPolicy::Disabled);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_snapshots_do_not_invalidate() {
        let backend = FakeBackend::new(vec![Some(vec![job("a", "p1", JobStatus::Running)])]);
        let monitor = JobMonitor::start(
            backend.clone(),
            models(),
            JobScope::project("p1"),
            FetcherConfig::default(),
        );
        let mut rx = monitor.subscribe();
        let events = collect(&mut rx).await;

        assert_eq!(invalidations(&events), 0);
        let snapshots = events
            .iter()
            .filter(|e| matches!(e, JobEvent::SnapshotChanged { .. }))
            .count();
        assert_eq!(snapshots, 1);
        // Still polling the running job the whole time.
        assert!(backend.jobs.calls() > 5);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_is_reported_once() {
        let backend = FakeBackend::new(vec![
            Some(vec![job("a", "p1", JobStatus::Running)]),
            None,
        ]);
        let monitor = JobMonitor::start(
            backend,
            models(),
            JobScope::project("p1"),
            FetcherConfig::default(),
        );
        let mut rx = monitor.subscribe();
        let events = collect(&mut rx).await;

        let failures: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, JobEvent::FetchFailed { .. }))
            .collect();
        assert_eq!(failures.len(), 1);
        assert_matches!(failures[0], JobEvent::FetchFailed { stale: true, .. });
        assert!(monitor.snapshot().is_some());
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_requires_active_job() {
        let backend = FakeBackend::new(vec![Some(vec![
            job("a", "p1", JobStatus::Running),
            job("b", "p1", JobStatus::Failed),
        ])]);
        let monitor = JobMonitor::start(
            backend.clone(),
            models(),
            JobScope::project("p1"),
            FetcherConfig::default(),
        );
        monitor
            .watch_state()
            .wait_for(|s| s.snapshot.is_some())
            .await
            .unwrap();

        assert_eq!(monitor.current_job().map(|j| j.id), Some("a".to_string()));
        monitor.cancel_job("a").await.unwrap();
        assert_matches!(
            monitor.cancel_job("b").await,
            Err(MonitorError::Core(CoreError::Validation(_)))
        );
        assert_matches!(
            monitor.cancel_job("zzz").await,
            Err(MonitorError::Core(CoreError::NotFound { .. }))
        );
        assert_eq!(*backend.canceled.lock().unwrap(), vec!["a".to_string()]);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_training_refreshes() {
        let backend = FakeBackend::new(vec![
            Some(vec![]),
            Some(vec![job("new", "p1", JobStatus::Pending)]),
        ]);
        let monitor = JobMonitor::start(
            backend.clone(),
            models(),
            JobScope::project("p1"),
            FetcherConfig::default(),
        );
        let mut state = monitor.watch_state();
        state.wait_for(|s| s.snapshot.is_some()).await.unwrap();
        assert_eq!(monitor.policy(), PollPolicy::Disabled);

        let job = monitor.start_training("padim").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(*backend.started.lock().unwrap(), vec!["padim".to_string()]);

        state
            .wait_for(|s| s.policy == PollPolicy::IntervalMs(1000))
            .await
            .unwrap();
        monitor.shutdown().await;
    }
}
