//! Follow the progress and training log of one job.

use futures::StreamExt;
use inspect_client::api::InspectApi;
use inspect_client::messages::LogLine;
use inspect_client::streamer::{subscribe_logs, subscribe_progress, JobStream, LatestProgress};
use inspect_core::job::Job;
use inspect_core::progress::{resolve_progress, ProgressRecord};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running follower for one job. Dropping it does not stop it; call
/// [`stop`](Self::stop).
pub struct Follower {
    job_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Follower {
    /// Subscribe to both streams of `job` and log what arrives.
    pub fn start(api: &InspectApi, job: Job, buffer: usize) -> Self {
        let cancel = CancellationToken::new();
        let logs = subscribe_logs(api, &job.id, buffer);
        let progress = subscribe_progress(api, &job.id, buffer);

        let job_id = job.id.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            follow(job, logs, progress, &task_cancel).await;
        });

        Self {
            job_id,
            cancel,
            task,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Close both connections and wait for the task.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn follow(
    job: Job,
    mut logs: JobStream<LogLine>,
    mut progress: JobStream<ProgressRecord>,
    cancel: &CancellationToken,
) {
    let mut latest = LatestProgress::default();
    let mut logs_open = true;
    let mut progress_open = true;

    while logs_open || progress_open {
        tokio::select! {
            _ = cancel.cancelled() => {
                logs.close();
                progress.close();
                break;
            }
            item = logs.next(), if logs_open => match item {
                Some(Ok(LogLine(line))) => tracing::info!(job_id = %job.id, "{line}"),
                Some(Err(e)) => tracing::warn!(job_id = %job.id, error = %e, "Log stream failed"),
                None => logs_open = false,
            },
            item = progress.next(), if progress_open => match item {
                Some(Ok(record)) => {
                    latest.apply(record);
                    if let Some(view) = resolve_progress(latest.get(), &job) {
                        tracing::info!(
                            job_id = %job.id,
                            progress = view.progress,
                            stage = %view.stage,
                            stage_kind = ?view.stage_kind,
                            "Training progress",
                        );
                    }
                }
                Some(Err(e)) => tracing::warn!(job_id = %job.id, error = %e, "Progress stream failed"),
                None => progress_open = false,
            },
        }
    }

    tracing::debug!(job_id = %job.id, "Stopped following job");
}
