//! Adaptive job-list polling for one project scope.
//!
//! [`JobSnapshotFetcher::spawn`] starts a background task that fetches
//! `GET /api/jobs`, narrows it to the scope, and publishes the result on a
//! [`watch`] channel. Readers always see the latest state, never an
//! intermediate one.
//!
//! The next fetch is scheduled by [`PollPolicy`]: every second while a
//! scoped job is pending or running, otherwise only on
//! [`refresh`](JobSnapshotFetcher::refresh). A failed fetch keeps the
//! previous snapshot. Until the first snapshot arrives, failures are
//! retried with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use inspect_core::poll_policy::{PollPolicy, ACTIVE_REFETCH_INTERVAL_MS};
use inspect_core::snapshot::{JobScope, JobSnapshot};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ApiError;
use crate::backoff::{Backoff, BackoffConfig};
use crate::source::JobSource;

/// What the fetcher currently knows.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState {
    /// Latest successfully fetched snapshot, `None` until the first one.
    pub snapshot: Option<JobSnapshot>,
    /// Schedule derived from `snapshot`.
    pub policy: PollPolicy,
    /// Message of the most recent failed fetch; cleared on success.
    pub last_error: Option<String>,
}

impl FetchState {
    /// True when a snapshot is shown but the last fetch failed.
    pub fn is_stale(&self) -> bool {
        self.snapshot.is_some() && self.last_error.is_some()
    }
}

impl Default for FetchState {
    fn default() -> Self {
        Self {
            snapshot: None,
            policy: PollPolicy::Disabled,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Refetch interval while something in scope is active.
    pub active_interval_ms: u64,
    /// Retry schedule before the first snapshot.
    pub backoff: BackoffConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: ACTIVE_REFETCH_INTERVAL_MS,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Handle to a running polling task.
pub struct JobSnapshotFetcher {
    scope: JobScope,
    state_rx: watch::Receiver<FetchState>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobSnapshotFetcher {
    /// Start polling `source` for the jobs in `scope`.
    ///
    /// The task stops when `cancel` fires or on [`shutdown`](Self::shutdown).
    pub fn spawn(
        source: Arc<dyn JobSource>,
        scope: JobScope,
        config: FetcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(FetchState::default());
        let refresh = Arc::new(Notify::new());

        let task_scope = scope.clone();
        let task_refresh = Arc::clone(&refresh);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            tracing::info!(project_id = %task_scope.project_id, "Starting job fetcher");
            run_poll_loop(
                source.as_ref(),
                &task_scope,
                &config,
                &state_tx,
                &task_refresh,
                &task_cancel,
            )
            .await;
            tracing::info!(project_id = %task_scope.project_id, "Job fetcher exited");
        });

        Self {
            scope,
            state_rx,
            refresh,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn scope(&self) -> &JobScope {
        &self.scope
    }

    /// A receiver that is woken whenever the published state changes.
    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.state_rx.clone()
    }

    /// Current state (snapshot, policy, last error).
    pub fn state(&self) -> FetchState {
        self.state_rx.borrow().clone()
    }

    /// Latest snapshot, if any fetch has succeeded yet.
    pub fn snapshot(&self) -> Option<JobSnapshot> {
        self.state_rx.borrow().snapshot.clone()
    }

    pub fn policy(&self) -> PollPolicy {
        self.state_rx.borrow().policy
    }

    /// Fetch now, regardless of the policy.
    ///
    /// A request made while a fetch is in flight is remembered and runs
    /// right after it.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Stop polling and wait for the task to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}

/// Fetch every job once and narrow the list to `scope`.
pub async fn poll_once(source: &dyn JobSource, scope: &JobScope) -> Result<JobSnapshot, ApiError> {
    let jobs = source.list_jobs().await?;
    Ok(JobSnapshot::new(jobs).scoped(scope))
}

async fn run_poll_loop(
    source: &dyn JobSource,
    scope: &JobScope,
    config: &FetcherConfig,
    state_tx: &watch::Sender<FetchState>,
    refresh: &Notify,
    cancel: &CancellationToken,
) {
    let mut backoff = Backoff::new(config.backoff.clone());

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = poll_once(source, scope) => fetched,
        };

        let wait = match fetched {
            Ok(snapshot) => {
                backoff.reset();
                let policy = PollPolicy::with_interval(&snapshot, config.active_interval_ms);
                let next = FetchState {
                    snapshot: Some(snapshot),
                    policy,
                    last_error: None,
                };
                let changed = state_tx.send_if_modified(|state| {
                    if *state == next {
                        return false;
                    }
                    *state = next;
                    true
                });
                tracing::debug!(
                    project_id = %scope.project_id,
                    %policy,
                    changed,
                    "Fetched job snapshot",
                );
                policy.as_duration()
            }
            Err(e) => {
                let message = e.to_string();
                let has_snapshot = state_tx.borrow().snapshot.is_some();
                state_tx.send_modify(|state| state.last_error = Some(message));

                if has_snapshot {
                    let policy = state_tx.borrow().policy;
                    tracing::warn!(
                        project_id = %scope.project_id,
                        error = %e,
                        %policy,
                        "Job fetch failed, keeping previous snapshot",
                    );
                    policy.as_duration()
                } else {
                    let delay = backoff.fail();
                    tracing::warn!(
                        project_id = %scope.project_id,
                        error = %e,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Initial job fetch failed, retrying",
                    );
                    Some(delay)
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = refresh.notified() => {
                tracing::debug!(project_id = %scope.project_id, "Job refresh requested");
            }
            _ = sleep_for(wait) => {}
        }
    }
}

/// Sleep for `wait`, or forever when polling is disabled.
async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending::<()>().await,
    }
}
