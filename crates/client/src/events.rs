//! Events published by the job monitor and the inference session.
//!
//! Both are fanned out over [`tokio::sync::broadcast`] channels so any
//! number of panels (status line, footer, model table) can follow them.

use inspect_core::diff::{DiffStatus, SnapshotChange};
use inspect_core::job::JobStatus;
use inspect_core::snapshot::JobSnapshot;
use inspect_core::types::{JobId, ProjectId};
use serde::Serialize;

/// A change observed in the polled job list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A structurally different snapshot was published.
    SnapshotChanged {
        project_id: ProjectId,
        job_count: usize,
        /// Whether automatic polling continues after this snapshot.
        polling: bool,
    },

    /// A job appeared in the snapshot.
    JobAdded {
        job_id: JobId,
        project_id: ProjectId,
        status: JobStatus,
    },

    /// A job's status moved between two polls.
    StatusChanged {
        job_id: JobId,
        project_id: ProjectId,
        from: JobStatus,
        to: JobStatus,
    },

    /// A job is no longer listed. This is not a cancellation.
    JobRemoved { job_id: JobId, project_id: ProjectId },

    /// A training job finished; the trained-model list was dropped from
    /// the cache and must be refetched.
    ModelsInvalidated { project_id: ProjectId },

    /// A fetch failed. `stale` is true when an older snapshot is still
    /// being shown.
    FetchFailed {
        project_id: ProjectId,
        error: String,
        stale: bool,
    },
}

impl JobEvent {
    /// Expand one detector result into the events it implies, in the
    /// order a consumer should apply them. `current` is the snapshot the
    /// change was computed for.
    pub fn from_change(
        project_id: &str,
        change: &SnapshotChange,
        current: &JobSnapshot,
        polling: bool,
    ) -> Vec<JobEvent> {
        let mut events = Vec::new();

        for diff in &change.diffs {
            match diff.status {
                DiffStatus::Added => {
                    if let Some(job) = current.get(&diff.job_id) {
                        events.push(JobEvent::JobAdded {
                            job_id: job.id.clone(),
                            project_id: job.project_id.clone(),
                            status: job.status,
                        });
                    }
                }
                DiffStatus::Removed => events.push(JobEvent::JobRemoved {
                    job_id: diff.job_id.clone(),
                    project_id: diff.project_id.clone(),
                }),
                DiffStatus::Changed | DiffStatus::Unchanged => {}
            }
        }

        for transition in &change.transitions {
            if let Some(from) = transition.from {
                events.push(JobEvent::StatusChanged {
                    job_id: transition.job_id.clone(),
                    project_id: transition.project_id.clone(),
                    from,
                    to: transition.to,
                });
            }
        }

        for project_id in &change.invalidate_models {
            events.push(JobEvent::ModelsInvalidated {
                project_id: project_id.clone(),
            });
        }

        events.push(JobEvent::SnapshotChanged {
            project_id: project_id.to_string(),
            job_count: current.len(),
            polling,
        });
        events
    }
}

/// A transient, user-facing failure message (the terminal equivalent of a
/// toast).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message: String,
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use inspect_core::diff::ChangeDetector;

    use super::*;
    use crate::fetcher::tests::job;

    #[test]
    fn completion_expands_to_status_and_invalidation() {
        let mut detector = ChangeDetector::new();
        let before = JobSnapshot::new(vec![
            job("a", "p1", JobStatus::Running),
            job("old", "p1", JobStatus::Failed),
        ]);
        let after = JobSnapshot::new(vec![
            job("a", "p1", JobStatus::Completed),
            job("b", "p1", JobStatus::Pending),
        ]);
        detector.observe(&before);
        let change = detector.observe(&after).unwrap();

        let events = JobEvent::from_change("p1", &change, &after, true);
        assert_eq!(
            events,
            vec![
                JobEvent::JobAdded {
                    job_id: "b".into(),
                    project_id: "p1".into(),
                    status: JobStatus::Pending,
                },
                JobEvent::JobRemoved {
                    job_id: "old".into(),
                    project_id: "p1".into(),
                },
                JobEvent::StatusChanged {
                    job_id: "a".into(),
                    project_id: "p1".into(),
                    from: JobStatus::Running,
                    to: JobStatus::Completed,
                },
                JobEvent::ModelsInvalidated {
                    project_id: "p1".into(),
                },
                JobEvent::SnapshotChanged {
                    project_id: "p1".into(),
                    job_count: 2,
                    polling: true,
                },
            ]
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = JobEvent::ModelsInvalidated {
            project_id: "p1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "models_invalidated");
        assert_eq!(json["project_id"], "p1");
    }
}
