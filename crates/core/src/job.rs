//! Job records as reported by the `/api/jobs` endpoint, plus the job
//! lifecycle state machine.
//!
//! ```text
//! pending -> running -> { completed | failed | canceled }
//! ```
//!
//! The server owns every transition; the client only observes them
//! through polled snapshots.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, ProjectId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    /// String representation for display and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// `completed`, `failed` and `canceled` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// A job that is queued or executing. Drives fast polling.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Position in the lifecycle; terminal states share the last rank.
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed | Self::Canceled => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the state machine.
    ///
    /// Staying in the same status is allowed. A job may skip `running`
    /// (e.g. canceled while still queued) but never move backwards or
    /// leave a terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// What a job does. Anything the client does not know about is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A single job row.
///
/// Equality is structural over every field, which is what the change
/// detector relies on: two polls of an unchanged job compare equal even
/// though they were decoded into distinct values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default)]
    pub message: String,
    /// Percentage in `0..=100`; only meaningful while `running`.
    #[serde(default)]
    pub progress: f64,
    /// Free-form request payload, e.g. `{"model_name": "padim"}`.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
}

impl Job {
    /// The model a training job was asked to produce, if the payload
    /// carries one.
    pub fn model_name(&self) -> Option<&str> {
        self.payload.get("model_name").and_then(|v| v.as_str())
    }

    /// Progress clamped to `0..=100`, or `None` unless the job is running.
    pub fn running_progress(&self) -> Option<f64> {
        (self.status == JobStatus::Running).then(|| self.progress.clamp(0.0, 100.0))
    }

    /// Wall-clock duration in whole seconds, when both timestamps are known.
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

/// Envelope returned by `GET /api/jobs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_active_are_disjoint() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Canceled,
        ] {
            assert_ne!(status.is_terminal(), status.is_active(), "{status}");
        }
    }

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Canceled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn backward_and_terminal_exits_are_rejected() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Canceled.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn deserializes_server_job() {
        let json = r#"{
            "id": "j1",
            "project_id": "p1",
            "type": "training",
            "status": "running",
            "message": "Epoch 3",
            "progress": 42.5,
            "payload": {"model_name": "padim"},
            "stage": "fit",
            "start_time": "2025-10-01T11:07:00Z",
            "end_time": null
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.kind, JobKind::Training);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.model_name(), Some("padim"));
        assert_eq!(job.running_progress(), Some(42.5));
        assert!(job.duration_secs().is_none());
    }

    #[test]
    fn unknown_kind_maps_to_other_and_optionals_default() {
        let json = r#"{"id":"j2","project_id":"p1","type":"export","status":"pending"}"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.kind, JobKind::Other);
        assert!(job.message.is_empty());
        assert!(job.running_progress().is_none());
        assert!(job.model_name().is_none());
    }

    #[test]
    fn duration_from_timestamps() {
        let json = r#"{"id":"j3","project_id":"p1","type":"training","status":"completed",
            "start_time":"2025-10-01T11:00:00Z","end_time":"2025-10-01T11:01:30Z"}"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.duration_secs(), Some(90));
    }
}
