//! Adaptive refetch policy for the job list.
//!
//! Poll fast while anything in scope is queued or running, otherwise stop
//! polling until someone explicitly asks for a refresh.

use std::time::Duration;

use crate::snapshot::JobSnapshot;

/// Refetch interval used while a job in scope is pending or running.
pub const ACTIVE_REFETCH_INTERVAL_MS: u64 = 1_000;

/// When (if ever) the job list should be fetched again automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPolicy {
    /// No automatic refetch.
    Disabled,
    /// Refetch after this many milliseconds.
    IntervalMs(u64),
}

impl PollPolicy {
    /// Policy for an already scoped snapshot, using the default interval.
    pub fn for_snapshot(snapshot: &JobSnapshot) -> Self {
        Self::with_interval(snapshot, ACTIVE_REFETCH_INTERVAL_MS)
    }

    /// Policy for an already scoped snapshot with a custom active interval.
    pub fn with_interval(snapshot: &JobSnapshot, active_interval_ms: u64) -> Self {
        if snapshot.has_active_jobs() {
            Self::IntervalMs(active_interval_ms)
        } else {
            Self::Disabled
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::IntervalMs(ms) => Some(Duration::from_millis(*ms)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::IntervalMs(_))
    }
}

impl std::fmt::Display for PollPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::IntervalMs(ms) => write!(f, "every {ms}ms"),
        }
    }
}
