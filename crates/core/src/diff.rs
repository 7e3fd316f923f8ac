//! Snapshot-to-snapshot change detection for job lists.
//!
//! [`ChangeDetector`] remembers the last snapshot it saw and, for every new
//! one, reports a per-job [`DiffStatus`], the observed status transitions,
//! and the projects whose trained-model list must be refetched because a
//! job finished.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};
use crate::snapshot::JobSnapshot;
use crate::types::{JobId, ProjectId};

/// The status of an item in a diff comparison.
///
/// - `Added`     -- present only in the incoming/new side.
/// - `Removed`   -- present only in the current/old side.
/// - `Changed`   -- present in both sides but with different values.
/// - `Unchanged` -- present in both sides with identical values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Removed,
    Changed,
    Unchanged,
}

impl DiffStatus {
    /// String representation for display and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
        }
    }
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Diff results
// ---------------------------------------------------------------------------

/// How one job differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDiff {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub status: DiffStatus,
}

/// A status change observed for one job.
///
/// `from` is `None` when the job first appeared after the initial
/// snapshot already in the `to` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub from: Option<JobStatus>,
    pub to: JobStatus,
}

impl StatusTransition {
    /// The job went from a non-terminal state to `completed`.
    pub fn is_completion(&self) -> bool {
        self.to == JobStatus::Completed && self.from.map_or(true, |from| !from.is_terminal())
    }

    /// The server reported a move the state machine does not allow.
    pub fn is_regression(&self) -> bool {
        self.from
            .is_some_and(|from| !from.can_transition_to(self.to))
    }
}

/// Everything that changed between two consecutive snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotChange {
    /// Per-job diff, excluding unchanged jobs. Current-snapshot order
    /// first, then removed jobs in previous-snapshot order.
    pub diffs: Vec<JobDiff>,
    pub transitions: Vec<StatusTransition>,
    /// Projects whose trained-model view is stale, each listed once.
    pub invalidate_models: Vec<ProjectId>,
}

impl SnapshotChange {
    pub fn removed(&self) -> impl Iterator<Item = &JobDiff> {
        self.diffs.iter().filter(|d| d.status == DiffStatus::Removed)
    }
}

// ---------------------------------------------------------------------------
// Pure diffing
// ---------------------------------------------------------------------------

/// Diff two snapshots by job id.
///
/// Unchanged jobs are included so callers can count them; use
/// [`ChangeDetector`] for the filtered, stateful view.
pub fn diff_snapshots(previous: &JobSnapshot, current: &JobSnapshot) -> Vec<JobDiff> {
    let prev_by_id: HashMap<&str, &Job> =
        previous.jobs.iter().map(|j| (j.id.as_str(), j)).collect();
    let curr_by_id: HashMap<&str, &Job> = current.jobs.iter().map(|j| (j.id.as_str(), j)).collect();

    let mut diffs: Vec<JobDiff> = current
        .jobs
        .iter()
        .map(|job| {
            let status = match prev_by_id.get(job.id.as_str()) {
                None => DiffStatus::Added,
                Some(prev) if *prev == job => DiffStatus::Unchanged,
                Some(_) => DiffStatus::Changed,
            };
            JobDiff {
                job_id: job.id.clone(),
                project_id: job.project_id.clone(),
                status,
            }
        })
        .collect();

    diffs.extend(
        previous
            .jobs
            .iter()
            .filter(|job| !curr_by_id.contains_key(job.id.as_str()))
            .map(|job| JobDiff {
                job_id: job.id.clone(),
                project_id: job.project_id.clone(),
                status: DiffStatus::Removed,
            }),
    );

    diffs
}

/// Status transitions between two snapshots, in current-snapshot order.
///
/// With `report_new` set, jobs absent from `previous` produce a
/// transition with `from: None`. Jobs missing from `current` never
/// produce a transition.
pub fn status_transitions(
    previous: &JobSnapshot,
    current: &JobSnapshot,
    report_new: bool,
) -> Vec<StatusTransition> {
    let prev_status: HashMap<&str, JobStatus> = previous
        .jobs
        .iter()
        .map(|j| (j.id.as_str(), j.status))
        .collect();

    current
        .jobs
        .iter()
        .filter_map(|job| match prev_status.get(job.id.as_str()) {
            Some(&from) if from != job.status => Some(StatusTransition {
                job_id: job.id.clone(),
                project_id: job.project_id.clone(),
                from: Some(from),
                to: job.status,
            }),
            None if report_new => Some(StatusTransition {
                job_id: job.id.clone(),
                project_id: job.project_id.clone(),
                from: None,
                to: job.status,
            }),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Stateful detector
// ---------------------------------------------------------------------------

/// Remembers the previous snapshot and reports what changed.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    previous: Option<JobSnapshot>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last snapshot passed to [`observe`](Self::observe).
    pub fn previous(&self) -> Option<&JobSnapshot> {
        self.previous.as_ref()
    }

    /// Feed the next snapshot.
    ///
    /// Returns `None` when the snapshot is structurally identical to the
    /// previous one. The very first snapshot only establishes a baseline:
    /// it reports its jobs as added but never invalidates anything.
    pub fn observe(&mut self, current: &JobSnapshot) -> Option<SnapshotChange> {
        let change = match &self.previous {
            Some(previous) if previous == current => return None,
            Some(previous) => {
                let transitions = status_transitions(previous, current, true);
                let mut invalidate_models: Vec<ProjectId> = Vec::new();
                for transition in transitions.iter().filter(|t| t.is_completion()) {
                    if !invalidate_models.contains(&transition.project_id) {
                        invalidate_models.push(transition.project_id.clone());
                    }
                }
                SnapshotChange {
                    diffs: changed_only(diff_snapshots(previous, current)),
                    transitions: transitions
                        .into_iter()
                        .filter(|t| t.from.is_some() || t.is_completion())
                        .collect(),
                    invalidate_models,
                }
            }
            None => SnapshotChange {
                diffs: changed_only(diff_snapshots(&JobSnapshot::default(), current)),
                transitions: Vec::new(),
                invalidate_models: Vec::new(),
            },
        };

        self.previous = Some(current.clone());
        Some(change)
    }

    /// Forget the baseline, e.g. after switching project.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

fn changed_only(diffs: Vec<JobDiff>) -> Vec<JobDiff> {
    diffs
        .into_iter()
        .filter(|d| d.status != DiffStatus::Unchanged)
        .collect()
}
