//! Point-in-time job lists and the scope a consumer is interested in.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::{Job, JobKind, JobList};
use crate::types::ProjectId;

/// Which jobs a consumer cares about: one project, optionally narrowed
/// to a single job kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobScope {
    pub project_id: ProjectId,
    pub kind: Option<JobKind>,
}

impl JobScope {
    /// Every job of a project.
    pub fn project(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            kind: None,
        }
    }

    /// Only the training jobs of a project.
    pub fn training(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            kind: Some(JobKind::Training),
        }
    }

    pub fn contains(&self, job: &Job) -> bool {
        job.project_id == self.project_id && self.kind.map_or(true, |kind| kind == job.kind)
    }
}

/// The jobs observed at one poll tick, in server order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub jobs: Vec<Job>,
}

impl JobSnapshot {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self { jobs }
    }

    /// Keep only the jobs inside `scope`, preserving order.
    pub fn scoped(&self, scope: &JobScope) -> JobSnapshot {
        JobSnapshot {
            jobs: self
                .jobs
                .iter()
                .filter(|job| scope.contains(job))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == job_id)
    }

    /// Like [`get`](Self::get) but reports a missing job as an error.
    pub fn require(&self, job_id: &str) -> Result<&Job, CoreError> {
        self.get(job_id).ok_or_else(|| CoreError::NotFound {
            entity: "job",
            id: job_id.to_string(),
        })
    }

    /// True if any job is pending or running.
    pub fn has_active_jobs(&self) -> bool {
        self.jobs.iter().any(|job| job.status.is_active())
    }

    /// The first pending or running job; this is what a status bar shows.
    pub fn current_job(&self) -> Option<&Job> {
        self.jobs.iter().find(|job| job.status.is_active())
    }
}

impl From<JobList> for JobSnapshot {
    fn from(list: JobList) -> Self {
        Self { jobs: list.jobs }
    }
}
