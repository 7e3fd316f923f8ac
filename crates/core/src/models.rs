//! Trained models and the model table that joins them with their jobs.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};
use crate::types::{JobId, ModelId, Timestamp};

/// A model produced by a finished training job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub id: ModelId,
    pub name: String,
    #[serde(default)]
    pub train_job_id: Option<JobId>,
}

/// Envelope returned by `GET /api/projects/{project_id}/models`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<TrainedModel>,
}

/// Envelope returned by `GET /api/trainable-models`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainableModels {
    pub trainable_models: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRowStatus {
    Training,
    Completed,
    Failed,
}

/// One row of the models table.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRow {
    /// Model id for trained models, job id for models still in training.
    pub id: String,
    pub name: String,
    pub status: ModelRowStatus,
    pub started_at: Option<Timestamp>,
    pub duration_secs: Option<i64>,
    pub job_id: Option<JobId>,
}

impl ModelRow {
    /// Only trained models can be selected for inference.
    pub fn is_selectable(&self) -> bool {
        self.status == ModelRowStatus::Completed
    }
}

/// Build the models table: unfinished jobs first (in job order), then
/// trained models (in model order).
///
/// Completed jobs are represented by the model they produced, so they
/// are not listed separately.
pub fn build_model_rows(models: &[TrainedModel], jobs: &[Job]) -> Vec<ModelRow> {
    let in_flight = jobs
        .iter()
        .filter(|job| job.status != JobStatus::Completed)
        .map(|job| ModelRow {
            id: job.id.clone(),
            name: job.model_name().unwrap_or(&job.id).to_string(),
            status: if job.status.is_active() {
                ModelRowStatus::Training
            } else {
                ModelRowStatus::Failed
            },
            started_at: job.start_time,
            duration_secs: None,
            job_id: Some(job.id.clone()),
        });

    let trained = models.iter().map(|model| {
        let job = model
            .train_job_id
            .as_deref()
            .and_then(|id| jobs.iter().find(|job| job.id == id));
        ModelRow {
            id: model.id.clone(),
            name: model.name.clone(),
            status: ModelRowStatus::Completed,
            started_at: job.and_then(|j| j.start_time),
            duration_secs: job.and_then(Job::duration_secs),
            job_id: model.train_job_id.clone(),
        }
    });

    in_flight.chain(trained).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::job;

    fn model(id: &str, job_id: Option<&str>) -> TrainedModel {
        TrainedModel {
            id: id.to_string(),
            name: format!("model-{id}"),
            train_job_id: job_id.map(str::to_string),
        }
    }

    #[test]
    fn in_flight_jobs_come_first() {
        let mut training = job("j2", "p1", JobStatus::Running);
        training.payload = serde_json::json!({"model_name": "patchcore"});
        let failed = job("j3", "p1", JobStatus::Canceled);
        let done = job("j1", "p1", JobStatus::Completed);

        let rows = build_model_rows(&[model("m1", Some("j1"))], &[done, training, failed]);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name, "patchcore");
        assert_eq!(rows[0].status, ModelRowStatus::Training);
        assert_eq!(rows[1].status, ModelRowStatus::Failed);
        assert_eq!(rows[1].name, "j3");
        assert_eq!(rows[2].id, "m1");
        assert!(rows[2].is_selectable());
        assert!(!rows[0].is_selectable());
    }

    #[test]
    fn trained_model_takes_timing_from_its_job() {
        let mut done = job("j1", "p1", JobStatus::Completed);
        done.start_time = Some("2025-10-01T11:00:00Z".parse().unwrap());
        done.end_time = Some("2025-10-01T11:10:00Z".parse().unwrap());

        let rows = build_model_rows(&[model("m1", Some("j1"))], &[done]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_secs, Some(600));
        assert!(rows[0].started_at.is_some());
    }

    #[test]
    fn model_without_job_has_no_timing() {
        let rows = build_model_rows(&[model("m1", None)], &[]);
        assert!(rows[0].started_at.is_none());
        assert!(rows[0].duration_secs.is_none());
    }
}
