//! Seams between the sync components and the backend.
//!
//! The fetcher, models cache and inference session only talk to the
//! backend through these traits, so they can run against [`InspectApi`]
//! in production and against in-memory fakes in tests.

use async_trait::async_trait;
use inspect_core::device::Device;
use inspect_core::job::Job;
use inspect_core::models::TrainedModel;
use inspect_core::types::{JobId, ModelId};

use crate::api::{ApiError, InspectApi, MediaItem, PredictionResponse};

/// Anything that can list the backend's jobs.
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
    async fn list_jobs(&self) -> Result<Vec<Job>, ApiError>;
}

/// Job actions on top of listing: queue a training run, cancel a job.
#[async_trait]
pub trait JobControl: JobSource {
    async fn start_training(&self, project_id: &str, model_name: &str) -> Result<Job, ApiError>;

    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError>;
}

/// Anything that can list the trained models of a project.
#[async_trait]
pub trait ModelSource: Send + Sync + 'static {
    async fn list_models(&self, project_id: &str) -> Result<Vec<TrainedModel>, ApiError>;
}

/// Anything that can run a model on an uploaded image.
#[async_trait]
pub trait InferenceBackend: Send + Sync + 'static {
    async fn infer(
        &self,
        media: &MediaItem,
        model_id: &ModelId,
        device: Device,
    ) -> Result<PredictionResponse, ApiError>;
}

#[async_trait]
impl JobSource for InspectApi {
    async fn list_jobs(&self) -> Result<Vec<Job>, ApiError> {
        InspectApi::list_jobs(self).await
    }
}

#[async_trait]
impl JobControl for InspectApi {
    async fn start_training(&self, project_id: &str, model_name: &str) -> Result<Job, ApiError> {
        InspectApi::start_training(self, project_id, model_name).await
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError> {
        InspectApi::cancel_job(self, job_id).await
    }
}

#[async_trait]
impl ModelSource for InspectApi {
    async fn list_models(&self, project_id: &str) -> Result<Vec<TrainedModel>, ApiError> {
        InspectApi::list_models(self, project_id).await
    }
}

#[async_trait]
impl InferenceBackend for InspectApi {
    async fn infer(
        &self,
        media: &MediaItem,
        model_id: &ModelId,
        device: Device,
    ) -> Result<PredictionResponse, ApiError> {
        self.infer_media(media, model_id, device).await
    }
}
