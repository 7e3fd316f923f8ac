//! REST API client for the inspect backend.
//!
//! Wraps the project, image, job, model and inference endpoints using
//! [`reqwest`]. The Server-Sent-Events endpoints are opened here too but
//! decoded in [`crate::streamer`].

use std::time::Duration;

use inspect_core::device::Device;
use inspect_core::job::{Job, JobList};
use inspect_core::models::{ModelList, TrainableModels, TrainedModel};
use inspect_core::types::{JobId, MediaId, ModelId, ProjectId};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

/// HTTP client for one inspect backend.
#[derive(Clone)]
pub struct InspectApi {
    client: reqwest::Client,
    api_url: String,
    /// Deadline for plain requests; event streams are never cut off.
    request_timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectList {
    pub projects: Vec<Project>,
}

/// An uploaded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: MediaId,
    pub project_id: ProjectId,
    pub filename: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaList {
    pub media: Vec<MediaItem>,
}

/// Body of `POST /api/jobs:train`.
#[derive(Debug, Clone, Serialize)]
pub struct TrainRequest<'a> {
    pub project_id: &'a str,
    pub model_name: &'a str,
}

/// Result of running a model on one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub label: String,
    pub score: f64,
    /// Base64-encoded anomaly heatmap, when the server renders one.
    #[serde(default)]
    pub anomaly_map: Option<String>,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Inspect API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ApiError {
    /// The message to show a user: the server's `detail` field when the
    /// body is a JSON error document, otherwise the full error text.
    pub fn detail(&self) -> String {
        match self {
            Self::Status { body, .. } => serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
                .unwrap_or_else(|| self.to_string()),
            Self::Request(_) => self.to_string(),
        }
    }
}

impl InspectApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:8000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            request_timeout: None,
        }
    }

    /// Build a client with the configured request timeout.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            request_timeout: Some(timeout),
            ..Self::with_client(client, config.api_url.clone())
        })
    }

    /// HTTP API base URL (without trailing slash).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- projects ----

    /// `GET /api/projects`
    pub async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        let list: ProjectList = self.get_json("/api/projects").await?;
        Ok(list.projects)
    }

    /// `POST /api/projects`
    pub async fn create_project(&self, name: &str) -> Result<Project, ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/api/projects")
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- images ----

    /// `GET /api/projects/{project_id}/images`
    pub async fn list_images(&self, project_id: &str) -> Result<Vec<MediaItem>, ApiError> {
        let list: MediaList = self
            .get_json(&format!("/api/projects/{project_id}/images"))
            .await?;
        Ok(list.media)
    }

    /// Upload one image as multipart `file`.
    pub async fn upload_image(
        &self,
        project_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<MediaItem, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .request(reqwest::Method::POST, &format!("/api/projects/{project_id}/images"))
            .multipart(form)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Download the full-resolution bytes of an uploaded image.
    pub async fn fetch_image(&self, media: &MediaItem) -> Result<Vec<u8>, ApiError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/projects/{}/images/{}/full", media.project_id, media.id),
            )
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- training & jobs ----

    /// `GET /api/trainable-models`
    pub async fn list_trainable_models(&self) -> Result<Vec<String>, ApiError> {
        let list: TrainableModels = self.get_json("/api/trainable-models").await?;
        Ok(list.trainable_models)
    }

    /// Queue a training job. The returned job is usually `pending`.
    pub async fn start_training(&self, project_id: &str, model_name: &str) -> Result<Job, ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/api/jobs:train")
            .json(&TrainRequest {
                project_id,
                model_name,
            })
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// `GET /api/jobs` -- every job of every project.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, ApiError> {
        let list: JobList = self.get_json("/api/jobs").await?;
        Ok(list.jobs)
    }

    /// `POST /api/jobs/{job_id}:cancel`
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::POST, &format!("/api/jobs/{job_id}:cancel"))
            .send()
            .await?;
        Self::check_status(response).await
    }

    // ---- models & inference ----

    /// `GET /api/projects/{project_id}/models`
    pub async fn list_models(&self, project_id: &str) -> Result<Vec<TrainedModel>, ApiError> {
        let list: ModelList = self
            .get_json(&format!("/api/projects/{project_id}/models"))
            .await?;
        Ok(list.models)
    }

    /// Run a model on raw image bytes.
    ///
    /// The device goes in the `device` query parameter; `Auto` omits it
    /// so the server picks.
    pub async fn predict(
        &self,
        project_id: &str,
        model_id: &ModelId,
        filename: &str,
        bytes: Vec<u8>,
        device: Device,
    ) -> Result<PredictionResponse, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self
            .request(
                reqwest::Method::POST,
                &format!("/api/projects/{project_id}/models/{model_id}:predict"),
            )
            .multipart(form);
        if let Some(device) = device.request_param() {
            request = request.query(&[("device", device)]);
        }

        let response = request.send().await?;
        Self::parse_response(response).await
    }

    /// Download an uploaded image and run a model on it.
    pub async fn infer_media(
        &self,
        media: &MediaItem,
        model_id: &ModelId,
        device: Device,
    ) -> Result<PredictionResponse, ApiError> {
        let bytes = self.fetch_image(media).await?;
        self.predict(&media.project_id, model_id, &media.filename, bytes, device)
            .await
    }

    // ---- event streams ----

    /// Open a Server-Sent-Events endpoint and return the streaming
    /// response once the server accepted it.
    pub async fn open_event_stream(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let response = self
            .client
            .get(self.url(path))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Start a plain (non-streaming) request with the configured timeout.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.request_timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(reqwest::Method::GET, path).send().await?;
        Self::parse_response(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = InspectApi::new("http://localhost:8000/");
        assert_eq!(api.api_url(), "http://localhost:8000");
        assert_eq!(api.url("/api/jobs"), "http://localhost:8000/api/jobs");
    }

    #[test]
    fn detail_prefers_server_message() {
        let err = ApiError::Status {
            status: 422,
            body: r#"{"detail":"Model not found"}"#.to_string(),
        };
        assert_eq!(err.detail(), "Model not found");
    }

    #[test]
    fn detail_falls_back_to_display() {
        let err = ApiError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.detail(), "Inspect API error (500): boom");
    }

    #[test]
    fn prediction_without_heatmap() {
        let p: PredictionResponse =
            serde_json::from_str(r#"{"label":"Anomalous","score":0.93}"#).unwrap();
        assert_eq!(p.label, "Anomalous");
        assert!(p.anomaly_map.is_none());
    }
}
