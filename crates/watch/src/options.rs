//! What the watcher should do, read from the environment.

use inspect_client::config::ConfigError;
use inspect_core::device::Device;
use inspect_core::types::{MediaId, ModelId, ProjectId};

/// Options on top of [`inspect_client::config::ClientConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    pub project_id: ProjectId,
    /// Queue a training run of this model template on startup.
    pub train_model: Option<String>,
    /// Run one inference with this trained model on startup.
    pub predict: Option<PredictOptions>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictOptions {
    pub model_id: ModelId,
    /// Image to run on; the first image of the project when unset.
    pub media_id: Option<MediaId>,
    pub device: Device,
}

impl WatchOptions {
    /// | Env Var                    | Required | Default |
    /// |----------------------------|----------|---------|
    /// | `INSPECT_PROJECT_ID`       | yes      | --      |
    /// | `INSPECT_TRAIN_MODEL`      | no       | --      |
    /// | `INSPECT_PREDICT_MODEL_ID` | no       | --      |
    /// | `INSPECT_PREDICT_MEDIA_ID` | no       | --      |
    /// | `INSPECT_DEVICE`           | no       | `auto`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let project_id = var("INSPECT_PROJECT_ID").ok_or(ConfigError::Missing("INSPECT_PROJECT_ID"))?;

        let device = match var("INSPECT_DEVICE") {
            Some(raw) => raw.parse::<Device>().map_err(|_| ConfigError::Invalid {
                var: "INSPECT_DEVICE",
                expected: "one of cpu, gpu, npu, auto",
                value: raw,
            })?,
            None => Device::Auto,
        };

        let predict = var("INSPECT_PREDICT_MODEL_ID").map(|model_id| PredictOptions {
            model_id,
            media_id: var("INSPECT_PREDICT_MEDIA_ID"),
            device,
        });

        Ok(Self {
            project_id,
            train_model: var("INSPECT_TRAIN_MODEL"),
            predict,
        })
    }
}
