//! Inference session: the user's current selections and the result of
//! the latest inference request.
//!
//! One [`InferenceSession`] is created per user session and passed
//! explicitly to whatever needs it. Selecting a model (with an image
//! selected) or a device (with a model and an image selected) starts an
//! inference request in the background. Requests are never cancelled: each
//! one carries a sequence number, and only the result of the most recently
//! started request is accepted. Older results are discarded on arrival.

use std::sync::Arc;

use inspect_core::device::Device;
use inspect_core::error::CoreError;
use inspect_core::types::ModelId;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::api::{ApiError, MediaItem, PredictionResponse};
use crate::events::Notification;
use crate::source::InferenceBackend;

/// Overlay opacity used until the user changes it.
pub const DEFAULT_OPACITY: f64 = 0.75;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Result of the most recently started request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InferenceState {
    /// Nothing has been requested yet.
    #[default]
    Idle,
    Pending { seq: u64 },
    Ready {
        seq: u64,
        model_id: ModelId,
        device: Device,
        response: PredictionResponse,
    },
    Failed { seq: u64, message: String },
}

impl InferenceState {
    /// Sequence number of the request this state belongs to.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Pending { seq } | Self::Ready { seq, .. } | Self::Failed { seq, .. } => Some(*seq),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn response(&self) -> Option<&PredictionResponse> {
        match self {
            Self::Ready { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// A started inference request.
#[derive(Debug)]
pub struct InferenceTicket {
    pub seq: u64,
    handle: JoinHandle<()>,
}

impl InferenceTicket {
    /// Wait until the request has finished and its result was applied
    /// (or discarded).
    pub async fn finished(self) {
        let _ = self.handle.await;
    }
}

/// Selections plus the in-flight inference request.
pub struct InferenceSession {
    backend: Arc<dyn InferenceBackend>,
    model_id: Option<ModelId>,
    device: Device,
    media: Option<MediaItem>,
    opacity: f64,
    next_seq: u64,
    state_tx: Arc<watch::Sender<InferenceState>>,
    notify_tx: broadcast::Sender<Notification>,
}

impl InferenceSession {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        let (state_tx, _) = watch::channel(InferenceState::Idle);
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            backend,
            model_id: None,
            device: Device::Auto,
            media: None,
            opacity: DEFAULT_OPACITY,
            next_seq: 0,
            state_tx: Arc::new(state_tx),
            notify_tx,
        }
    }

    // ---- selections ----

    pub fn model_id(&self) -> Option<&ModelId> {
        self.model_id.as_ref()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn media(&self) -> Option<&MediaItem> {
        self.media.as_ref()
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    /// Select (or clear) the model. With an image selected, a new model
    /// starts an inference request.
    pub fn select_model(&mut self, model_id: Option<ModelId>) -> Option<InferenceTicket> {
        self.model_id = model_id;
        let model_id = self.model_id.clone()?;
        let media = self.media.clone()?;
        Some(self.spawn_inference(media, model_id, self.device))
    }

    /// Select the device. With a model and an image selected, the request
    /// is repeated on the new device.
    pub fn select_device(&mut self, device: Device) -> Option<InferenceTicket> {
        self.device = device;
        let model_id = self.model_id.clone()?;
        let media = self.media.clone()?;
        Some(self.spawn_inference(media, model_id, device))
    }

    /// Select (or clear) the image. This alone never starts a request.
    pub fn select_media(&mut self, media: Option<MediaItem>) {
        self.media = media;
    }

    /// Set the overlay opacity. Values outside `0.0..=1.0` are rejected
    /// and the previous value is kept.
    pub fn set_opacity(&mut self, opacity: f64) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(CoreError::Validation(format!(
                "Opacity must be between 0.0 and 1.0, got {opacity}"
            )));
        }
        self.opacity = opacity;
        Ok(())
    }

    /// Run the selected model on the selected image now.
    pub fn infer(&mut self) -> Result<InferenceTicket, CoreError> {
        let model_id = self
            .model_id
            .clone()
            .ok_or_else(|| CoreError::Validation("No model selected".into()))?;
        let media = self
            .media
            .clone()
            .ok_or_else(|| CoreError::Validation("No image selected".into()))?;
        Ok(self.spawn_inference(media, model_id, self.device))
    }

    // ---- results ----

    /// State of the most recently started request.
    pub fn current(&self) -> InferenceState {
        self.state_tx.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state_tx.borrow().is_pending()
    }

    /// Follow the current result.
    pub fn watch(&self) -> watch::Receiver<InferenceState> {
        self.state_tx.subscribe()
    }

    /// Receive user-facing notifications (inference failures).
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    // ---- private helpers ----

    fn spawn_inference(&mut self, media: MediaItem, model_id: ModelId, device: Device) -> InferenceTicket {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.state_tx.send_replace(InferenceState::Pending { seq });

        tracing::info!(
            seq,
            media_id = %media.id,
            model_id = %model_id,
            %device,
            "Starting inference",
        );

        let backend = Arc::clone(&self.backend);
        let state_tx = Arc::clone(&self.state_tx);
        let notify_tx = self.notify_tx.clone();
        let handle = tokio::spawn(async move {
            let result = backend.infer(&media, &model_id, device).await;
            apply_result(seq, model_id, device, result, &state_tx, &notify_tx);
        });

        InferenceTicket { seq, handle }
    }
}

/// Accept `result` only if `seq` is still the latest request.
fn apply_result(
    seq: u64,
    model_id: ModelId,
    device: Device,
    result: Result<PredictionResponse, ApiError>,
    state_tx: &watch::Sender<InferenceState>,
    notify_tx: &broadcast::Sender<Notification>,
) {
    let (next, failure) = match result {
        Ok(response) => (
            InferenceState::Ready {
                seq,
                model_id,
                device,
                response,
            },
            None,
        ),
        Err(e) => {
            let message = e.detail();
            (
                InferenceState::Failed {
                    seq,
                    message: message.clone(),
                },
                Some(message),
            )
        }
    };

    let accepted = state_tx.send_if_modified(|state| {
        if *state != (InferenceState::Pending { seq }) {
            return false;
        }
        *state = next;
        true
    });

    if !accepted {
        tracing::debug!(seq, "Discarding superseded inference result");
        return;
    }

    if let Some(message) = failure {
        tracing::warn!(seq, error = %message, "Inference failed");
        let _ = notify_tx.send(Notification::error(message));
    }
}
