//! Job event-stream payloads and their parser.
//!
//! Every SSE `data` field on the job streams is either an end-of-stream
//! sentinel or a JSON document. Log streams carry `{"text": "..."}`,
//! progress streams carry `{"progress": 42.0, "stage": "fit"}`.

use inspect_core::progress::ProgressRecord;

/// Raw data value that ends a stream.
pub const END_OF_STREAM: &str = "DONE";

/// Any raw data containing this marker also ends a stream.
pub const COMPLETED_MARKER: &str = "COMPLETED";

/// A classified raw frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The server signalled the end of the stream.
    End,
    /// A decoded JSON payload.
    Payload(serde_json::Value),
}

/// True for the sentinel frames that terminate a stream.
pub fn is_end_of_stream(raw: &str) -> bool {
    raw == END_OF_STREAM || raw.contains(COMPLETED_MARKER)
}

/// Classify one raw `data` value.
///
/// Returns `Err` for malformed JSON. Callers should log and continue.
pub fn parse_frame(raw: &str) -> Result<Frame, serde_json::Error> {
    if is_end_of_stream(raw) {
        return Ok(Frame::End);
    }
    serde_json::from_str(raw).map(Frame::Payload)
}

/// A message type carried by one of the per-job event streams.
pub trait StreamMessage: Sized + Send + 'static {
    /// Short name for logs (`"logs"`, `"progress"`).
    const KIND: &'static str;

    /// Path of the SSE endpoint for `job_id`.
    fn endpoint(job_id: &str) -> String;

    /// Extract a message from a decoded payload. `None` means the payload
    /// is well-formed JSON but carries nothing for this stream.
    fn from_payload(payload: serde_json::Value) -> Option<Self>;
}

/// One line of training output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine(pub String);

impl StreamMessage for LogLine {
    const KIND: &'static str = "logs";

    fn endpoint(job_id: &str) -> String {
        format!("/api/jobs/{job_id}/logs")
    }

    /// Only a non-empty string `text` field produces a line.
    fn from_payload(payload: serde_json::Value) -> Option<Self> {
        payload
            .get("text")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| LogLine(t.to_string()))
    }
}

impl StreamMessage for ProgressRecord {
    const KIND: &'static str = "progress";

    fn endpoint(job_id: &str) -> String {
        format!("/api/jobs/{job_id}/progress")
    }

    fn from_payload(payload: serde_json::Value) -> Option<Self> {
        serde_json::from_value(payload).ok()
    }
}
