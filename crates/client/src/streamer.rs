//! Per-job log and progress streams.
//!
//! [`JobStream::subscribe`] spawns a producer task that opens the job's SSE
//! endpoint, frames the bytes with [`SseDecoder`], classifies each frame
//! with [`parse_frame`], and pushes decoded messages into a bounded queue.
//! The returned [`JobStream`] is the consumer side and implements
//! [`futures::Stream`].
//!
//! Lifecycle:
//! - a sentinel frame ends the stream: the connection is dropped and the
//!   queue closes after the messages already in it;
//! - [`JobStream::close`] drops the connection immediately, independent
//!   of whether the consumer keeps reading;
//! - dropping the consumer makes the producer exit at its next await.
//!
//! A stream is not restartable. Subscribing again reopens the endpoint at
//! the server's current tail.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use inspect_core::progress::ProgressRecord;
use inspect_core::types::JobId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, InspectApi};
use crate::messages::{parse_frame, Frame, LogLine, StreamMessage};
use crate::sse::SseDecoder;

/// Default capacity of the queue between producer and consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Errors delivered as the final item of a stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The endpoint could not be opened (network failure or non-2xx).
    #[error("Failed to open {kind} stream for job {job_id}: {source}")]
    Open {
        kind: &'static str,
        job_id: JobId,
        #[source]
        source: ApiError,
    },

    /// The connection failed mid-stream.
    #[error("{kind} stream for job {job_id} failed: {source}")]
    Transport {
        kind: &'static str,
        job_id: JobId,
        #[source]
        source: reqwest::Error,
    },

    /// The server closed the connection without sending an end-of-stream
    /// sentinel.
    #[error("{kind} stream for job {job_id} disconnected before completion")]
    Disconnected { kind: &'static str, job_id: JobId },
}

/// Why a producer task stopped. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Completed,
    Closed,
    ConsumerGone,
    Failed,
}

type Item<T> = Result<T, StreamError>;

/// Consumer side of one job event stream.
pub struct JobStream<T> {
    job_id: JobId,
    rx: ReceiverStream<Item<T>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<T: StreamMessage> JobStream<T> {
    /// Open the `T` stream of `job_id` with a queue of `buffer` messages.
    ///
    /// Returns immediately; connection failures arrive as the first (and
    /// only) item of the stream.
    pub fn subscribe(api: &InspectApi, job_id: &str, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();

        let api = api.clone();
        let producer_job_id = job_id.to_string();
        let producer_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let end = produce::<T>(&api, &producer_job_id, &tx, &producer_cancel).await;
            tracing::debug!(
                job_id = %producer_job_id,
                kind = T::KIND,
                ?end,
                "Job stream producer exited",
            );
        });

        Self {
            job_id: job_id.to_string(),
            rx: ReceiverStream::new(rx),
            cancel,
            task,
        }
    }
}

impl<T> JobStream<T> {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Drop the underlying connection now.
    ///
    /// Messages already queued can still be read; nothing new arrives.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// True once the producer has stopped (sentinel, error, or close).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Read everything until the stream ends.
    pub async fn drain(mut self) -> StreamOutcome<T>
    where
        T: Unpin,
    {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(message) => items.push(message),
                Err(error) => {
                    return StreamOutcome {
                        items,
                        error: Some(error),
                    }
                }
            }
        }
        StreamOutcome { items, error: None }
    }
}

impl<T> Stream for JobStream<T> {
    type Item = Item<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

/// Everything a finished stream produced.
#[derive(Debug)]
pub struct StreamOutcome<T> {
    pub items: Vec<T>,
    /// Set when the stream ended with a failure instead of a sentinel.
    pub error: Option<StreamError>,
}

/// Subscribe to the training log of a job.
pub fn subscribe_logs(api: &InspectApi, job_id: &str, buffer: usize) -> JobStream<LogLine> {
    JobStream::subscribe(api, job_id, buffer)
}

/// Subscribe to the progress records of a job.
pub fn subscribe_progress(
    api: &InspectApi,
    job_id: &str,
    buffer: usize,
) -> JobStream<ProgressRecord> {
    JobStream::subscribe(api, job_id, buffer)
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Outcome of handling one frame.
enum Delivery {
    Continue,
    Stop(StreamEnd),
}

async fn produce<T: StreamMessage>(
    api: &InspectApi,
    job_id: &str,
    tx: &mpsc::Sender<Item<T>>,
    cancel: &CancellationToken,
) -> StreamEnd {
    let endpoint = T::endpoint(job_id);
    let opened = tokio::select! {
        _ = cancel.cancelled() => return StreamEnd::Closed,
        opened = api.open_event_stream(&endpoint) => opened,
    };

    let response = match opened {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(job_id, kind = T::KIND, error = %e, "Failed to open job stream");
            let _ = tx
                .send(Err(StreamError::Open {
                    kind: T::KIND,
                    job_id: job_id.to_string(),
                    source: e,
                }))
                .await;
            return StreamEnd::Failed;
        }
    };

    tracing::info!(job_id, kind = T::KIND, "Job stream opened");

    let mut bytes = Box::pin(response.bytes_stream());
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Closed,
            _ = tx.closed() => return StreamEnd::ConsumerGone,
            chunk = bytes.next() => chunk,
        };

        let (events, exhausted) = match chunk {
            Some(Ok(chunk)) => (decoder.push(&chunk), false),
            Some(Err(e)) => {
                tracing::warn!(job_id, kind = T::KIND, error = %e, "Job stream receive error");
                let _ = tx
                    .send(Err(StreamError::Transport {
                        kind: T::KIND,
                        job_id: job_id.to_string(),
                        source: e,
                    }))
                    .await;
                return StreamEnd::Failed;
            }
            None => (decoder.finish().into_iter().collect(), true),
        };

        for event in events {
            if let Delivery::Stop(end) = deliver::<T>(&event.data, job_id, tx, cancel).await {
                return end;
            }
        }

        if exhausted {
            tracing::warn!(job_id, kind = T::KIND, "Job stream closed without end marker");
            let _ = tx
                .send(Err(StreamError::Disconnected {
                    kind: T::KIND,
                    job_id: job_id.to_string(),
                }))
                .await;
            return StreamEnd::Failed;
        }
    }
}

/// Classify one raw frame and forward its message, if any.
async fn deliver<T: StreamMessage>(
    raw: &str,
    job_id: &str,
    tx: &mpsc::Sender<Item<T>>,
    cancel: &CancellationToken,
) -> Delivery {
    let payload = match parse_frame(raw) {
        Ok(Frame::End) => {
            tracing::info!(job_id, kind = T::KIND, "Job stream completed");
            return Delivery::Stop(StreamEnd::Completed);
        }
        Ok(Frame::Payload(payload)) => payload,
        Err(e) => {
            tracing::warn!(
                job_id,
                kind = T::KIND,
                error = %e,
                raw_message = %raw,
                "Dropping malformed job stream frame",
            );
            return Delivery::Continue;
        }
    };

    let Some(message) = T::from_payload(payload) else {
        tracing::trace!(job_id, kind = T::KIND, "Frame carried no message");
        return Delivery::Continue;
    };

    tokio::select! {
        _ = cancel.cancelled() => Delivery::Stop(StreamEnd::Closed),
        sent = tx.send(Ok(message)) => match sent {
            Ok(()) => Delivery::Continue,
            Err(_) => Delivery::Stop(StreamEnd::ConsumerGone),
        },
    }
}

// ---------------------------------------------------------------------------
// Consumers
// ---------------------------------------------------------------------------

/// Accumulates every log line, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: Vec<String>,
}

impl LogBuffer {
    pub fn push(&mut self, line: LogLine) {
        self.lines.push(line.0);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Keeps only the most recent progress record.
#[derive(Debug, Clone, Default)]
pub struct LatestProgress {
    latest: Option<ProgressRecord>,
}

impl LatestProgress {
    pub fn apply(&mut self, record: ProgressRecord) {
        self.latest = Some(record);
    }

    pub fn get(&self) -> Option<&ProgressRecord> {
        self.latest.as_ref()
    }
}
