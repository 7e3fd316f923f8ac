//! Client library for the inspect anomaly-detection backend.
//!
//! Provides the REST API wrapper, Server-Sent-Events job streams,
//! adaptive job-list polling with change detection, a trained-models
//! cache, and the inference session that tracks user selections.

pub mod api;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod events;
pub mod fetcher;
pub mod messages;
pub mod monitor;
pub mod session;
pub mod source;
pub mod sse;
pub mod streamer;
