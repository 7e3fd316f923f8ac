//! Domain types and pure logic for the inspect job-sync client.
//!
//! Everything in this crate is I/O free: job and snapshot types, the job
//! status state machine, the adaptive poll policy, the snapshot change
//! detector, and the small bits of derived view state (progress, stage,
//! training readiness, model table rows) that sit on top of them.

pub mod dataset;
pub mod device;
pub mod diff;
pub mod error;
pub mod job;
pub mod models;
pub mod poll_policy;
pub mod progress;
pub mod snapshot;
pub mod types;
