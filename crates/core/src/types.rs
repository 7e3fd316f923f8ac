/// Server-assigned identifiers are opaque strings (UUIDs in practice).
pub type ProjectId = String;
pub type JobId = String;
pub type ModelId = String;
pub type MediaId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
