//! Streamed progress records and the status-bar view derived from them.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};

/// One `{progress, stage}` record from the job progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub progress: f64,
    #[serde(default)]
    pub stage: String,
}

/// Broad phase of a training run, derived from its free-text stage label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Validation,
    Testing,
    Training,
    Other,
}

impl StageKind {
    /// Classify a stage label, case-insensitively. Validation wins over
    /// testing, which wins over training.
    pub fn classify(stage: &str) -> Self {
        let stage = stage.to_lowercase();
        if stage.contains("valid") {
            Self::Validation
        } else if stage.contains("test") {
            Self::Testing
        } else if stage.contains("train") || stage.contains("fit") {
            Self::Training
        } else {
            Self::Other
        }
    }
}

/// What a status bar shows for the current job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    /// Percentage in `0..=100`.
    pub progress: f64,
    pub stage: String,
    pub stage_kind: StageKind,
}

/// Combine the latest streamed record with the polled job.
///
/// The streamed record wins because it is fresher; the job's own
/// `progress`/`stage` fill in until the first record arrives. Only a
/// running job has progress.
pub fn resolve_progress(latest: Option<&ProgressRecord>, job: &Job) -> Option<JobProgress> {
    if job.status != JobStatus::Running {
        return None;
    }

    let progress = latest.map_or(job.progress, |r| r.progress).clamp(0.0, 100.0);
    let stage = latest
        .map(|r| r.stage.clone())
        .or_else(|| job.stage.clone())
        .unwrap_or_default();

    Some(JobProgress {
        progress,
        stage_kind: StageKind::classify(&stage),
        stage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::job;

    #[test]
    fn classify_stages() {
        assert_eq!(StageKind::classify("Validating"), StageKind::Validation);
        assert_eq!(StageKind::classify("test"), StageKind::Testing);
        assert_eq!(StageKind::classify("FIT"), StageKind::Training);
        assert_eq!(StageKind::classify("training"), StageKind::Training);
        assert_eq!(StageKind::classify("export"), StageKind::Other);
        // Contains both "train" and "valid"; validation is checked first.
        assert_eq!(StageKind::classify("train/validation"), StageKind::Validation);
    }

    #[test]
    fn streamed_record_wins() {
        let mut running = job("a", "p1", JobStatus::Running);
        running.progress = 10.0;
        running.stage = Some("fit".into());
        let record = ProgressRecord {
            progress: 55.0,
            stage: "validate".into(),
        };

        let view = resolve_progress(Some(&record), &running).unwrap();
        assert_eq!(view.progress, 55.0);
        assert_eq!(view.stage_kind, StageKind::Validation);
    }

    #[test]
    fn falls_back_to_polled_job() {
        let mut running = job("a", "p1", JobStatus::Running);
        running.progress = 120.0;
        running.stage = Some("fit".into());

        let view = resolve_progress(None, &running).unwrap();
        assert_eq!(view.progress, 100.0);
        assert_eq!(view.stage, "fit");
    }

    #[test]
    fn pending_job_has_no_progress() {
        let pending = job("a", "p1", JobStatus::Pending);
        assert!(resolve_progress(None, &pending).is_none());
    }
}
