//! Job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique job identifier, assigned monotonically at creation.
pub type JobId = u64;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Awaiting assignment to an agent.
    Queued,
    /// Assigned and making progress on an agent.
    Running,
    /// Finished successfully.
    Complete,
    /// Terminated with an error.
    Failed,
}

impl JobState {
    /// Returns true if no further state transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// A unit of work.
///
/// Invariant: `progress == 1.0` exactly when `state == Complete`. A failed
/// job keeps its last progress value for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Name of the worker capability required to run this job.
    pub worker_type: String,
    /// String parameters, immutable after creation.
    pub params: BTreeMap<String, String>,
    /// Current lifecycle state.
    pub state: JobState,
    /// Completion fraction in `[0.0, 1.0]`.
    pub progress: f64,
    /// Creation time.
    pub enqueued_at: DateTime<Utc>,
    /// Cause of failure, set when `state == Failed`.
    pub error: Option<String>,
}

impl Job {
    /// Creates a new queued job.
    #[must_use]
    pub fn new(id: JobId, worker_type: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        Self {
            id,
            worker_type: worker_type.into(),
            params,
            state: JobState::Queued,
            progress: 0.0,
            enqueued_at: Utc::now(),
            error: None,
        }
    }

    /// Returns true if the job has reached full progress.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        (self.progress - 1.0).abs() < f64::EPSILON
    }

    /// Returns a copy with progress and state reset for re-queueing.
    #[must_use]
    pub fn reset(mut self) -> Self {
        self.state = JobState::Queued;
        self.progress = 0.0;
        self
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job {} ({})", self.id, self.worker_type)
    }
}
