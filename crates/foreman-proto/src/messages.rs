//! Scheduler protocol messages.
//!
//! These messages cross the scheduler boundary:
//!
//! - **Agent → Scheduler**: work requests, progress and failure reports
//! - **Scheduler → Agent**: registration acks, work advertisements, work
//!   assignments
//! - **Any → Scheduler**: diagnostic summary requests

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::job::Job;

/// Network address/path identifying an agent.
pub type AgentAddr = String;

/// Messages the scheduler sends to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentMessage {
    /// First-contact acknowledgement, carrying the heartbeat interval the
    /// agent should emit at.
    Registered {
        /// Expected heartbeat emission period, in milliseconds.
        heartbeat_interval_ms: u64,
    },
    /// Advertisement that unscheduled work exists for the named worker types.
    WorkAvailable(WorkAvailable),
    /// Jobs assigned to this agent (possibly empty).
    WorkResponse(WorkResponse),
}

/// Advertisement that work may be available.
///
/// Deliberately names only the worker types needed, not specific jobs:
/// assignment is the scheduling policy's decision, made when the agent asks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkAvailable {
    /// Worker types currently present on the unscheduled queue.
    pub worker_types: BTreeSet<String>,
}

impl WorkAvailable {
    /// Creates a work advertisement for the given worker types.
    #[must_use]
    pub const fn new(worker_types: BTreeSet<String>) -> Self {
        Self { worker_types }
    }
}

/// An agent's request for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    /// Worker types the agent can currently run. The last-reported set wins.
    pub worker_types: BTreeSet<String>,
    /// Maximum number of jobs the agent will accept, for policies that
    /// honour it.
    pub capacity: Option<u32>,
}

impl WorkRequest {
    /// Creates a work request for the given worker types.
    #[must_use]
    pub const fn new(worker_types: BTreeSet<String>) -> Self {
        Self {
            worker_types,
            capacity: None,
        }
    }

    /// Sets the job capacity for throttled scheduling.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// An ordered list of jobs assigned to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkResponse {
    /// Assigned jobs, in scheduling order. Empty when no work matched.
    pub jobs: Vec<Job>,
}

impl WorkResponse {
    /// Creates a response assigning the given jobs.
    #[must_use]
    pub const fn new(jobs: Vec<Job>) -> Self {
        Self { jobs }
    }

    /// Creates an empty response.
    #[must_use]
    pub const fn empty() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Returns true if no jobs were assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Terminal failure report for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailed {
    /// The failed job, with its last progress value intact.
    pub job: Job,
    /// Cause of the failure.
    pub error: String,
}

impl JobFailed {
    /// Creates a failure report.
    #[must_use]
    pub fn new(job: Job, error: impl Into<String>) -> Self {
        Self {
            job,
            error: error.into(),
        }
    }
}

/// A registered agent, as reported in diagnostic summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// The agent's address.
    pub address: AgentAddr,
    /// Worker types last reported by the agent.
    pub worker_types: BTreeSet<String>,
}

/// Reply to a list-agents diagnostic request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentSummary {
    /// All currently registered agents.
    pub agents: Vec<AgentDescriptor>,
}

/// Reply to a job-summary diagnostic request.
///
/// Carries every job the scheduler knows about: unscheduled, scheduled, and
/// (when a backing store is configured) completed and failed jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobSummary {
    /// Job snapshots.
    pub jobs: Vec<Job>,
}
