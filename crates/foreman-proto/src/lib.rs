//! Message and data types exchanged across the foreman scheduler boundary.
//!
//! The scheduler coordinates a pool of remote agents that execute typed,
//! stateful jobs. This crate holds the vocabulary shared by clients, agents
//! and the scheduler:
//!
//! - **Jobs**: units of work with a worker type, parameters, state and
//!   progress ([`Job`], [`JobState`])
//! - **Agent → Scheduler**: heartbeats, work requests, progress and failure
//!   reports ([`WorkRequest`], [`JobFailed`])
//! - **Scheduler → Agent**: registration acks, work advertisements and work
//!   assignments ([`AgentMessage`], [`WorkAvailable`], [`WorkResponse`])
//! - **Diagnostics**: agent and job summaries ([`AgentSummary`],
//!   [`JobSummary`])
//!
//! Every message carries value copies of jobs, never references into the
//! scheduler's own queues, so recipients cannot mutate the scheduler's
//! authoritative records.

mod job;
mod messages;

pub use job::{Job, JobId, JobState};
pub use messages::{
    AgentAddr, AgentDescriptor, AgentMessage, AgentSummary, JobFailed, JobSummary, WorkAvailable,
    WorkRequest, WorkResponse,
};
