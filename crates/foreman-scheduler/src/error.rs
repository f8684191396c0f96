//! Error types for the scheduler.

use thiserror::Error;

use foreman_proto::{AgentAddr, JobId};

/// Scheduler errors.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A proposed schedule assigned a job to an agent that cannot run it.
    /// Fatal to that dispatch attempt only; no state moves.
    #[error("schedule assigned job {job_id} ({worker_type}) to agent {agent}, which has no worker capable of running it")]
    ScheduleIntegrity {
        agent: AgentAddr,
        job_id: JobId,
        worker_type: String,
    },

    /// The configured backing store could not be constructed. Fatal at
    /// engine startup.
    #[error("backing store initialisation failed: {0}")]
    StoreInit(String),

    /// The scheduler engine has stopped and can no longer accept commands.
    #[error("scheduler engine is not running")]
    EngineStopped,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Valkey/Redis pool error.
    #[error("valkey error: {0}")]
    Valkey(#[from] deadpool_redis::PoolError),

    /// Redis command error.
    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
