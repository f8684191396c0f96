//! Foreman scheduler - agent membership, job queueing, and work dispatch.
//!
//! The scheduler is responsible for:
//!
//! - **Agent membership**: Tracking live agents via heartbeats and detecting
//!   silent failures with a periodic liveness sweep
//! - **Job queueing**: Holding submitted jobs until a capable agent asks for
//!   them, in strict submission order per worker type
//! - **Work dispatch**: Consulting a pluggable scheduling policy and handing
//!   the chosen jobs to exactly one agent each
//! - **Failure recovery**: Re-queueing jobs orphaned by a dead or departed
//!   agent so no submitted job is lost
//!
//! # Architecture
//!
//! All scheduler state lives inside a single engine task; everything else
//! talks to it through a [`SchedulerHandle`] over a command channel. Agents
//! pull work: the engine only ever advertises that work exists (debounced
//! after submissions, retried on a timer) and agents respond with requests
//! carrying their current capabilities. Job history can optionally be
//! mirrored to a backing store, written fire-and-forget off the engine task.
//!
//! # Example
//!
//! ```ignore
//! use foreman_scheduler::{build_policy, PolicyConfig, SchedulerEngine, TimingConfig};
//!
//! let policy = build_policy(&PolicyConfig::default());
//! let (engine, handle) = SchedulerEngine::new(TimingConfig::default(), policy, None);
//! tokio::spawn(engine.run());
//! let job = handle.submit_job("video-encode", Default::default()).await?;
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod store;

// Re-export main types
pub use config::{PolicyConfig, PolicyKind, SchedulerConfig, StoreConfig, StoreKind, TimingConfig};
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use events::{EventBus, SchedulerEvent};
pub use policy::{build_policy, FifoPolicy, Schedule, SchedulingPolicy, ThrottledPolicy};
pub use queue::{ScheduledJobs, UnscheduledJobs};
pub use registry::AgentRegistry;
pub use store::{build_store, BackingStore, MemoryBackingStore, ValkeyBackingStore};
