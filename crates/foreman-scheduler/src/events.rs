//! Lifecycle event stream.
//!
//! The engine publishes lifecycle events on a broadcast channel so external
//! observers (diagnostics, metrics, tests) can watch agent and job activity
//! without being coupled to the engine's internals.

use tokio::sync::broadcast;

use foreman_proto::{AgentAddr, Job};
use std::collections::BTreeSet;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events published by the scheduler engine.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// An unseen agent sent its first heartbeat or work request.
    AgentStarted { addr: AgentAddr },
    /// An agent was deregistered (shutdown or liveness loss).
    AgentStopped { addr: AgentAddr },
    /// An agent's heartbeat deadline lapsed; recovery ran for it.
    AgentDead { addr: AgentAddr },
    /// A job was accepted onto the unscheduled queue.
    JobEnqueued(Job),
    /// A job's stored progress changed (including recovery rollbacks to
    /// queued/zero).
    JobProgressed(Job),
    /// An agent reported terminal failure for a job.
    JobFailed(Job),
    /// A work-available notice went out to every live agent.
    WorkBroadcast {
        worker_types: BTreeSet<String>,
        agents: usize,
    },
}

/// Handle for publishing and subscribing to [`SchedulerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    /// Creates a new event bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SchedulerEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
