//! Agent registry: liveness deadlines and capability sets.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use foreman_proto::{AgentAddr, AgentDescriptor, AgentMessage};

/// A registered agent.
#[derive(Debug)]
pub struct AgentEntry {
    /// Channel for messages addressed to the agent.
    pub mailbox: mpsc::Sender<AgentMessage>,
    /// Absolute time by which the next heartbeat must arrive.
    pub deadline: Instant,
    /// Worker types last reported with a work request. Empty until the agent
    /// first asks for work.
    pub worker_types: BTreeSet<String>,
    /// Task watching the agent's link for out-of-band disconnection.
    watch: JoinHandle<()>,
}

/// Tracks registered agents, their rolling heartbeat deadlines and their
/// capability sets.
///
/// Owned and mutated only by the engine task. Absence from the registry
/// means "not registered"; a present agent always has a deadline and a
/// (possibly empty) capability set.
#[derive(Debug)]
pub struct AgentRegistry {
    heartbeat_timeout: Duration,
    agents: HashMap<AgentAddr, AgentEntry>,
}

impl AgentRegistry {
    /// Creates an empty registry with the given heartbeat timeout.
    #[must_use]
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            heartbeat_timeout,
            agents: HashMap::new(),
        }
    }

    /// Returns true if the agent is registered.
    #[must_use]
    pub fn contains(&self, addr: &str) -> bool {
        self.agents.contains_key(addr)
    }

    /// Registers an unseen agent with a fresh deadline.
    ///
    /// The watch task is aborted when the agent is deregistered.
    pub fn register(
        &mut self,
        addr: impl Into<AgentAddr>,
        mailbox: mpsc::Sender<AgentMessage>,
        watch: JoinHandle<()>,
    ) {
        self.agents.insert(
            addr.into(),
            AgentEntry {
                mailbox,
                deadline: Instant::now() + self.heartbeat_timeout,
                worker_types: BTreeSet::new(),
                watch,
            },
        );
    }

    /// Rolls an agent's deadline forward to now + heartbeat timeout.
    ///
    /// Returns false for unregistered agents. A missed single heartbeat is
    /// tolerated: only deadline expiry deregisters.
    pub fn refresh(&mut self, addr: &str) -> bool {
        match self.agents.get_mut(addr) {
            Some(entry) => {
                entry.deadline = Instant::now() + self.heartbeat_timeout;
                true
            }
            None => false,
        }
    }

    /// Records the capability set reported with a work request. The
    /// last-reported set wins.
    pub fn record_capabilities(&mut self, addr: &str, worker_types: BTreeSet<String>) {
        if let Some(entry) = self.agents.get_mut(addr) {
            entry.worker_types = worker_types;
        }
    }

    /// An agent's last-recorded capability set.
    #[must_use]
    pub fn capabilities(&self, addr: &str) -> Option<&BTreeSet<String>> {
        self.agents.get(addr).map(|entry| &entry.worker_types)
    }

    /// Copies of every agent's capability set, for schedule validation.
    #[must_use]
    pub fn capability_map(&self) -> HashMap<AgentAddr, BTreeSet<String>> {
        self.agents
            .iter()
            .map(|(addr, entry)| (addr.clone(), entry.worker_types.clone()))
            .collect()
    }

    /// An agent's mailbox.
    #[must_use]
    pub fn mailbox(&self, addr: &str) -> Option<mpsc::Sender<AgentMessage>> {
        self.agents.get(addr).map(|entry| entry.mailbox.clone())
    }

    /// Iterates (address, mailbox) pairs of all live agents.
    pub fn mailboxes(&self) -> impl Iterator<Item = (&AgentAddr, &mpsc::Sender<AgentMessage>)> {
        self.agents.iter().map(|(addr, entry)| (addr, &entry.mailbox))
    }

    /// Agents whose deadline has passed as of `now`.
    ///
    /// Callers deregister each returned agent and run failure recovery; this
    /// is the periodic sweep, so detection latency is bounded by the sweep
    /// interval.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Vec<AgentAddr> {
        self.agents
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Removes an agent, aborting its disconnect watch.
    ///
    /// Idempotent: deregistering an unknown agent returns `None`.
    pub fn deregister(&mut self, addr: &str) -> Option<AgentEntry> {
        let entry = self.agents.remove(addr)?;
        entry.watch.abort();
        Some(entry)
    }

    /// Removes every agent, aborting all watches. Used at engine shutdown.
    pub fn clear(&mut self) {
        for entry in self.agents.values() {
            entry.watch.abort();
        }
        self.agents.clear();
    }

    /// Descriptors for every registered agent, for diagnostic summaries.
    #[must_use]
    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents
            .iter()
            .map(|(addr, entry)| AgentDescriptor {
                address: addr.clone(),
                worker_types: entry.worker_types.clone(),
            })
            .collect()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns true if no agents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
