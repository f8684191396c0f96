//! Test fixtures for scheduler integration tests.

use foreman_proto::{AgentMessage, WorkAvailable, WorkRequest, WorkResponse};
use foreman_scheduler::engine::SchedulerHandle;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// A simulated agent: an address plus the mailbox the scheduler posts to.
///
/// Dropping the fixture closes the mailbox, which the scheduler observes as
/// an agent disconnect.
pub struct TestAgent {
    pub addr: String,
    tx: mpsc::Sender<AgentMessage>,
    rx: mpsc::Receiver<AgentMessage>,
}

impl TestAgent {
    pub fn new(addr: &str) -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self {
            addr: addr.to_string(),
            tx,
            rx,
        }
    }

    /// A sender for the agent's mailbox, as passed along with each message.
    pub fn mailbox(&self) -> mpsc::Sender<AgentMessage> {
        self.tx.clone()
    }

    /// Sends a heartbeat on behalf of this agent.
    pub async fn heartbeat(&self, scheduler: &SchedulerHandle) {
        scheduler
            .heartbeat(&self.addr, self.mailbox())
            .await
            .expect("engine stopped");
    }

    /// Requests work for the given worker types.
    pub async fn request_work(&self, scheduler: &SchedulerHandle, worker_types: &[&str]) {
        self.send_request(scheduler, WorkRequest::new(worker_type_set(worker_types)))
            .await;
    }

    /// Requests work with an explicit capacity hint.
    pub async fn request_work_with_capacity(
        &self,
        scheduler: &SchedulerHandle,
        worker_types: &[&str],
        capacity: u32,
    ) {
        let request = WorkRequest::new(worker_type_set(worker_types)).with_capacity(capacity);
        self.send_request(scheduler, request).await;
    }

    async fn send_request(&self, scheduler: &SchedulerHandle, request: WorkRequest) {
        scheduler
            .request_work(&self.addr, self.mailbox(), request)
            .await
            .expect("engine stopped");
    }

    /// Receives the next mailbox message, failing the test after a second.
    pub async fn next_message(&mut self) -> AgentMessage {
        timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .unwrap_or_else(|_| panic!("agent {} timed out waiting for a message", self.addr))
            .expect("agent mailbox closed")
    }

    /// Expects the first-contact registration acknowledgement.
    pub async fn expect_registered(&mut self) -> u64 {
        match self.next_message().await {
            AgentMessage::Registered {
                heartbeat_interval_ms,
            } => heartbeat_interval_ms,
            other => panic!("expected Registered, got {other:?}"),
        }
    }

    /// Expects a work-available broadcast.
    pub async fn expect_work_available(&mut self) -> WorkAvailable {
        match self.next_message().await {
            AgentMessage::WorkAvailable(notice) => notice,
            other => panic!("expected WorkAvailable, got {other:?}"),
        }
    }

    /// Expects a work response, skipping any broadcast notices that the
    /// retry timer interleaves.
    pub async fn expect_work_response(&mut self) -> WorkResponse {
        loop {
            match self.next_message().await {
                AgentMessage::WorkResponse(response) => return response,
                AgentMessage::WorkAvailable(_) => continue,
                other => panic!("expected WorkResponse, got {other:?}"),
            }
        }
    }

    /// Asserts that no work response arrives within the given window.
    /// Broadcast notices are ignored.
    pub async fn expect_no_work_response(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, self.rx.recv()).await {
                Err(_) => return,
                Ok(Some(AgentMessage::WorkResponse(response))) => {
                    panic!("unexpected work response: {response:?}")
                }
                Ok(Some(_)) => continue,
                Ok(None) => panic!("agent mailbox closed"),
            }
        }
    }

    /// Asserts that no broadcast notice arrives within the given window.
    pub async fn expect_no_broadcast(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, self.rx.recv()).await {
                Err(_) => return,
                Ok(Some(AgentMessage::WorkAvailable(notice))) => {
                    panic!("unexpected broadcast: {notice:?}")
                }
                Ok(Some(_)) => continue,
                Ok(None) => panic!("agent mailbox closed"),
            }
        }
    }
}

/// Builds a worker-type set from string literals.
pub fn worker_type_set(worker_types: &[&str]) -> BTreeSet<String> {
    worker_types.iter().map(ToString::to_string).collect()
}

/// Builds a parameter map from string pairs.
pub fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
