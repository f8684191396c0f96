//! Common test utilities for scheduler integration tests.

// Each integration binary compiles this module separately and uses a
// different subset of the helpers.
#![allow(dead_code)]

pub mod fixtures;

use foreman_scheduler::{
    build_policy,
    config::{PolicyConfig, PolicyKind, TimingConfig},
    engine::{SchedulerEngine, SchedulerHandle},
    events::SchedulerEvent,
    policy::SchedulingPolicy,
};
use std::time::Duration;
use tokio::sync::broadcast;

/// A running scheduler engine plus the handle for driving it.
pub struct TestScheduler {
    pub handle: SchedulerHandle,
}

impl TestScheduler {
    /// Creates a scheduler with default timing and the FIFO policy.
    pub fn new() -> Self {
        Self::with_parts(TimingConfig::default(), build_policy(&PolicyConfig::default()))
    }

    /// Creates a scheduler with short timers for time-sensitive tests:
    /// fast broadcast debounce and retry, and a 200ms heartbeat timeout.
    pub fn with_fast_timers() -> Self {
        Self::with_parts(fast_timing(), build_policy(&PolicyConfig::default()))
    }

    /// Creates a scheduler with fast timers and a custom policy.
    pub fn with_policy(policy: Box<dyn SchedulingPolicy>) -> Self {
        Self::with_parts(fast_timing(), policy)
    }

    /// Creates a scheduler with fast timers and the throttled policy.
    pub fn with_throttled_policy(capacity: u32) -> Self {
        let config = PolicyConfig {
            kind: PolicyKind::Throttled,
            throttle_capacity: capacity,
        };
        Self::with_parts(fast_timing(), build_policy(&config))
    }

    fn with_parts(timing: TimingConfig, policy: Box<dyn SchedulingPolicy>) -> Self {
        let (engine, handle) = SchedulerEngine::new(timing, policy, None);
        tokio::spawn(engine.run());
        Self { handle }
    }

    /// Subscribes to the engine's lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.handle.subscribe_events()
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn fast_timing() -> TimingConfig {
    TimingConfig {
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_millis(200),
        liveness_sweep_interval: Duration::from_millis(50),
        broadcast_quiescence: Duration::from_millis(20),
        broadcast_retry: Duration::from_millis(100),
    }
}

/// Waits up to a second for an event matching the predicate, skipping others.
pub async fn expect_event(
    rx: &mut broadcast::Receiver<SchedulerEvent>,
    matches: impl Fn(&SchedulerEvent) -> bool,
) -> SchedulerEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(1), wait)
        .await
        .expect("timed out waiting for event")
}
