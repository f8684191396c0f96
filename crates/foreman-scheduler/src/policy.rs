//! Scheduling policies and the schedules they produce.

use std::collections::{BTreeSet, HashMap};

use foreman_proto::{AgentAddr, Job, WorkRequest, WorkResponse};

use crate::config::{PolicyConfig, PolicyKind};
use crate::error::{Result, SchedulerError};
use crate::queue::UnscheduledJobs;

/// An ephemeral agent → jobs assignment proposed for one work request.
///
/// Produced by a [`SchedulingPolicy`], validated and consumed immediately by
/// the dispatcher, never persisted.
#[derive(Debug, Default)]
pub struct Schedule {
    entries: Vec<(AgentAddr, WorkResponse)>,
}

impl Schedule {
    /// Creates an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns an ordered list of jobs to an agent.
    pub fn assign(&mut self, agent: impl Into<AgentAddr>, jobs: Vec<Job>) {
        self.entries.push((agent.into(), WorkResponse::new(jobs)));
    }

    /// The (agent, work-response) entries, in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(AgentAddr, WorkResponse)] {
        &self.entries
    }

    /// Returns true if no jobs are assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, response)| response.is_empty())
    }

    /// Checks every assignment against the agents' last-recorded
    /// capabilities.
    ///
    /// A single job assigned outside its agent's capability set fails the
    /// whole schedule with [`SchedulerError::ScheduleIntegrity`], guarding
    /// against a buggy policy. Runs fully before any dispatch mutation.
    pub fn validate(&self, capabilities: &HashMap<AgentAddr, BTreeSet<String>>) -> Result<()> {
        for (agent, response) in &self.entries {
            let known = capabilities.get(agent);
            for job in &response.jobs {
                let capable = known.is_some_and(|types| types.contains(&job.worker_type));
                if !capable {
                    return Err(SchedulerError::ScheduleIntegrity {
                        agent: agent.clone(),
                        job_id: job.id,
                        worker_type: job.worker_type.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Trait for scheduling policies.
///
/// Converts one eligible work request into a [`Schedule`], drawing only on
/// currently unscheduled jobs and only on worker types the requesting agent
/// reported. The engine never invokes the policy when no queued work matches
/// the request or while scheduling is paused.
pub trait SchedulingPolicy: Send {
    /// Proposes a schedule for a work request from the given agent.
    fn schedule(
        &mut self,
        agent: &str,
        request: &WorkRequest,
        unscheduled: &UnscheduledJobs,
    ) -> Schedule;

    /// Returns the policy name.
    fn name(&self) -> &'static str;
}

/// First-come-first-served policy.
///
/// Assigns every unscheduled job the requesting agent can run, in queue
/// order.
#[derive(Debug, Default)]
pub struct FifoPolicy;

impl FifoPolicy {
    /// Creates a new fifo policy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SchedulingPolicy for FifoPolicy {
    fn schedule(
        &mut self,
        agent: &str,
        request: &WorkRequest,
        unscheduled: &UnscheduledJobs,
    ) -> Schedule {
        let jobs: Vec<Job> = unscheduled
            .iter()
            .filter(|job| request.worker_types.contains(&job.worker_type))
            .cloned()
            .collect();

        let mut schedule = Schedule::new();
        if !jobs.is_empty() {
            schedule.assign(agent, jobs);
        }
        schedule
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}

/// Throttled policy.
///
/// Honours the work request's capacity field, assigning at most that many
/// matching jobs per request; requests naming no capacity fall back to the
/// configured default.
#[derive(Debug)]
pub struct ThrottledPolicy {
    default_capacity: u32,
}

impl ThrottledPolicy {
    /// Creates a throttled policy with the given default capacity.
    #[must_use]
    pub const fn new(default_capacity: u32) -> Self {
        Self { default_capacity }
    }
}

impl SchedulingPolicy for ThrottledPolicy {
    fn schedule(
        &mut self,
        agent: &str,
        request: &WorkRequest,
        unscheduled: &UnscheduledJobs,
    ) -> Schedule {
        let capacity = request.capacity.unwrap_or(self.default_capacity) as usize;
        let jobs: Vec<Job> = unscheduled
            .iter()
            .filter(|job| request.worker_types.contains(&job.worker_type))
            .take(capacity)
            .cloned()
            .collect();

        let mut schedule = Schedule::new();
        if !jobs.is_empty() {
            schedule.assign(agent, jobs);
        }
        schedule
    }

    fn name(&self) -> &'static str {
        "throttled"
    }
}

/// Resolves the configured policy at startup.
#[must_use]
pub fn build_policy(config: &PolicyConfig) -> Box<dyn SchedulingPolicy> {
    match config.kind {
        PolicyKind::Fifo => Box::new(FifoPolicy::new()),
        PolicyKind::Throttled => Box::new(ThrottledPolicy::new(config.throttle_capacity)),
    }
}
