//! Job queue partitions.
//!
//! A live job is owned by exactly one of two disjoint partitions: the
//! [`UnscheduledJobs`] queue of work awaiting assignment, or one agent's
//! entry in the [`ScheduledJobs`] map. Completed and failed jobs leave both
//! (the backing store, if configured, keeps their history).
//!
//! Both partitions are owned and mutated only by the engine task, so plain
//! collections suffice and no locks are needed.

use std::collections::{BTreeSet, HashMap, VecDeque};

use foreman_proto::{AgentAddr, Job, JobId};

/// Jobs awaiting assignment, in arrival order.
///
/// Keeps a refcounted index of the worker types currently present, so
/// "is there work this agent can do?" is answered in O(types), not O(jobs).
#[derive(Debug, Default)]
pub struct UnscheduledJobs {
    jobs: VecDeque<Job>,
    type_index: HashMap<String, usize>,
}

impl UnscheduledJobs {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a job and updates the worker-type index.
    pub fn enqueue(&mut self, job: Job) {
        *self.type_index.entry(job.worker_type.clone()).or_insert(0) += 1;
        self.jobs.push_back(job);
    }

    /// Returns true if any queued job's worker type is in the given set.
    #[must_use]
    pub fn has_work_for(&self, worker_types: &BTreeSet<String>) -> bool {
        worker_types.iter().any(|t| self.type_index.contains_key(t))
    }

    /// The set of worker types currently present on the queue.
    #[must_use]
    pub fn worker_types(&self) -> BTreeSet<String> {
        self.type_index.keys().cloned().collect()
    }

    /// Removes the given jobs (by identifier) from the queue.
    pub fn remove(&mut self, jobs: &[Job]) {
        for job in jobs {
            let before = self.jobs.len();
            self.jobs.retain(|queued| queued.id != job.id);
            if self.jobs.len() < before {
                self.unindex(&job.worker_type);
            }
        }
    }

    fn unindex(&mut self, worker_type: &str) {
        if let Some(count) = self.type_index.get_mut(worker_type) {
            *count -= 1;
            if *count == 0 {
                self.type_index.remove(worker_type);
            }
        }
    }

    /// Iterates queued jobs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Copies of all queued jobs, in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.iter().cloned().collect()
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if no jobs are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Jobs currently assigned to agents.
///
/// A job identifier appears in at most one agent's list at any instant.
#[derive(Debug, Default)]
pub struct ScheduledJobs {
    by_agent: HashMap<AgentAddr, Vec<Job>>,
}

impl ScheduledJobs {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records jobs as assigned to an agent, preserving assignment order.
    pub fn assign(&mut self, agent: &str, jobs: Vec<Job>) {
        self.by_agent.entry(agent.to_owned()).or_default().extend(jobs);
    }

    /// Overwrites the stored copy of a job within an agent's set.
    ///
    /// Returns false if the agent or job is unknown, which the caller treats
    /// as a stale report.
    pub fn update(&mut self, job: Job, agent: &str) -> bool {
        let Some(jobs) = self.by_agent.get_mut(agent) else {
            return false;
        };
        match jobs.iter_mut().find(|stored| stored.id == job.id) {
            Some(stored) => {
                *stored = job;
                true
            }
            None => false,
        }
    }

    /// Removes one job from an agent's set.
    pub fn remove(&mut self, job_id: JobId, agent: &str) -> Option<Job> {
        let jobs = self.by_agent.get_mut(agent)?;
        let index = jobs.iter().position(|stored| stored.id == job_id)?;
        let removed = jobs.remove(index);
        if jobs.is_empty() {
            self.by_agent.remove(agent);
        }
        Some(removed)
    }

    /// Removes and returns every job assigned to an agent, in order.
    pub fn drain_agent(&mut self, agent: &str) -> Vec<Job> {
        self.by_agent.remove(agent).unwrap_or_default()
    }

    /// Jobs currently assigned to an agent.
    #[must_use]
    pub fn jobs_for(&self, agent: &str) -> &[Job] {
        self.by_agent.get(agent).map_or(&[], Vec::as_slice)
    }

    /// Copies of all scheduled jobs across every agent.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Job> {
        self.by_agent.values().flatten().cloned().collect()
    }

    /// Total number of scheduled jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_agent.values().map(Vec::len).sum()
    }

    /// Returns true if no jobs are scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_agent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn job(id: JobId, worker_type: &str) -> Job {
        Job::new(id, worker_type, BTreeMap::new())
    }

    fn types(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn index_tracks_enqueue_and_remove() {
        let mut queue = UnscheduledJobs::new();
        queue.enqueue(job(1, "echo"));
        queue.enqueue(job(2, "echo"));
        queue.enqueue(job(3, "video"));

        assert!(queue.has_work_for(&types(&["echo"])));
        assert!(queue.has_work_for(&types(&["video", "audio"])));
        assert!(!queue.has_work_for(&types(&["audio"])));

        queue.remove(&[job(1, "echo")]);
        assert!(queue.has_work_for(&types(&["echo"])));

        queue.remove(&[job(2, "echo")]);
        assert!(!queue.has_work_for(&types(&["echo"])));
        assert_eq!(queue.worker_types(), types(&["video"]));
    }

    #[test]
    fn remove_unknown_job_leaves_index_intact() {
        let mut queue = UnscheduledJobs::new();
        queue.enqueue(job(1, "echo"));

        queue.remove(&[job(99, "echo")]);
        assert_eq!(queue.len(), 1);
        assert!(queue.has_work_for(&types(&["echo"])));
    }

    #[test]
    fn queue_preserves_arrival_order() {
        let mut queue = UnscheduledJobs::new();
        for id in 1..=4 {
            queue.enqueue(job(id, "echo"));
        }
        let ids: Vec<JobId> = queue.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn scheduled_update_overwrites_stored_copy() {
        let mut scheduled = ScheduledJobs::new();
        scheduled.assign("agent-1", vec![job(1, "echo")]);

        let mut progressed = job(1, "echo");
        progressed.progress = 0.5;
        assert!(scheduled.update(progressed, "agent-1"));
        assert_eq!(scheduled.jobs_for("agent-1")[0].progress, 0.5);

        // Unknown job or agent is reported as stale
        assert!(!scheduled.update(job(2, "echo"), "agent-1"));
        assert!(!scheduled.update(job(1, "echo"), "agent-2"));
    }

    #[test]
    fn remove_last_job_drops_agent_entry() {
        let mut scheduled = ScheduledJobs::new();
        scheduled.assign("agent-1", vec![job(1, "echo")]);

        assert!(scheduled.remove(1, "agent-1").is_some());
        assert!(scheduled.is_empty());
        assert!(scheduled.remove(1, "agent-1").is_none());
    }

    #[test]
    fn drain_agent_returns_jobs_in_assignment_order() {
        let mut scheduled = ScheduledJobs::new();
        scheduled.assign("agent-1", vec![job(1, "echo"), job(2, "echo")]);
        scheduled.assign("agent-1", vec![job(3, "echo")]);
        scheduled.assign("agent-2", vec![job(4, "echo")]);

        let drained = scheduled.drain_agent("agent-1");
        assert_eq!(drained.iter().map(|j| j.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(scheduled.len(), 1);

        assert!(scheduled.drain_agent("agent-1").is_empty());
    }

    #[test]
    fn single_ownership_across_partitions() {
        let mut queue = UnscheduledJobs::new();
        let mut scheduled = ScheduledJobs::new();

        let assigned = job(1, "echo");
        queue.enqueue(assigned.clone());

        // The dispatch move: out of unscheduled, into an agent's set
        queue.remove(std::slice::from_ref(&assigned));
        scheduled.assign("agent-1", vec![assigned]);

        let in_queue = queue.iter().filter(|j| j.id == 1).count();
        let in_scheduled = scheduled.snapshot().iter().filter(|j| j.id == 1).count();
        assert_eq!(in_queue + in_scheduled, 1);
    }
}
