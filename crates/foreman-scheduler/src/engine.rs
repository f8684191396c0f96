//! The scheduler engine.
//!
//! A single task owns every piece of scheduler state (the agent registry,
//! both job-queue partitions, the pause flag and the broadcast timers) and
//! mutates it only from the command loop in [`SchedulerEngine::run`].
//! Handlers run to completion, one at a time, in arrival order; nothing in a
//! handler awaits. Timers and the backing store re-enter the same command
//! queue or run in spawned tasks, so the loop is never stalled by storage or
//! slow agents and the core data structures need no locks.
//!
//! Clients and agents talk to the engine through a [`SchedulerHandle`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use foreman_proto::{
    AgentAddr, AgentMessage, AgentSummary, Job, JobFailed, JobState, JobSummary, WorkAvailable,
    WorkRequest, WorkResponse,
};

use crate::config::TimingConfig;
use crate::error::{Result, SchedulerError};
use crate::events::{EventBus, SchedulerEvent};
use crate::policy::{Schedule, SchedulingPolicy};
use crate::queue::{ScheduledJobs, UnscheduledJobs};
use crate::registry::AgentRegistry;
use crate::store::BackingStore;

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Commands processed by the engine loop.
enum Command {
    SubmitJob {
        worker_type: String,
        params: BTreeMap<String, String>,
        reply: oneshot::Sender<Job>,
    },
    Heartbeat {
        addr: AgentAddr,
        mailbox: mpsc::Sender<AgentMessage>,
    },
    RequestWork {
        addr: AgentAddr,
        mailbox: mpsc::Sender<AgentMessage>,
        request: WorkRequest,
    },
    ReportProgress {
        addr: AgentAddr,
        job: Job,
    },
    ReportFailure {
        addr: AgentAddr,
        failure: JobFailed,
    },
    AgentDisconnected {
        addr: AgentAddr,
    },
    CheckAgents,
    Broadcast,
    GetJobSummary {
        reply: oneshot::Sender<JobSummary>,
    },
    GetAgentSummary {
        reply: oneshot::Sender<AgentSummary>,
    },
    Pause,
    Resume,
    Shutdown,
}

/// Clonable handle for sending commands to a running engine.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    events: EventBus,
}

impl SchedulerHandle {
    /// Submits a new job, returning the fully formed record with its
    /// assigned identifier.
    pub async fn submit_job(
        &self,
        worker_type: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Result<Job> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitJob {
            worker_type: worker_type.into(),
            params,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::EngineStopped)
    }

    /// Delivers an agent heartbeat. Implicitly registers unseen agents.
    pub async fn heartbeat(
        &self,
        addr: impl Into<AgentAddr>,
        mailbox: mpsc::Sender<AgentMessage>,
    ) -> Result<()> {
        self.send(Command::Heartbeat {
            addr: addr.into(),
            mailbox,
        })
        .await
    }

    /// Delivers an agent's work request. The reply arrives on the agent's
    /// mailbox as a [`WorkResponse`].
    pub async fn request_work(
        &self,
        addr: impl Into<AgentAddr>,
        mailbox: mpsc::Sender<AgentMessage>,
        request: WorkRequest,
    ) -> Result<()> {
        self.send(Command::RequestWork {
            addr: addr.into(),
            mailbox,
            request,
        })
        .await
    }

    /// Delivers a job progress report from an agent.
    pub async fn report_progress(&self, addr: impl Into<AgentAddr>, job: Job) -> Result<()> {
        self.send(Command::ReportProgress {
            addr: addr.into(),
            job,
        })
        .await
    }

    /// Delivers a terminal job failure report from an agent.
    pub async fn report_failure(
        &self,
        addr: impl Into<AgentAddr>,
        failure: JobFailed,
    ) -> Result<()> {
        self.send(Command::ReportFailure {
            addr: addr.into(),
            failure,
        })
        .await
    }

    /// Delivers an out-of-band notice that an agent's link dropped.
    pub async fn agent_disconnected(&self, addr: impl Into<AgentAddr>) -> Result<()> {
        self.send(Command::AgentDisconnected { addr: addr.into() }).await
    }

    /// Snapshot of every job the scheduler knows about.
    pub async fn job_summary(&self) -> Result<JobSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetJobSummary { reply }).await?;
        rx.await.map_err(|_| SchedulerError::EngineStopped)
    }

    /// Snapshot of every registered agent.
    pub async fn agent_summary(&self) -> Result<AgentSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetAgentSummary { reply }).await?;
        rx.await.map_err(|_| SchedulerError::EngineStopped)
    }

    /// Pauses scheduling: work requests get empty responses and broadcasts
    /// are suppressed, while heartbeats and reports keep flowing.
    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    /// Resumes scheduling.
    pub async fn resume(&self) -> Result<()> {
        self.send(Command::Resume).await
    }

    /// Stops the engine loop.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Subscribes to the engine's lifecycle event stream.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SchedulerError::EngineStopped)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SubmitJob { .. } => "SubmitJob",
            Self::Heartbeat { .. } => "Heartbeat",
            Self::RequestWork { .. } => "RequestWork",
            Self::ReportProgress { .. } => "ReportProgress",
            Self::ReportFailure { .. } => "ReportFailure",
            Self::AgentDisconnected { .. } => "AgentDisconnected",
            Self::CheckAgents => "CheckAgents",
            Self::Broadcast => "Broadcast",
            Self::GetJobSummary { .. } => "GetJobSummary",
            Self::GetAgentSummary { .. } => "GetAgentSummary",
            Self::Pause => "Pause",
            Self::Resume => "Resume",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// The scheduler engine. Construct with [`SchedulerEngine::new`], then drive
/// it by awaiting [`SchedulerEngine::run`] (usually in a spawned task).
pub struct SchedulerEngine {
    rx: mpsc::Receiver<Command>,
    tx: mpsc::Sender<Command>,
    timing: TimingConfig,
    registry: AgentRegistry,
    unscheduled: UnscheduledJobs,
    scheduled: ScheduledJobs,
    policy: Box<dyn SchedulingPolicy>,
    store: Option<Arc<dyn BackingStore>>,
    events: EventBus,
    paused: bool,
    next_job_id: u64,
    broadcast_timer: Option<JoinHandle<()>>,
}

impl SchedulerEngine {
    /// Creates an engine and the handle for talking to it.
    #[must_use]
    pub fn new(
        timing: TimingConfig,
        policy: Box<dyn SchedulingPolicy>,
        store: Option<Arc<dyn BackingStore>>,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let events = EventBus::new();
        let handle = SchedulerHandle {
            tx: tx.clone(),
            events: events.clone(),
        };

        let engine = Self {
            rx,
            tx,
            registry: AgentRegistry::new(timing.heartbeat_timeout),
            timing,
            unscheduled: UnscheduledJobs::new(),
            scheduled: ScheduledJobs::new(),
            policy,
            store,
            events,
            paused: false,
            next_job_id: 1,
            broadcast_timer: None,
        };
        (engine, handle)
    }

    /// Runs the command loop until shutdown.
    pub async fn run(mut self) {
        info!(
            policy = self.policy.name(),
            store = self.store.is_some(),
            "scheduler engine running"
        );

        let sweep = self.spawn_liveness_sweep();

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::SubmitJob {
                    worker_type,
                    params,
                    reply,
                } => self.handle_submit(worker_type, params, reply),
                Command::Heartbeat { addr, mailbox } => {
                    debug!(agent = %addr, "heartbeat");
                    self.register_or_refresh(&addr, &mailbox);
                }
                Command::RequestWork {
                    addr,
                    mailbox,
                    request,
                } => self.handle_request_work(addr, mailbox, request),
                Command::ReportProgress { addr, job } => self.handle_progress(&addr, job),
                Command::ReportFailure { addr, failure } => {
                    self.handle_failure(&addr, failure);
                }
                Command::AgentDisconnected { addr } => self.handle_disconnected(&addr),
                Command::CheckAgents => self.handle_check_agents(),
                Command::Broadcast => self.broadcast_now(),
                Command::GetJobSummary { reply } => self.handle_job_summary(reply),
                Command::GetAgentSummary { reply } => {
                    let _ = reply.send(AgentSummary {
                        agents: self.registry.descriptors(),
                    });
                }
                Command::Pause => {
                    info!("scheduling paused");
                    self.paused = true;
                }
                Command::Resume => {
                    info!("scheduling resumed");
                    self.paused = false;
                    self.broadcast_now();
                }
                Command::Shutdown => break,
            }
        }

        sweep.abort();
        if let Some(timer) = self.broadcast_timer.take() {
            timer.abort();
        }
        self.registry.clear();
        info!("scheduler engine shut down");
    }

    fn spawn_liveness_sweep(&self) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let period = self.timing.liveness_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // interval fires immediately; the first sweep comes one period in
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(Command::CheckAgents).await.is_err() {
                    break;
                }
            }
        })
    }

    fn handle_submit(
        &mut self,
        worker_type: String,
        params: BTreeMap<String, String>,
        reply: oneshot::Sender<Job>,
    ) {
        let job = Job::new(self.next_job_id, worker_type, params);
        self.next_job_id += 1;
        debug!(%job, "accepted job submission");

        self.persist_progress(&job);
        self.events.publish(SchedulerEvent::JobEnqueued(job.clone()));
        self.unscheduled.enqueue(job.clone());
        let _ = reply.send(job);

        // Debounce: coalesce bursts of submissions into one broadcast
        self.arm_broadcast_timer(self.timing.broadcast_quiescence);
    }

    /// Registers an agent on first contact, rolling its deadline either way.
    fn register_or_refresh(&mut self, addr: &AgentAddr, mailbox: &mpsc::Sender<AgentMessage>) {
        if !self.registry.contains(addr) {
            let watch = self.spawn_disconnect_watch(addr.clone(), mailbox.clone());
            self.registry.register(addr.clone(), mailbox.clone(), watch);
            info!(agent = %addr, "registered agent");
            self.events.publish(SchedulerEvent::AgentStarted { addr: addr.clone() });

            let interval_ms =
                u64::try_from(self.timing.heartbeat_interval.as_millis()).unwrap_or(u64::MAX);
            self.post(
                mailbox.clone(),
                AgentMessage::Registered {
                    heartbeat_interval_ms: interval_ms,
                },
            );
        }
        self.registry.refresh(addr);
    }

    /// Watches the agent's mailbox for closure and injects a disconnect
    /// notice into the command queue. This is the out-of-band death
    /// notification.
    fn spawn_disconnect_watch(
        &self,
        addr: AgentAddr,
        mailbox: mpsc::Sender<AgentMessage>,
    ) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            mailbox.closed().await;
            let _ = tx.send(Command::AgentDisconnected { addr }).await;
        })
    }

    fn handle_request_work(
        &mut self,
        addr: AgentAddr,
        mailbox: mpsc::Sender<AgentMessage>,
        request: WorkRequest,
    ) {
        debug!(agent = %addr, worker_types = ?request.worker_types, "work request");
        self.register_or_refresh(&addr, &mailbox);
        self.registry.record_capabilities(&addr, request.worker_types.clone());

        // The policy is only consulted for eligible requests
        if self.paused || !self.unscheduled.has_work_for(&request.worker_types) {
            self.post(mailbox, AgentMessage::WorkResponse(WorkResponse::empty()));
            return;
        }

        let schedule = self.policy.schedule(&addr, &request, &self.unscheduled);
        if schedule.is_empty() {
            self.post(mailbox, AgentMessage::WorkResponse(WorkResponse::empty()));
            return;
        }

        if let Err(e) = self.dispatch(&schedule) {
            // Fatal to this dispatch attempt only; no state has moved
            error!(error = %e, agent = %addr, "discarding invalid schedule");
        }
    }

    /// Applies a validated schedule: moves jobs out of unscheduled, records
    /// them against their agents and notifies each agent exactly once.
    fn dispatch(&mut self, schedule: &Schedule) -> Result<()> {
        schedule.validate(&self.registry.capability_map())?;

        for (agent, response) in schedule.entries() {
            self.unscheduled.remove(&response.jobs);
            self.scheduled.assign(agent, response.jobs.clone());

            if let Some(mailbox) = self.registry.mailbox(agent) {
                self.post(mailbox, AgentMessage::WorkResponse(response.clone()));
            }
            info!(agent = %agent, jobs = response.jobs.len(), "dispatched work");
        }
        Ok(())
    }

    fn handle_progress(&mut self, addr: &str, mut job: Job) {
        debug!(%job, progress = job.progress, "progress report");

        if job.is_complete() {
            // Completion is terminal: drop it from the agent's scheduled set
            job.state = JobState::Complete;
            debug!(%job, "job complete");
            self.scheduled.remove(job.id, addr);
        } else if job.state != JobState::Queued
            && !self.scheduled.update(job.clone(), addr)
        {
            warn!(%job, agent = %addr, "progress report for a job not scheduled to this agent");
        }

        self.persist_progress(&job);
        self.events.publish(SchedulerEvent::JobProgressed(job));
    }

    fn handle_failure(&mut self, addr: &str, failure: JobFailed) {
        let JobFailed { mut job, error: cause } = failure;
        job.state = JobState::Failed;
        job.error = Some(cause.clone());
        error!(%job, error = %cause, "job failed");

        self.persist_failure(&job);
        self.scheduled.remove(job.id, addr);
        self.events.publish(SchedulerEvent::JobFailed(job));
    }

    fn handle_check_agents(&mut self) {
        debug!("checking for dead agents");
        for addr in self.registry.expired(Instant::now()) {
            error!(agent = %addr, "found a dead agent");
            self.events.publish(SchedulerEvent::AgentDead { addr: addr.clone() });
            self.recover(&addr);
        }
    }

    fn handle_disconnected(&mut self, addr: &str) {
        if !self.registry.contains(addr) {
            debug!(agent = %addr, "disconnect notice for unregistered agent");
            return;
        }
        info!(agent = %addr, "agent has shut down");
        self.recover(addr);
    }

    /// Failure recovery: deregister the agent, roll its in-flight jobs back
    /// onto the unscheduled queue, and tell everyone else right away.
    ///
    /// A job the agent already completed is absent from its scheduled set
    /// and is untouched; every job drained here is re-enqueued before the
    /// handler returns, so none is lost.
    fn recover(&mut self, addr: &str) {
        if self.registry.deregister(addr).is_some() {
            self.events.publish(SchedulerEvent::AgentStopped {
                addr: addr.to_owned(),
            });
        }

        let orphaned = self.scheduled.drain_agent(addr);
        for job in orphaned {
            let job = job.reset();
            info!(%job, agent = %addr, "re-queueing orphaned job");
            self.persist_progress(&job);
            self.events.publish(SchedulerEvent::JobProgressed(job.clone()));
            self.unscheduled.enqueue(job);
        }

        // Immediate path, not the debounce: waiting agents hear about the
        // re-queued work without delay
        self.broadcast_now();
    }

    /// Sends a work-available notice to every live agent, then re-arms the
    /// retry timer while unscheduled work remains.
    fn broadcast_now(&mut self) {
        if self.registry.is_empty() || self.unscheduled.is_empty() || self.paused {
            return;
        }

        let notice = WorkAvailable::new(self.unscheduled.worker_types());
        debug!(agents = self.registry.len(), worker_types = ?notice.worker_types, "broadcasting work");
        for (_, mailbox) in self.registry.mailboxes() {
            self.post(mailbox.clone(), AgentMessage::WorkAvailable(notice.clone()));
        }
        self.events.publish(SchedulerEvent::WorkBroadcast {
            worker_types: notice.worker_types,
            agents: self.registry.len(),
        });

        if !self.unscheduled.is_empty() {
            self.arm_broadcast_timer(self.timing.broadcast_retry);
        }
    }

    /// Arms a one-shot broadcast, cancelling any timer already in flight.
    fn arm_broadcast_timer(&mut self, delay: Duration) {
        if let Some(timer) = self.broadcast_timer.take() {
            timer.abort();
        }
        let tx = self.tx.clone();
        self.broadcast_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::Broadcast).await;
        }));
    }

    fn handle_job_summary(&self, reply: oneshot::Sender<JobSummary>) {
        let mut jobs = self.unscheduled.snapshot();
        jobs.extend(self.scheduled.snapshot());

        match &self.store {
            // Store reads happen off the engine task so storage latency
            // never stalls message handling
            Some(store) => {
                let store = Arc::clone(store);
                tokio::spawn(async move {
                    match store.completed_jobs().await {
                        Ok(completed) => jobs.extend(completed),
                        Err(e) => warn!(error = %e, "failed to read completed jobs from store"),
                    }
                    match store.failed_jobs().await {
                        Ok(failed) => jobs.extend(failed),
                        Err(e) => warn!(error = %e, "failed to read failed jobs from store"),
                    }
                    let _ = reply.send(JobSummary { jobs });
                });
            }
            None => {
                let _ = reply.send(JobSummary { jobs });
            }
        }
    }

    /// Fire-and-forget delivery to an agent mailbox; the engine loop never
    /// waits on an agent draining its channel.
    fn post(&self, mailbox: mpsc::Sender<AgentMessage>, message: AgentMessage) {
        tokio::spawn(async move {
            if mailbox.send(message).await.is_err() {
                debug!("agent mailbox closed before delivery");
            }
        });
    }

    fn persist_progress(&self, job: &Job) {
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let job = job.clone();
            tokio::spawn(async move {
                if let Err(e) = store.persist_job_progress(&job).await {
                    warn!(error = %e, job_id = job.id, "failed to persist job progress");
                }
            });
        }
    }

    fn persist_failure(&self, job: &Job) {
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let job = job.clone();
            tokio::spawn(async move {
                if let Err(e) = store.persist_job_failure(&job).await {
                    warn!(error = %e, job_id = job.id, "failed to persist job failure");
                }
            });
        }
    }
}

impl std::fmt::Debug for SchedulerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerEngine")
            .field("policy", &self.policy.name())
            .field("paused", &self.paused)
            .field("agents", &self.registry.len())
            .field("unscheduled", &self.unscheduled.len())
            .field("scheduled", &self.scheduled.len())
            .finish_non_exhaustive()
    }
}
