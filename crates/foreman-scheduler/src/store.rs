//! Backing store for job history.
//!
//! The store is an optional audit/durability layer: the in-memory queue
//! partitions stay authoritative for in-flight scheduling decisions, and the
//! engine never blocks on store acknowledgements. Running without a store is
//! a valid configuration; a store that was configured but cannot be
//! constructed is fatal at startup.

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::{redis::AsyncCommands, Config, Pool, Runtime};
use std::sync::Arc;

use foreman_proto::{Job, JobId, JobState};

use crate::config::{StoreConfig, StoreKind, ValkeyConfig};
use crate::error::{Result, SchedulerError};

/// Trait for job history storage backends.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Persists a progress snapshot, keyed by job identifier.
    async fn persist_job_progress(&self, job: &Job) -> Result<()>;

    /// Persists a terminal failure.
    async fn persist_job_failure(&self, job: &Job) -> Result<()>;

    /// All jobs recorded as complete.
    async fn completed_jobs(&self) -> Result<Vec<Job>>;

    /// All jobs recorded as failed.
    async fn failed_jobs(&self) -> Result<Vec<Job>>;

    /// Loads one job by identifier.
    async fn load_job(&self, id: JobId) -> Result<Option<Job>>;
}

/// Constructs the configured store.
///
/// Returns `None` for `StoreKind::None`. An unreachable Valkey store is a
/// [`SchedulerError::StoreInit`]: the engine refuses to start rather than
/// run without a store that was explicitly configured.
pub async fn build_store(config: &StoreConfig) -> Result<Option<Arc<dyn BackingStore>>> {
    match config.kind {
        StoreKind::None => Ok(None),
        StoreKind::Memory => Ok(Some(Arc::new(MemoryBackingStore::new()))),
        StoreKind::Valkey => {
            let store = ValkeyBackingStore::new(&config.valkey)
                .await
                .map_err(|e| SchedulerError::StoreInit(e.to_string()))?;
            Ok(Some(Arc::new(store)))
        }
    }
}

/// In-process backing store.
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    jobs: DashMap<JobId, Job>,
}

impl MemoryBackingStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn persist_job_progress(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn persist_job_failure(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn completed_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .iter()
            .filter(|r| r.state == JobState::Complete)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn failed_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .iter()
            .filter(|r| r.state == JobState::Failed)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id).map(|r| r.value().clone()))
    }
}

/// Valkey-backed job history store.
///
/// Job records are JSON values keyed by identifier; completed and failed
/// jobs are additionally indexed in two id sets.
pub struct ValkeyBackingStore {
    pool: Pool,
    key_prefix: String,
}

impl ValkeyBackingStore {
    /// Creates a new Valkey store, verifying the connection with a ping.
    pub async fn new(config: &ValkeyConfig) -> Result<Self> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SchedulerError::Config(e.to_string()))?;

        let mut conn = pool.get().await?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}job:{id}", self.key_prefix)
    }

    fn completed_key(&self) -> String {
        format!("{}completed", self.key_prefix)
    }

    fn failed_key(&self) -> String {
        format!("{}failed", self.key_prefix)
    }

    async fn write_job(&self, job: &Job, index_key: Option<String>) -> Result<()> {
        let json =
            serde_json::to_string(job).map_err(|e| SchedulerError::Serialisation(e.to_string()))?;

        let mut conn = self.pool.get().await?;
        conn.set::<_, _, ()>(self.job_key(job.id), &json).await?;
        if let Some(key) = index_key {
            conn.sadd::<_, _, ()>(&key, job.id).await?;
        }
        Ok(())
    }

    async fn jobs_in_set(&self, key: String) -> Result<Vec<Job>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<JobId> = conn.smembers(&key).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let data: Option<String> = conn.get(self.job_key(id)).await?;
            if let Some(json) = data {
                let job: Job = serde_json::from_str(&json)
                    .map_err(|e| SchedulerError::Serialisation(e.to_string()))?;
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl BackingStore for ValkeyBackingStore {
    async fn persist_job_progress(&self, job: &Job) -> Result<()> {
        let index = (job.state == JobState::Complete).then(|| self.completed_key());
        self.write_job(job, index).await
    }

    async fn persist_job_failure(&self, job: &Job) -> Result<()> {
        self.write_job(job, Some(self.failed_key())).await
    }

    async fn completed_jobs(&self) -> Result<Vec<Job>> {
        self.jobs_in_set(self.completed_key()).await
    }

    async fn failed_jobs(&self) -> Result<Vec<Job>> {
        self.jobs_in_set(self.failed_key()).await
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        let mut conn = self.pool.get().await?;
        let data: Option<String> = conn.get(self.job_key(id)).await?;
        match data {
            None => Ok(None),
            Some(json) => {
                let job: Job = serde_json::from_str(&json)
                    .map_err(|e| SchedulerError::Serialisation(e.to_string()))?;
                Ok(Some(job))
            }
        }
    }
}

impl std::fmt::Debug for ValkeyBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyBackingStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn job(id: JobId, state: JobState, progress: f64) -> Job {
        let mut job = Job::new(id, "echo", BTreeMap::new());
        job.state = state;
        job.progress = progress;
        job
    }

    #[tokio::test]
    async fn memory_store_partitions_by_terminal_state() {
        let store = MemoryBackingStore::new();

        store
            .persist_job_progress(&job(1, JobState::Running, 0.4))
            .await
            .unwrap();
        store
            .persist_job_progress(&job(2, JobState::Complete, 1.0))
            .await
            .unwrap();
        store
            .persist_job_failure(&job(3, JobState::Failed, 0.7))
            .await
            .unwrap();

        let completed = store.completed_jobs().await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, 2);

        let failed = store.failed_jobs().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, 3);
        // Failed jobs keep their last progress for diagnostics
        assert_eq!(failed[0].progress, 0.7);
    }

    #[tokio::test]
    async fn memory_store_overwrites_by_id() {
        let store = MemoryBackingStore::new();

        store
            .persist_job_progress(&job(1, JobState::Running, 0.3))
            .await
            .unwrap();
        store
            .persist_job_progress(&job(1, JobState::Running, 0.8))
            .await
            .unwrap();

        let loaded = store.load_job(1).await.unwrap().unwrap();
        assert_eq!(loaded.progress, 0.8);
        assert!(store.load_job(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn build_store_none_is_valid() {
        let store = build_store(&StoreConfig::default()).await.unwrap();
        assert!(store.is_none());
    }

    #[tokio::test]
    async fn build_store_memory() {
        let config = StoreConfig {
            kind: StoreKind::Memory,
            valkey: ValkeyConfig::default(),
        };
        let store = build_store(&config).await.unwrap();
        assert!(store.is_some());
    }
}
