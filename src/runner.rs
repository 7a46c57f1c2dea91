// In-process deferred job runner.
//
// Jobs wait on tokio timers. Every pending job is also written to jobs.json so
// that a restart re-arms it; a job whose time passed while the process was down
// fires as soon as it is re-armed. Delivery is therefore at-least-once.
//
// ⚠️ VERSION BUMP REQUIRED:
// Changes to PendingJob serialization require incrementing QUEUE_VERSION.
use crate::config::Config;
use crate::context::AppContext;
use crate::jobs::{JobExecutor, JobPayload};
use crate::ledger::{JobHandle, JobKind};
use crate::storage::LocalStorage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use uuid::Uuid;

const QUEUE_VERSION: u32 = 1;

/// Accepts jobs for future execution and cancels them on request.
pub trait JobRunner: Send + Sync {
    fn schedule(
        &self,
        kind: JobKind,
        payload: JobPayload,
        fire_at: DateTime<Utc>,
    ) -> Result<JobHandle>;

    /// Cancels a pending job. Errors if the handle is unknown or already finished.
    fn revoke(&self, handle: &JobHandle) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            backoff: Duration::from_secs(config.retry_backoff_secs),
        }
    }

    /// Wait before retry number `attempt` (1-based): doubles each time, capped at 10x.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(10);
        self.backoff * factor
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJob {
    pub id: String,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub fire_at: DateTime<Utc>,
    /// Failed executions so far.
    #[serde(default)]
    pub attempts: u32,
}

struct Inner {
    queue_path: PathBuf,
    executor: Arc<dyn JobExecutor>,
    retry: RetryPolicy,
    tasks: Mutex<HashMap<String, AbortHandle>>,
    runtime: tokio::runtime::Handle,
}

#[derive(Clone)]
pub struct LocalRunner {
    inner: Arc<Inner>,
}

impl LocalRunner {
    /// Must be called from within a tokio runtime; jobs are spawned on it.
    pub fn new(
        ctx: &dyn AppContext,
        executor: Arc<dyn JobExecutor>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("Job runner needs a tokio runtime: {}", e))?;
        Ok(Self {
            inner: Arc::new(Inner {
                queue_path: ctx.get_job_queue_path()?,
                executor,
                retry,
                tasks: Mutex::new(HashMap::new()),
                runtime,
            }),
        })
    }

    /// Re-arms every job left in the queue by a previous run. Returns how many.
    pub fn start(&self) -> Result<usize> {
        let queue: Vec<PendingJob> = LocalStorage::load(&self.inner.queue_path, QUEUE_VERSION)?;
        let now = Utc::now();
        let mut armed = 0;
        for job in queue {
            if self.inner.is_tracked(&job.id)? {
                continue;
            }
            if job.fire_at <= now {
                log::info!("{} job {} is overdue; firing now", job.kind, job.id);
            }
            self.inner.spawn(job)?;
            armed += 1;
        }
        if armed > 0 {
            log::info!("Re-armed {} pending jobs", armed);
        }
        Ok(armed)
    }

    /// Jobs that are persisted and not yet finished.
    pub fn pending(&self) -> Result<Vec<PendingJob>> {
        LocalStorage::load(&self.inner.queue_path, QUEUE_VERSION)
    }
}

impl JobRunner for LocalRunner {
    fn schedule(
        &self,
        kind: JobKind,
        payload: JobPayload,
        fire_at: DateTime<Utc>,
    ) -> Result<JobHandle> {
        let job = PendingJob {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            fire_at,
            attempts: 0,
        };
        LocalStorage::modify(&self.inner.queue_path, QUEUE_VERSION, |q: &mut Vec<PendingJob>| {
            q.push(job.clone());
            Ok(())
        })?;

        let handle = JobHandle(job.id.clone());
        self.inner.spawn(job)?;
        Ok(handle)
    }

    fn revoke(&self, handle: &JobHandle) -> Result<()> {
        let task = self
            .inner
            .tasks
            .lock()
            .map_err(|_| anyhow::anyhow!("runner lock poisoned"))?
            .remove(&handle.0);
        let Some(task) = task else {
            anyhow::bail!("Job {} is not pending", handle);
        };
        task.abort();
        self.inner.forget(&handle.0)?;
        log::debug!("Revoked job {}", handle);
        Ok(())
    }
}

impl Inner {
    fn is_tracked(&self, id: &str) -> Result<bool> {
        Ok(self
            .tasks
            .lock()
            .map_err(|_| anyhow::anyhow!("runner lock poisoned"))?
            .contains_key(id))
    }

    fn spawn(self: &Arc<Self>, job: PendingJob) -> Result<()> {
        let id = job.id.clone();
        // Hold the map while spawning so a job that finishes instantly cannot
        // remove its entry before it exists.
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| anyhow::anyhow!("runner lock poisoned"))?;
        let inner = Arc::clone(self);
        let task = self.runtime.spawn(async move { inner.drive(job).await });
        tasks.insert(id, task.abort_handle());
        Ok(())
    }

    async fn drive(self: Arc<Self>, mut job: PendingJob) {
        loop {
            let wait = (job.fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            match self.executor.execute(job.kind, &job.payload).await {
                Ok(()) => {
                    log::debug!("{} job {} done", job.kind, job.id);
                    break;
                }
                Err(e) => {
                    job.attempts += 1;
                    if job.attempts >= self.retry.max_attempts {
                        log::error!(
                            "{} job {} for lesson {} failed {} times, giving up: {:#}",
                            job.kind,
                            job.id,
                            job.payload.lesson_id,
                            job.attempts,
                            e
                        );
                        break;
                    }
                    let delay = self.retry.delay(job.attempts);
                    log::warn!(
                        "{} job {} failed (attempt {}), retrying in {:?}: {:#}",
                        job.kind,
                        job.id,
                        job.attempts,
                        delay,
                        e
                    );
                    job.fire_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                    if let Err(e) = self.persist_retry(&job) {
                        log::warn!("Could not persist retry of job {}: {}", job.id, e);
                    }
                }
            }
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.remove(&job.id);
        }
        if let Err(e) = self.forget(&job.id) {
            log::warn!("Could not remove job {} from queue: {}", job.id, e);
        }
    }

    fn persist_retry(&self, job: &PendingJob) -> Result<()> {
        LocalStorage::modify_if(&self.queue_path, QUEUE_VERSION, |q: &mut Vec<PendingJob>| {
            match q.iter_mut().find(|j| j.id == job.id) {
                Some(slot) => {
                    *slot = job.clone();
                    Ok(((), true))
                }
                None => Ok(((), false)),
            }
        })
    }

    fn forget(&self, id: &str) -> Result<()> {
        LocalStorage::modify_if(&self.queue_path, QUEUE_VERSION, |q: &mut Vec<PendingJob>| {
            let before = q.len();
            q.retain(|j| j.id != id);
            Ok(((), q.len() != before))
        })
    }
}
