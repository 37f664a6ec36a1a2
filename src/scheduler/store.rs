use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::error::{QueueError, Result};
use crate::scheduler::job::{Generated, Job, JobId, JobStatus};

/// Ordered copy of every job, as handed to observers.
pub type Snapshot = Arc<Vec<Job>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn from_jobs<'a>(jobs: impl Iterator<Item = &'a Job>) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            counts.total += 1;
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<JobId, Job>,
    order: Vec<JobId>,
}

impl StoreInner {
    fn ordered(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    fn apply(&mut self, id: &JobId, mutation: impl FnOnce(&mut Job)) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) => {
                mutation(job);
                true
            }
            None => false,
        }
    }
}

/// Authoritative status of every job.
///
/// Workers write through the transition methods; observers either take a
/// [`snapshot`](Self::snapshot) or [`subscribe`](Self::subscribe) to the
/// copies the scheduler publishes on a fixed cadence.
#[derive(Debug, Clone)]
pub struct JobStore {
    inner: Arc<RwLock<StoreInner>>,
    published: Arc<watch::Sender<Snapshot>>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            published: Arc::new(tx),
        }
    }

    pub async fn add_job(&self, job: Job) -> JobId {
        let id = job.id;
        let mut inner = self.inner.write().await;
        if inner.jobs.insert(id, job).is_none() {
            inner.order.push(id);
        }
        id
    }

    pub async fn add_jobs(&self, jobs: impl IntoIterator<Item = Job>) -> Vec<JobId> {
        let mut inner = self.inner.write().await;
        jobs.into_iter()
            .map(|job| {
                let id = job.id;
                if inner.jobs.insert(id, job).is_none() {
                    inner.order.push(id);
                }
                id
            })
            .collect()
    }

    /// Replace the whole batch, e.g. when restoring history.
    pub async fn replace_all(&self, jobs: Vec<Job>) {
        let mut inner = self.inner.write().await;
        inner.order = jobs.iter().map(|j| j.id).collect();
        inner.jobs = jobs.into_iter().map(|j| (j.id, j)).collect();
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.order.is_empty()
    }

    /// Independent copy of all jobs in insertion order.
    pub async fn snapshot(&self) -> Vec<Job> {
        self.inner.read().await.ordered().cloned().collect()
    }

    pub async fn counts(&self) -> StatusCounts {
        StatusCounts::from_jobs(self.inner.read().await.ordered())
    }

    /// Remove a job. Rejected while the job is being processed.
    ///
    /// A pending job may still sit in a run's queue; the worker that pops it
    /// finds it gone and skips it.
    pub async fn delete(&self, id: &JobId) -> Result<Job> {
        let mut inner = self.inner.write().await;
        match inner.jobs.get(id) {
            None => return Err(QueueError::JobNotFound(*id)),
            Some(job) if job.status == JobStatus::Processing => {
                return Err(QueueError::JobProcessing(*id))
            }
            Some(_) => {}
        }
        inner.order.retain(|other| other != id);
        inner
            .jobs
            .remove(id)
            .ok_or(QueueError::JobNotFound(*id))
    }

    /// Reset a finished job to `Pending` so the next run picks it up.
    pub async fn retry(&self, id: &JobId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(id).ok_or(QueueError::JobNotFound(*id))?;
        if job.status == JobStatus::Processing {
            return Err(QueueError::JobProcessing(*id));
        }
        job.reset();
        Ok(())
    }

    /// Drop every job. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.write().await;
        let removed = inner.order.len();
        inner.jobs.clear();
        inner.order.clear();
        removed
    }

    /// Pick the jobs a new run should process, in order.
    ///
    /// Pending and failed jobs are selected, failed ones reset to pending.
    /// When every job is already completed the whole batch is reset and
    /// regenerated.
    pub(crate) async fn prepare_run(&self) -> Result<Vec<JobId>> {
        let mut inner = self.inner.write().await;
        if inner.order.is_empty() {
            return Err(QueueError::NoJobs);
        }

        let StoreInner { jobs, order } = &mut *inner;
        let mut targets = Vec::new();
        for id in order.iter() {
            if let Some(job) = jobs.get_mut(id) {
                if matches!(job.status, JobStatus::Pending | JobStatus::Failed) {
                    job.reset();
                    targets.push(*id);
                }
            }
        }

        if targets.is_empty() {
            for id in order.iter() {
                if let Some(job) = jobs.get_mut(id) {
                    job.reset();
                    targets.push(*id);
                }
            }
        }

        Ok(targets)
    }

    /// Mark a job as processing and hand back a copy for the generator.
    /// `None` if the job has been deleted.
    pub(crate) async fn begin(&self, id: &JobId) -> Option<Job> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(id)?;
        job.mark_processing();
        Some(job.clone())
    }

    pub(crate) async fn complete(&self, id: &JobId, generated: Generated) -> bool {
        self.inner.write().await.apply(id, |job| job.complete(generated))
    }

    pub(crate) async fn requeue(&self, id: &JobId) -> bool {
        self.inner.write().await.apply(id, Job::reset)
    }

    pub(crate) async fn fail(&self, id: &JobId, error: String) -> bool {
        self.inner.write().await.apply(id, |job| job.fail(error))
    }

    /// Push the current state to every subscriber.
    pub async fn publish(&self) -> Snapshot {
        let snapshot: Snapshot = Arc::new(self.snapshot().await);
        self.published.send_replace(snapshot.clone());
        snapshot
    }

    /// Receive the snapshots published while runs are active.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.published.subscribe()
    }
}
