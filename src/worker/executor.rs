use std::sync::Arc;

use tokio::time::Instant;

use crate::credentials::Lease;
use crate::scheduler::job::{Generated, Job, JobId};
use crate::scheduler::run::{RunContext, RunEvent};
use crate::worker::classify::{classify, truncate_error, FailureKind};
use crate::worker::generator::GenerateError;

/// One of the run's concurrent workers.
///
/// Loops until the queue is empty or the run is stopped. A worker counts as
/// active for its whole life, including while it waits for a free key.
pub struct Worker {
    id: usize,
    ctx: Arc<RunContext>,
}

enum Next {
    Process(JobId, Lease),
    Backoff,
    Exit,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<RunContext>) -> Self {
        Self { id, ctx }
    }

    pub async fn run(self) {
        let ctx = &self.ctx;
        tracing::debug!(run_id = %ctx.run_id, worker_id = self.id, "Worker started");

        let stagger = ctx.config.worker_stagger();
        if !stagger.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {}
                _ = tokio::time::sleep(stagger) => {}
            }
        }

        loop {
            if ctx.is_cancelled() {
                tracing::debug!(worker_id = self.id, "Run stopped, worker exiting");
                break;
            }

            match self.next().await {
                Next::Process(job_id, lease) => self.process(job_id, lease).await,
                Next::Backoff => {
                    tracing::debug!(worker_id = self.id, "No key available, backing off");
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {}
                        _ = tokio::time::sleep(ctx.config.no_key_backoff()) => {}
                    }
                }
                Next::Exit => break,
            }
        }

        tracing::debug!(run_id = %ctx.run_id, worker_id = self.id, "Worker finished");
    }

    /// Pop a job and lease a key for it, in one critical section.
    async fn next(&self) -> Next {
        let mut state = self.ctx.state.lock().await;
        let Some(job_id) = state.queue.dequeue_head() else {
            // Under the lock, so a concurrent requeue cannot be overtaken.
            self.ctx.enter_draining();
            return Next::Exit;
        };
        match state.pool.acquire(Instant::now()) {
            Some(lease) => Next::Process(job_id, lease),
            None => {
                state.queue.requeue_head(job_id);
                Next::Backoff
            }
        }
    }

    async fn process(&self, job_id: JobId, lease: Lease) {
        let ctx = &self.ctx;
        let key_number = lease.key_number();

        let Some(job) = ctx.store.begin(&job_id).await else {
            ctx.state.lock().await.pool.release(lease);
            return;
        };

        let outcome = self.generate(job.clone(), &lease).await;

        match outcome {
            Ok(generated) => {
                ctx.store.complete(&job_id, generated).await;
                ctx.state.lock().await.pool.release(lease);
                tracing::info!(
                    run_id = %ctx.run_id,
                    job_id = %job_id,
                    key_number,
                    label = %job.label,
                    "Key {} [Success]",
                    key_number
                );
                ctx.emit(RunEvent::JobSucceeded { job_id, key_number });
            }
            Err(err) => match classify(&err) {
                FailureKind::Transient => {
                    // Status goes back to pending before the id is visible
                    // in the queue again.
                    ctx.store.requeue(&job_id).await;
                    {
                        let mut state = ctx.state.lock().await;
                        state
                            .pool
                            .cool_down(lease, ctx.config.cooldown(), Instant::now());
                        state.queue.enqueue(job_id);
                        ctx.resume_running();
                    }
                    tracing::warn!(
                        run_id = %ctx.run_id,
                        job_id = %job_id,
                        key_number,
                        error = %err,
                        cooldown_ms = ctx.config.cooldown_ms,
                        "Key {} limited, cooling down",
                        key_number
                    );
                    ctx.emit(RunEvent::KeyCoolingDown {
                        job_id,
                        key_number,
                        cooldown_ms: ctx.config.cooldown_ms,
                    });
                }
                FailureKind::Permanent => {
                    let error = truncate_error(&err.to_string(), ctx.config.max_error_len);
                    ctx.store.fail(&job_id, error.clone()).await;
                    ctx.state.lock().await.pool.release(lease);
                    tracing::warn!(
                        run_id = %ctx.run_id,
                        job_id = %job_id,
                        key_number,
                        error = %error,
                        "Key {} [Failed]",
                        key_number
                    );
                    ctx.emit(RunEvent::JobFailed {
                        job_id,
                        key_number,
                        error,
                    });
                }
                FailureKind::Aborted => {
                    // Out of this run; the next run picks it up again.
                    ctx.store.requeue(&job_id).await;
                    ctx.state.lock().await.pool.release(lease);
                }
            },
        }
    }

    /// Run the provider call on its own task so a panicking generator
    /// still hands the job and the key back.
    async fn generate(&self, job: Job, lease: &Lease) -> Result<Generated, GenerateError> {
        let generator = self.ctx.generator.clone();
        let credential = lease.credential().clone();
        let mode = self.ctx.mode;
        let call = tokio::spawn(async move { generator.generate(&job, &credential, mode).await });
        match call.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(run_id = %self.ctx.run_id, worker_id = self.id, error = %e, "Generator task failed");
                Err(GenerateError::Crashed(e.to_string()))
            }
        }
    }
}
