use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

use super::{Job, JobError, JobQueue};

/// One job kind's executor. Handlers run under at-least-once delivery and
/// must be idempotent with respect to re-execution.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> &str;

    async fn handle(&self, job: &Job) -> std::result::Result<(), JobError>;
}

/// A set of claim/poll loops sharing one handler registry. Workers hold no
/// authoritative state in memory; all coordination happens through the
/// store, so any number of pools may run against the same queues.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    queues: Vec<String>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        queues: &[&str],
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            queues: queues.iter().map(|q| q.to_string()).collect(),
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let kind = handler.kind().to_string();
        if self.handlers.insert(kind.clone(), handler).is_some() {
            tracing::warn!(kind = %kind, "job handler registered twice, keeping the latest");
        }
    }

    /// Claim and execute at most one due job. Returns whether a job was
    /// processed. Used by tests and by the polling slots below.
    pub async fn tick(&self) -> Result<bool> {
        let queues: Vec<&str> = self.queues.iter().map(|q| q.as_str()).collect();
        let Some(job) = self.queue.claim(&queues).await? else {
            return Ok(false);
        };

        Self::execute(&self.queue, &self.handlers, &job).await;
        Ok(true)
    }

    /// Drive the queue until no due job remains. Test helper for scenarios
    /// that enqueue follow-up work.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.tick().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Run `concurrency` worker slots until the token is cancelled. Each
    /// slot finishes its in-flight job before exiting, so cancellation
    /// drains rather than aborts.
    pub async fn run(self, shutdown: CancellationToken) {
        let queue = self.queue;
        let handlers = Arc::new(self.handlers);
        let queues = Arc::new(self.queues);
        let mut slots = Vec::with_capacity(self.concurrency);

        for slot in 0..self.concurrency {
            let queue = queue.clone();
            let handlers = handlers.clone();
            let queues = queues.clone();
            let shutdown = shutdown.clone();
            let poll_interval = self.poll_interval;

            slots.push(tokio::spawn(async move {
                tracing::debug!(slot, "worker slot started");
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }

                    let queue_names: Vec<&str> = queues.iter().map(|q| q.as_str()).collect();
                    match queue.claim(&queue_names).await {
                        Ok(Some(job)) => {
                            Self::execute(&queue, &handlers, &job).await;
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                        }
                        Err(e) => {
                            tracing::error!(slot, "claim failed: {}", e);
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                        }
                    }
                }
                tracing::debug!(slot, "worker slot stopped");
            }));
        }

        for slot in slots {
            if let Err(e) = slot.await {
                tracing::error!("worker slot panicked: {}", e);
            }
        }
    }

    async fn execute(queue: &JobQueue, handlers: &HashMap<String, Arc<dyn JobHandler>>, job: &Job) {
        let outcome = match handlers.get(&job.kind) {
            Some(handler) => handler.handle(job).await,
            None => Err(JobError::Fatal(AppError::Internal(format!(
                "no handler registered for job kind '{}'",
                job.kind
            )))),
        };

        let result = match outcome {
            Ok(()) => queue.complete(job).await,
            Err(err) => queue.fail(job, &err).await,
        };

        if let Err(e) = result {
            // The job stays `running` and needs operator attention; the
            // store write failed so there is nothing safer to do here.
            tracing::error!(job_id = job.id, kind = %job.kind, "failed to settle job: {}", e);
        }
    }
}
