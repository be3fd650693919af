//! Batch workers.
//!
//! Each worker pulls jobs from the shared queue into a private buffer and
//! flushes it as one pipeline when the buffer fills up, when its flush timer
//! fires, or when the queue is closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use super::job::{Job, JobOutcome, JobReply};
use crate::infrastructure::metrics;
use crate::infrastructure::store::{BackingStore, WriteCommand};
use crate::shared::error::StoreError;

/// Receiving side of the job queue, shared by every worker.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// One long-lived batch worker.
pub struct BatchWorker {
    id: usize,
    queue: SharedReceiver,
    store: Arc<dyn BackingStore>,
    pipe_size: usize,
    flush_interval: Duration,
    exec_timeout: Duration,
}

impl BatchWorker {
    pub fn new(
        id: usize,
        queue: SharedReceiver,
        store: Arc<dyn BackingStore>,
        pipe_size: usize,
        flush_interval: Duration,
        exec_timeout: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            store,
            pipe_size,
            flush_interval,
            exec_timeout,
        }
    }

    /// Runs until the queue is closed and drained, then flushes what is left.
    pub async fn run(self) {
        let mut batch: Vec<Job> = Vec::with_capacity(self.pipe_size);
        let start = tokio::time::Instant::now() + self.flush_interval;
        let mut ticker = interval_at(start, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                job = next_job(&self.queue) => match job {
                    Some(job) => {
                        batch.push(job);
                        if batch.len() >= self.pipe_size {
                            self.flush(&mut batch, FlushTrigger::Size).await;
                            ticker.reset();
                        }
                    }
                    None => {
                        self.flush(&mut batch, FlushTrigger::Shutdown).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.flush(&mut batch, FlushTrigger::Interval).await;
                }
            }
        }

        debug!(worker = self.id, "Batch worker stopped");
    }

    async fn flush(&self, batch: &mut Vec<Job>, trigger: FlushTrigger) {
        if batch.is_empty() {
            return;
        }

        let (commands, replies): (Vec<WriteCommand>, Vec<JobReply>) =
            batch.drain(..).map(Job::into_parts).unzip();

        let started = Instant::now();
        let result = match timeout(self.exec_timeout, self.store.exec_pipeline(&commands)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout("pipeline")),
        };
        let elapsed = started.elapsed();

        metrics::record_flush(
            trigger.as_str(),
            commands.len(),
            result.is_ok(),
            elapsed.as_secs_f64(),
        );

        let (per_command, pipeline_error) = match result {
            Ok(per_command) => {
                debug!(
                    worker = self.id,
                    trigger = trigger.as_str(),
                    size = commands.len(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "Batch flushed"
                );
                (per_command, None)
            }
            Err(err) => {
                warn!(
                    worker = self.id,
                    trigger = trigger.as_str(),
                    size = commands.len(),
                    error = %err,
                    "Batch flush failed"
                );
                (Vec::new(), Some(err))
            }
        };

        let outcomes = resolve_outcomes(per_command, pipeline_error, replies.len());
        for (reply, outcome) in replies.into_iter().zip(outcomes) {
            reply.deliver(outcome);
        }
    }
}

async fn next_job(queue: &Mutex<mpsc::Receiver<Job>>) -> Option<Job> {
    queue.lock().await.recv().await
}

/// Resolves each job's outcome: its own command error, else the pipeline
/// error, else success.
///
/// A pipeline-level error is attributed to every job lacking its own error,
/// including commands the server may have applied. Callers waiting for an
/// ack can therefore see a failure for a write that landed.
pub fn resolve_outcomes(
    per_command: Vec<Option<StoreError>>,
    pipeline_error: Option<StoreError>,
    len: usize,
) -> Vec<JobOutcome> {
    let mut per_command = per_command.into_iter();
    (0..len)
        .map(|_| {
            per_command
                .next()
                .flatten()
                .or_else(|| pipeline_error.clone())
        })
        .collect()
}
