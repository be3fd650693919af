//! Batching Storage Proxy
//!
//! `KvProxy` sits between request handlers and the remote key-value store.
//! Writes are handed to a bounded job queue drained by a fixed pool of
//! workers, each batching jobs into pipelines. Reads, deletes and resets go
//! straight to the store.
//!
//! # Write path
//!
//! ```text
//!  set() --try enqueue--> [ job queue ] --> worker 0: buffer + timer --+
//!    |      (enqueue            |       --> worker 1: buffer + timer --+--> pipeline
//!    |       timeout)           |       --> worker N: buffer + timer --+
//!    |                          |
//!    +--queue saturated--> direct write on the write store
//! ```
//!
//! # Visibility of batch errors
//!
//! With the default ack timeout of zero, `set` returns as soon as the job is
//! queued and batch failures are never reported to the caller; they are only
//! logged and counted. Callers that need to observe failures must configure
//! a nonzero ack timeout. Even then an ack that does not arrive in time is
//! reported as success while the write is still in flight.
//!
//! There is no ordering between the batched and the direct path: a direct
//! write can land before an earlier queued write to the same key.

mod builder;
mod job;
pub mod keys;
mod options;
mod worker;

pub use builder::KvProxyBuilder;
pub use options::{ProxyOptions, ResetStrategy};
pub use worker::FlushTrigger;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use self::builder::StoreHandle;
use self::job::{Job, JobReceiver};
use self::worker::BatchWorker;
use crate::infrastructure::metrics;
use crate::infrastructure::store::BackingStore;
use crate::shared::error::{ProxyError, ProxyResult, StoreError};

/// Asynchronous batching proxy in front of a key-value store.
///
/// All operations take the caller's `CancellationToken`. Cancelling it aborts
/// the caller's wait; a job already queued is still flushed and its result
/// dropped.
pub struct KvProxy {
    options: ProxyOptions,
    queue: RwLock<Option<mpsc::Sender<Job>>>,
    closed: AtomicBool,
    workers: TaskTracker,
    write: StoreHandle,
    read: Option<StoreHandle>,
}

impl KvProxy {
    pub fn builder(options: ProxyOptions) -> KvProxyBuilder {
        KvProxyBuilder::new(options)
    }

    /// Starts the worker pool. Must be called inside a Tokio runtime.
    pub(crate) fn start(
        options: ProxyOptions,
        write: StoreHandle,
        read: Option<StoreHandle>,
    ) -> ProxyResult<Self> {
        options.validate()?;

        let workers = TaskTracker::new();
        let queue = if options.batching_enabled() {
            let (tx, rx) = mpsc::channel(options.queue_capacity);
            let rx = Arc::new(Mutex::new(rx));
            for id in 0..options.workers {
                let worker = BatchWorker::new(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&write.store),
                    options.pipe_size,
                    options.flush_interval,
                    options.exec_timeout,
                );
                workers.spawn(worker.run());
            }
            Some(tx)
        } else {
            None
        };
        workers.close();

        info!(
            workers = if queue.is_some() { options.workers } else { 0 },
            pipe_size = options.pipe_size,
            queue_capacity = options.queue_capacity,
            prefix = %options.key_prefix,
            "Storage proxy started"
        );

        Ok(Self {
            options,
            queue: RwLock::new(queue),
            closed: AtomicBool::new(false),
            workers,
            write,
            read,
        })
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reads a key from the read store. A missing key is `Ok(None)`.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn get(&self, cancel: &CancellationToken, key: &str) -> ProxyResult<Option<Vec<u8>>> {
        self.guard(cancel)?;
        let key = keys::namespaced(&self.options.key_prefix, key);
        cancellable(cancel, self.reader().get(&key)).await
    }

    /// Writes a key, batched when the queue has room.
    ///
    /// Returns once the job is queued (fire-and-forget), once its batch
    /// result arrives, or once the ack timeout expires, depending on the
    /// ack timeout. A saturated queue turns the call into a direct write, and
    /// a zero enqueue timeout skips the queue altogether.
    #[instrument(skip(self, cancel, value), level = "debug")]
    pub async fn set(
        &self,
        cancel: &CancellationToken,
        key: &str,
        value: impl Into<Vec<u8>>,
        ttl: Duration,
    ) -> ProxyResult<()> {
        self.guard(cancel)?;
        let key = keys::namespaced(&self.options.key_prefix, key).into_owned();
        let value = value.into();

        if self.options.batching_enabled() && self.options.enqueue_timeout.is_zero() {
            metrics::record_direct_write("unbatched");
            return self.write_direct(cancel, &key, &value, ttl).await;
        }

        let sender = match self.sender() {
            Some(sender) => sender,
            None if self.options.batching_enabled() => return Err(ProxyError::Closed),
            None => {
                metrics::record_direct_write("unbatched");
                return self.write_direct(cancel, &key, &value, ttl).await;
            }
        };
        // Close may have started between the guard and the clone.
        if self.is_closed() {
            return Err(ProxyError::Closed);
        }

        let (job, receiver) = Job::new(key, value, ttl);
        let enqueued = self.enqueue(cancel, &sender, job).await;
        // Holding the sender past this point would keep close from draining.
        drop(sender);
        match enqueued? {
            None => {
                metrics::record_enqueued();
                self.await_ack(cancel, receiver).await
            }
            Some(job) => {
                debug!(key = %job.key(), "Job queue saturated, writing directly");
                metrics::record_direct_write("saturated");
                let (command, _) = job.into_parts();
                self.write_direct(cancel, &command.key, &command.value, command.expiration)
                    .await
            }
        }
    }

    /// Deletes a key. Never batched.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn delete(&self, cancel: &CancellationToken, key: &str) -> ProxyResult<()> {
        self.guard(cancel)?;
        let key = keys::namespaced(&self.options.key_prefix, key).into_owned();
        cancellable(cancel, self.write.store.delete(&[key])).await?;
        Ok(())
    }

    /// Removes the proxy's data: the whole store without a prefix, otherwise
    /// every key under the prefix, scanned page by page.
    #[instrument(skip(self, cancel))]
    pub async fn reset(&self, cancel: &CancellationToken) -> ProxyResult<()> {
        self.guard(cancel)?;
        let store = &self.write.store;

        match self.options.reset_strategy() {
            ResetStrategy::FlushAll => {
                cancellable(cancel, store.flush_all()).await?;
                info!("Store flushed");
            }
            ResetStrategy::ScanPrefix => {
                let pattern = keys::prefix_pattern(&self.options.key_prefix);
                let mut cursor = 0;
                let mut removed = 0;
                loop {
                    let (next, page) =
                        cancellable(cancel, store.scan(cursor, &pattern, self.options.scan_count))
                            .await?;
                    if !page.is_empty() {
                        removed += cancellable(cancel, store.delete(&page)).await?;
                    }
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                info!(prefix = %self.options.key_prefix, removed, "Prefix reset complete");
            }
        }
        Ok(())
    }

    /// Stops accepting writes, lets every worker flush what it holds, then
    /// closes the stores this proxy opened. Injected stores stay open.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) -> ProxyResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("Closing storage proxy");
        drop(self.queue.write().take());
        self.workers.wait().await;

        let mut first_error = None;
        let handles = std::iter::once(&self.write).chain(self.read.as_ref());
        for handle in handles.filter(|handle| handle.owned) {
            if let Err(err) = handle.store.close().await {
                warn!(error = %err, "Failed to close store");
                first_error.get_or_insert(err);
            }
        }

        info!("Storage proxy closed");
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn guard(&self, cancel: &CancellationToken) -> ProxyResult<()> {
        if self.is_closed() {
            return Err(ProxyError::Closed);
        }
        if cancel.is_cancelled() {
            return Err(ProxyError::Cancelled);
        }
        Ok(())
    }

    fn reader(&self) -> &Arc<dyn BackingStore> {
        &self.read.as_ref().unwrap_or(&self.write).store
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        self.queue.read().clone()
    }

    /// Hands a job to the queue. Returns the job back when the queue stayed
    /// full for the whole enqueue timeout.
    async fn enqueue(
        &self,
        cancel: &CancellationToken,
        sender: &mpsc::Sender<Job>,
        job: Job,
    ) -> ProxyResult<Option<Job>> {
        let wait = self.options.enqueue_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProxyError::Cancelled),
            sent = sender.send_timeout(job, wait) => match sent {
                Ok(()) => Ok(None),
                Err(SendTimeoutError::Timeout(job)) => Ok(Some(job)),
                Err(SendTimeoutError::Closed(_)) => Err(ProxyError::Closed),
            },
        }
    }

    async fn await_ack(&self, cancel: &CancellationToken, receiver: JobReceiver) -> ProxyResult<()> {
        let wait = self.options.ack_timeout;
        if wait.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProxyError::Cancelled),
            outcome = timeout(wait, receiver) => match outcome {
                Ok(Ok(None)) => Ok(()),
                Ok(Ok(Some(err))) => Err(err.into()),
                // Reply dropped undelivered or not in time: the write is
                // still considered in flight.
                Ok(Err(_)) | Err(_) => {
                    debug!("Ack not received in time, assuming write in flight");
                    Ok(())
                }
            },
        }
    }

    async fn write_direct(
        &self,
        cancel: &CancellationToken,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> ProxyResult<()> {
        let write = timeout(
            self.options.direct_write_timeout,
            self.write.store.set(key, value, ttl),
        );
        match cancellable(cancel, async { Ok::<_, StoreError>(write.await) }).await? {
            Ok(result) => result.map_err(ProxyError::from),
            Err(_) => Err(StoreError::Timeout("direct write").into()),
        }
    }
}

impl std::fmt::Debug for KvProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvProxy")
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Races a store call against the caller's cancellation.
async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> ProxyResult<T>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProxyError::Cancelled),
        result = call => result.map_err(ProxyError::from),
    }
}
