//! Pending write jobs and their single-slot replies.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::trace;

use crate::infrastructure::store::WriteCommand;
use crate::shared::error::StoreError;

/// What a worker reports back for one job: `None` on success.
pub type JobOutcome = Option<StoreError>;

/// Caller side of a job's reply slot.
pub type JobReceiver = oneshot::Receiver<JobOutcome>;

/// One pending write.
#[derive(Debug)]
pub struct Job {
    command: WriteCommand,
    reply: oneshot::Sender<JobOutcome>,
}

impl Job {
    /// Creates a job for an already namespaced key, returning the job and
    /// the receiver its outcome will be delivered to.
    pub fn new(key: String, value: Vec<u8>, expiration: Duration) -> (Self, JobReceiver) {
        let (reply, receiver) = oneshot::channel();
        let job = Self {
            command: WriteCommand {
                key,
                value,
                expiration,
            },
            reply,
        };
        (job, receiver)
    }

    pub fn key(&self) -> &str {
        &self.command.key
    }

    /// Splits the job into the command to execute and its reply slot.
    pub fn into_parts(self) -> (WriteCommand, JobReply) {
        (self.command, JobReply(self.reply))
    }
}

/// Worker side of a job's reply slot.
#[derive(Debug)]
pub struct JobReply(oneshot::Sender<JobOutcome>);

impl JobReply {
    /// Delivers the outcome without waiting. Returns `false` when the caller
    /// already stopped listening, in which case the outcome is discarded.
    pub fn deliver(self, outcome: JobOutcome) -> bool {
        match self.0.send(outcome) {
            Ok(()) => true,
            Err(_) => {
                trace!("Job reply abandoned by caller");
                false
            }
        }
    }
}
