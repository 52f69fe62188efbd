use crate::job::{JobDescriptor, JobError};
use crate::messaging::{BrokerConnection, BrokerError, QueueChannel};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid job: {0}")]
    Job(#[from] JobError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// JobPublisher enqueues a single job and releases its connection
///
/// Flow:
/// 1. Serialize and validate the job (no broker traffic on failure)
/// 2. Declare the durable queue
/// 3. Publish with persistent delivery mode
/// 4. Close the connection, whatever happened above
///
/// `publish` consumes the publisher so a connection is never reused after it
/// has been closed.
pub struct JobPublisher<C: BrokerConnection> {
    connection: C,
    queue: String,
}

impl<C: BrokerConnection> JobPublisher<C> {
    pub fn new(connection: C, queue: impl Into<String>) -> Self {
        Self {
            connection,
            queue: queue.into(),
        }
    }

    /// Publish `job`, returning the exact payload that was enqueued
    pub async fn publish(mut self, job: &JobDescriptor) -> Result<Vec<u8>, PublishError> {
        let result = self.send(job).await;

        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "Failed to close publisher connection");
        }

        result
    }

    async fn send(&self, job: &JobDescriptor) -> Result<Vec<u8>, PublishError> {
        let payload = job.to_json()?;

        let channel = self.connection.create_channel().await?;
        let queue = channel.declare_queue(&self.queue, true).await?;
        channel.publish(&queue, &payload, true).await?;

        info!(queue = %self.queue, url = %job.url, "Job published");
        Ok(payload)
    }
}
