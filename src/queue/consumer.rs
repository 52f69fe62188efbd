use crate::job::{JobDescriptor, JobError};
use crate::messaging::{
    BrokerConnection, BrokerError, Delivery, QueueChannel, SubscribeOptions, Subscription,
};
use crate::observability::{ConsumerMetrics, MetricsSnapshot};
use crate::worker::executor::{ExecutionError, JobExecutor};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failures that end the consumer. Per-job failures never show up here.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("subscription ended unexpectedly (channel closed by broker)")]
    SubscriptionEnded,
}

/// Why a single job was rejected
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error(transparent)]
    Malformed(#[from] JobError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Consumer lifecycle
///
/// A [`JobConsumer`] starts in `Init` holding an open connection and becomes
/// `Connected` once a channel has been derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Init,
    Connected,
    Subscribed,
    Processing,
    ShuttingDown,
    Terminated,
}

/// Terminal disposition given to a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Rejected,
}

/// JobConsumer processes jobs from one queue, strictly one at a time
///
/// Each delivery gets exactly one disposition before the next one is
/// requested: ack when the executor succeeds, reject without requeue when the
/// payload is malformed or the executor fails. The shutdown token is only
/// checked between deliveries, so a running job always finishes first.
pub struct JobConsumer<C: BrokerConnection, E: JobExecutor> {
    connection: C,
    queue: String,
    executor: E,
    state: ConsumerState,
    metrics: ConsumerMetrics,
}

impl<C: BrokerConnection, E: JobExecutor> JobConsumer<C, E> {
    pub fn new(connection: C, queue: impl Into<String>, executor: E) -> Self {
        Self {
            connection,
            queue: queue.into(),
            executor,
            state: ConsumerState::Init,
            metrics: ConsumerMetrics::new(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Consume until `shutdown` is cancelled or the broker side fails.
    ///
    /// The connection is closed on every exit path. `Ok` means an orderly,
    /// requested shutdown.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        let result = self.consume(&shutdown).await;

        if let Err(e) = &result {
            error!(error = %e, "Consumer stopped on error");
        }

        self.transition(ConsumerState::ShuttingDown);
        info!("Shutting down");
        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "Failed to close broker connection");
        }
        self.transition(ConsumerState::Terminated);

        let snapshot = self.metrics.snapshot();
        info!(
            received = snapshot.jobs_received,
            acked = snapshot.jobs_acked,
            rejected = snapshot.jobs_rejected,
            "Consumer terminated"
        );

        result
    }

    async fn consume(&mut self, shutdown: &CancellationToken) -> Result<(), ConsumerError> {
        let channel = self.connection.create_channel().await?;
        self.transition(ConsumerState::Connected);

        let queue = channel.declare_queue(&self.queue, true).await?;
        let mut subscription = channel
            .subscribe(&queue, SubscribeOptions::one_at_a_time())
            .await?;

        self.transition(ConsumerState::Subscribed);
        info!(queue = %self.queue, "Waiting for jobs. To exit press CTRL+C");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                next = subscription.next_delivery() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => return Err(e.into()),
                    None if shutdown.is_cancelled() => return Ok(()),
                    None => return Err(ConsumerError::SubscriptionEnded),
                },
            };

            self.transition(ConsumerState::Processing);
            self.handle_delivery(&channel, delivery).await?;
            self.transition(ConsumerState::Subscribed);
        }
    }

    /// Run one delivery to its single disposition. Only a failed ack/reject
    /// is returned as an error.
    pub async fn handle_delivery(
        &self,
        channel: &C::Channel,
        delivery: Delivery,
    ) -> Result<Outcome, ConsumerError> {
        let tag = delivery.tag;
        self.metrics.job_received();
        info!(
            delivery_tag = tag,
            redelivered = delivery.redelivered,
            body = %String::from_utf8_lossy(&delivery.payload),
            "Received job"
        );

        match self.process(&delivery.payload).await {
            Ok(job) => {
                channel.ack(tag).await?;
                self.metrics.job_acked();
                info!(delivery_tag = tag, url = %job.url, "Job done");
                Ok(Outcome::Acked)
            }
            Err(failure) => {
                warn!(delivery_tag = tag, error = %failure, "Job failed, rejecting without requeue");
                channel.reject(tag, false).await?;
                self.metrics.job_rejected();
                Ok(Outcome::Rejected)
            }
        }
    }

    async fn process(&self, payload: &[u8]) -> Result<JobDescriptor, JobFailure> {
        let job = JobDescriptor::from_json(payload)?;
        self.executor.execute(&job).await?;
        Ok(job)
    }

    fn transition(&mut self, next: ConsumerState) {
        debug!(from = ?self.state, to = ?next, "Consumer state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{Disposition, MemoryBroker, MemoryChannel, MemoryConnection};
    use crate::worker::executor::{ExecutionOutput, Result as ExecResult};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Succeeds;

    #[async_trait]
    impl JobExecutor for Succeeds {
        async fn execute(&self, _job: &JobDescriptor) -> ExecResult<ExecutionOutput> {
            Ok(ExecutionOutput::default())
        }
    }

    struct Fails;

    #[async_trait]
    impl JobExecutor for Fails {
        async fn execute(&self, _job: &JobDescriptor) -> ExecResult<ExecutionOutput> {
            Err(ExecutionError::Failed {
                program: "yt-dlp".to_string(),
                status: "exit status: 1".to_string(),
                detail: "ERROR: Unsupported URL".to_string(),
            })
        }
    }

    async fn deliver_one(
        broker: &MemoryBroker,
        payload: &[u8],
    ) -> (MemoryConnection, MemoryChannel, Delivery) {
        let connection = MemoryConnection::connect(broker).await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        let queue = channel.declare_queue("downloads", true).await.unwrap();
        channel.publish(&queue, payload, true).await.unwrap();

        let mut subscription = channel
            .subscribe(&queue, SubscribeOptions::one_at_a_time())
            .await
            .unwrap();
        let delivery = subscription.next_delivery().await.unwrap().unwrap();
        (connection, channel, delivery)
    }

    #[tokio::test]
    async fn test_success_acks_once() {
        let broker = MemoryBroker::new();
        let (connection, channel, delivery) =
            deliver_one(&broker, br#"{"url":"https://example.com/v"}"#).await;
        let tag = delivery.tag;

        let consumer = JobConsumer::new(connection, "downloads", Succeeds);
        let outcome = consumer.handle_delivery(&channel, delivery).await.unwrap();

        assert_eq!(outcome, Outcome::Acked);
        assert_eq!(broker.dispositions(), vec![Disposition::Ack(tag)]);
        assert_eq!(consumer.metrics().jobs_acked, 1);
    }

    #[tokio::test]
    async fn test_executor_failure_rejects_without_requeue() {
        let broker = MemoryBroker::new();
        let (connection, channel, delivery) =
            deliver_one(&broker, br#"{"url":"https://example.com/v"}"#).await;
        let tag = delivery.tag;

        let consumer = JobConsumer::new(connection, "downloads", Fails);
        let outcome = consumer.handle_delivery(&channel, delivery).await.unwrap();

        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(
            broker.dispositions(),
            vec![Disposition::Reject { tag, requeue: false }]
        );
        assert_eq!(broker.queue_depth("downloads"), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected_without_running_executor() {
        let broker = MemoryBroker::new();
        let (connection, channel, delivery) = deliver_one(&broker, b"{not json").await;
        let tag = delivery.tag;

        // Succeeds would ack if it were reached
        let consumer = JobConsumer::new(connection, "downloads", Succeeds);
        let outcome = consumer.handle_delivery(&channel, delivery).await.unwrap();

        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(
            broker.dispositions(),
            vec![Disposition::Reject { tag, requeue: false }]
        );
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let broker = MemoryBroker::new();
        let connection = MemoryConnection::connect(&broker).await.unwrap();
        let mut consumer = JobConsumer::new(connection, "downloads", Succeeds);
        assert_eq!(consumer.state(), ConsumerState::Init);

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = timeout(Duration::from_secs(5), consumer.run(shutdown))
            .await
            .unwrap();

        assert!(result.is_ok());
        assert_eq!(consumer.state(), ConsumerState::Terminated);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.queue_durable("downloads"), Some(true));
    }

    #[tokio::test]
    async fn test_conflicting_queue_is_fatal() {
        let broker = MemoryBroker::new();
        let setup = MemoryConnection::connect(&broker).await.unwrap();
        setup
            .create_channel()
            .await
            .unwrap()
            .declare_queue("downloads", false)
            .await
            .unwrap();

        let connection = MemoryConnection::connect(&broker).await.unwrap();
        let mut consumer = JobConsumer::new(connection, "downloads", Succeeds);

        let result = consumer.run(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ConsumerError::Broker(BrokerError::Declare { .. }))
        ));
        assert_eq!(consumer.state(), ConsumerState::Terminated);
    }
}
