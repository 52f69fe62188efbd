//! Download worker
//!
//! Startup order: dependency gate, broker connection, then the consumer loop.
//! Nothing touches the network until the gate has passed.

pub mod dependencies;
pub mod executor;

pub use dependencies::{DEFAULT_DEPENDENCIES, DependencyError, DependencyGate};
pub use executor::{
    ExecutionError, ExecutionOutput, FORMAT_SELECTION, JobExecutor, YtDlpExecutor, download_args,
};

use crate::config::Settings;
use crate::messaging::{AmqpConnection, BrokerConnection, BrokerError};
use crate::queue::{ConsumerError, JobConsumer};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Connection(#[from] BrokerError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

/// Run the worker against RabbitMQ until `shutdown` is cancelled
pub async fn run(
    settings: &Settings,
    gate: &DependencyGate,
    shutdown: CancellationToken,
) -> Result<(), WorkerError> {
    let executor = YtDlpExecutor::new(settings.downloader.path.clone());
    start(
        gate,
        AmqpConnection::connect(&settings.broker),
        &settings.broker.queue,
        executor,
        shutdown,
    )
    .await
}

/// Gate, connect, consume. `connect` is only awaited once the gate passed.
pub async fn start<C, E, F>(
    gate: &DependencyGate,
    connect: F,
    queue: &str,
    executor: E,
    shutdown: CancellationToken,
) -> Result<(), WorkerError>
where
    C: BrokerConnection,
    E: JobExecutor,
    F: Future<Output = Result<C, BrokerError>>,
{
    gate.verify()?;

    let connection = connect.await?;
    info!(queue, "Worker connected");

    let mut consumer = JobConsumer::new(connection, queue, executor);
    consumer.run(shutdown).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{MemoryBroker, MemoryConnection};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_dependency_stops_before_connecting() {
        let broker = MemoryBroker::new();
        let empty_dir = TempDir::new().unwrap();
        let gate = DependencyGate::new(["mediaq-missing-tool"]).with_search_path(empty_dir.path());

        let result = start(
            &gate,
            MemoryConnection::connect(&broker),
            "downloads",
            YtDlpExecutor::new("/tmp"),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(WorkerError::Dependency(_))));
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.queue_durable("downloads"), None);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_connection_error() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);

        let result = start(
            &DependencyGate::new(Vec::<String>::new()),
            MemoryConnection::connect(&broker),
            "downloads",
            YtDlpExecutor::new("/tmp"),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(WorkerError::Connection(BrokerError::Connect(_)))
        ));
    }

    #[tokio::test]
    async fn test_clean_shutdown_is_ok() {
        let broker = MemoryBroker::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = start(
            &DependencyGate::new(Vec::<String>::new()),
            MemoryConnection::connect(&broker),
            "downloads",
            YtDlpExecutor::new("/tmp"),
            shutdown,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(broker.open_connections(), 0);
    }
}
