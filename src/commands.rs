use crate::cli::SendArgs;
use crate::prompt::{self, PromptError};
use mediaq::config::{ConfigError, Settings};
use mediaq::job::{JobDescriptor, JobError};
use mediaq::messaging::{AmqpConnection, BrokerError};
use mediaq::queue::{JobPublisher, PublishError};
use mediaq::shutdown;
use mediaq::worker::{self, DependencyError, DependencyGate, WorkerError};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Categorized startup/runtime failures; each maps to exit status 1
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    Input(#[from] JobError),

    #[error("{0}")]
    Prompt(#[from] PromptError),

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Connection error: {0}")]
    Connection(#[from] BrokerError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Worker failed: {0}")]
    Worker(WorkerError),
}

impl From<WorkerError> for CommandError {
    fn from(value: WorkerError) -> Self {
        match value {
            WorkerError::Dependency(e) => CommandError::Dependency(e),
            WorkerError::Connection(e) => CommandError::Connection(e),
            other => CommandError::Worker(other),
        }
    }
}

/// `mediaq send`: validate input, then publish one job
pub async fn send(config: Option<PathBuf>, args: SendArgs) -> Result<(), CommandError> {
    let url = match args.url {
        Some(url) => url,
        None => prompt::ask_url().inspect_err(|e| {
            if matches!(e, PromptError::Cancelled) {
                println!("\nOperation cancelled. Exiting.");
            }
        })?,
    };

    // Bad input is reported before any configuration or network work
    let job = JobDescriptor::new(url)?
        .with_name(args.name)
        .with_audio_only(args.audio)
        .with_keep(args.keep);

    let settings = Settings::load(config)?;
    let connection = AmqpConnection::connect(&settings.broker).await?;

    let payload = JobPublisher::new(connection, settings.broker.queue.as_str())
        .publish(&job)
        .await?;

    println!("Successfully sent to processing queue:");
    println!("{}", String::from_utf8_lossy(&payload));
    Ok(())
}

/// `mediaq worker`: run the consumer until SIGINT/SIGTERM
pub async fn worker(config: Option<PathBuf>) -> Result<(), CommandError> {
    let settings = Settings::load(config)?;
    info!(broker = ?settings.broker, download_path = %settings.downloader.path.display(), "Worker starting");

    let shutdown_token = CancellationToken::new();
    let listener = shutdown::cancel_on_signal(shutdown_token.clone());

    let result = worker::run(&settings, &DependencyGate::default(), shutdown_token.clone()).await;

    shutdown_token.cancel();
    let _ = listener.await;

    result.map_err(Into::into)
}

/// `mediaq check-deps`
pub fn check_deps() -> Result<(), CommandError> {
    let gate = DependencyGate::default();
    gate.verify()?;

    println!("Found all {} required dependencies:", gate.required().len());
    for cmd in gate.required() {
        println!("  ✓ {}", cmd);
    }
    Ok(())
}
