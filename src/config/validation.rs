use super::models::Settings;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("rabbitmq.port must be non-zero")]
    ZeroPort,

    #[error("downloader.path '{0}' exists but is not a directory")]
    DownloadPathNotDirectory(String),
}

/// Validate resolved settings before anything touches the network
pub fn validate(settings: &Settings) -> Result<(), ValidationError> {
    validate_broker(settings)?;
    validate_downloader(settings)?;
    Ok(())
}

fn validate_broker(settings: &Settings) -> Result<(), ValidationError> {
    let broker = &settings.broker;

    if broker.host.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "rabbitmq.host",
        });
    }

    if broker.queue.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "rabbitmq.queue",
        });
    }

    if broker.port == 0 {
        return Err(ValidationError::ZeroPort);
    }

    Ok(())
}

/// The tool creates the directory itself, so only an existing non-directory
/// is rejected.
fn validate_downloader(settings: &Settings) -> Result<(), ValidationError> {
    let path = &settings.downloader.path;

    if path.as_os_str().is_empty() {
        return Err(ValidationError::Empty {
            field: "downloader.path",
        });
    }

    if path.exists() && !path.is_dir() {
        return Err(ValidationError::DownloadPathNotDirectory(
            path.display().to_string(),
        ));
    }

    Ok(())
}
