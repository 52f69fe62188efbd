//! Preflight check that the external tools are installed

use std::ffi::OsString;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

/// Tools the worker shells out to
pub const DEFAULT_DEPENDENCIES: [&str; 2] = ["yt-dlp", "ffmpeg"];

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("missing required commands: {}", .0.join(", "))]
    Missing(Vec<String>),
}

/// Gate run once before the consumer connects
#[derive(Debug, Clone)]
pub struct DependencyGate {
    required: Vec<String>,
    search_path: Option<OsString>,
}

impl Default for DependencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEPENDENCIES)
    }
}

impl DependencyGate {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            search_path: None,
        }
    }

    /// Resolve against `path` (PATH syntax) instead of the process PATH
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Required commands that cannot be resolved, in declaration order
    pub fn missing(&self) -> Vec<String> {
        self.required
            .iter()
            .filter(|cmd| !self.resolvable(cmd))
            .cloned()
            .collect()
    }

    fn resolvable(&self, command: &str) -> bool {
        match &self.search_path {
            Some(paths) => which::which_in(command, Some(paths), Path::new(".")).is_ok(),
            None => which::which(command).is_ok(),
        }
    }

    /// Log the outcome and fail if anything is missing
    pub fn verify(&self) -> Result<(), DependencyError> {
        let missing = self.missing();

        if !missing.is_empty() {
            for cmd in &missing {
                error!(command = %cmd, "Required command not found");
            }
            return Err(DependencyError::Missing(missing));
        }

        info!(
            total = self.required.len(),
            commands = %self.required.join(", "),
            "Dependency check passed"
        );
        Ok(())
    }
}
