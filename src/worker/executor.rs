//! Job executor - runs the external download tool for one job

use crate::job::JobDescriptor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const DEFAULT_PROGRAM: &str = "yt-dlp";

/// Best mp4 video+m4a audio, falling back to any single mp4, then anything
pub const FORMAT_SELECTION: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {detail}")]
    Failed {
        program: String,
        status: String,
        detail: String,
    },
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Captured output of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one job to completion
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &JobDescriptor) -> Result<ExecutionOutput>;
}

/// Arguments for the download tool, in the order it receives them
pub fn download_args(job: &JobDescriptor, download_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-P".to_string(),
        download_path.display().to_string(),
        "-f".to_string(),
        FORMAT_SELECTION.to_string(),
        job.url.clone(),
    ];

    if let Some(name) = &job.name {
        args.push("-o".to_string());
        args.push(name.clone());
    }

    if job.audio_only {
        args.extend(["--audio-format", "mp3", "--extract-audio"].map(String::from));
    }

    if job.keep {
        args.push("-k".to_string());
    }

    args
}

/// Executor backed by the `yt-dlp` command line tool
#[derive(Debug, Clone)]
pub struct YtDlpExecutor {
    program: String,
    download_path: PathBuf,
}

impl YtDlpExecutor {
    pub fn new(download_path: impl Into<PathBuf>) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            download_path: download_path.into(),
        }
    }

    /// Use a different executable (name on PATH or absolute path)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

}

#[async_trait]
impl JobExecutor for YtDlpExecutor {
    async fn execute(&self, job: &JobDescriptor) -> Result<ExecutionOutput> {
        let args = download_args(job, &self.download_path);
        info!(url = %job.url, program = %self.program, "Starting download");
        debug!(?args, "Download command");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: a terminal Ctrl+C stops the worker between jobs
        // and must not kill the download in flight.
        #[cfg(unix)]
        command.process_group(0);

        let output = command
            .output()
            .await
            .map_err(|source| ExecutionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !stdout.is_empty() {
            info!(url = %job.url, "{}", stdout.trim_end());
        }
        if !stderr.is_empty() {
            warn!(url = %job.url, "{}", stderr.trim_end());
        }
        info!(url = %job.url, status = %output.status, "Download finished");

        if !output.status.success() {
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no error output")
                .to_string();

            return Err(ExecutionError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                detail,
            });
        }

        Ok(ExecutionOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(url: &str) -> JobDescriptor {
        JobDescriptor::new(url).unwrap()
    }

    #[test]
    fn test_download_args_minimal() {
        let args = download_args(&job("https://example.com/v.mp4"), Path::new("/downloads"));
        assert_eq!(
            args,
            vec!["-P", "/downloads", "-f", FORMAT_SELECTION, "https://example.com/v.mp4"]
        );
    }

    #[test]
    fn test_download_args_all_options() {
        let job = job("https://example.com/song")
            .with_name(Some("song.mp3".to_string()))
            .with_audio_only(true)
            .with_keep(true);

        let args = download_args(&job, Path::new("/downloads"));
        assert_eq!(
            args,
            vec![
                "-P",
                "/downloads",
                "-f",
                FORMAT_SELECTION,
                "https://example.com/song",
                "-o",
                "song.mp3",
                "--audio-format",
                "mp3",
                "--extract-audio",
                "-k",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let executor =
            YtDlpExecutor::new("/tmp").with_program("mediaq-definitely-not-installed-xyz");

        let result = executor.execute(&job("https://example.com/v")).await;
        assert!(matches!(result, Err(ExecutionError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_decides_outcome() {
        let target = job("https://example.com/v");

        let ok = YtDlpExecutor::new("/tmp").with_program("true");
        assert!(ok.execute(&target).await.is_ok());

        let failing = YtDlpExecutor::new("/tmp").with_program("false");
        assert!(matches!(
            failing.execute(&target).await,
            Err(ExecutionError::Failed { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_download_runs_in_its_own_process_group() {
        use std::os::unix::fs::PermissionsExt;

        let bin_dir = tempfile::TempDir::new().unwrap();
        let tool = bin_dir.path().join("fake-yt-dlp");
        // Prints its pid and its process group id (field 5 of /proc/<pid>/stat)
        std::fs::write(
            &tool,
            "#!/bin/sh\necho \"$$ $(cut -d' ' -f5 /proc/$$/stat)\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = YtDlpExecutor::new("/tmp").with_program(tool.display().to_string());
        let output = executor.execute(&job("https://example.com/v")).await.unwrap();

        let ids: Vec<u32> = output
            .stdout
            .split_whitespace()
            .map(|id| id.parse().unwrap())
            .collect();
        assert_eq!(ids.len(), 2);
        // Group leader of a fresh group, so a terminal SIGINT to the
        // worker's group never reaches it
        assert_eq!(ids[0], ids[1]);
        let own_stat = std::fs::read_to_string("/proc/self/stat").unwrap();
        let own_group: u32 = own_stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().nth(2))
            .unwrap()
            .parse()
            .unwrap();
        assert_ne!(ids[1], own_group);
    }
}
