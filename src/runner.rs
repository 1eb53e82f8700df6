//! Supervision of one `aria2c` subprocess.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::DownloaderConfig;
use crate::error::{Error, Result};
use crate::item::resume_artifact_path;

/// Output lines buffered between the pipe readers and the consumer.
const LINE_BUFFER: usize = 256;

/// Whether the downloader should pick up an existing partial file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    Fresh,
    Resume,
}

/// Builds the downloader's argument list: extra arguments first, then the
/// connection settings, destination and URL.
#[must_use]
pub fn build_args(
    config: &DownloaderConfig,
    url: &str,
    save_path: &Path,
    mode: SpawnMode,
) -> Vec<String> {
    let dir = save_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let out = save_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut args = config.extra_args.clone();
    args.extend([
        "-x".to_string(),
        config.connections.to_string(),
        "-s".to_string(),
        config.split.to_string(),
        "--dir".to_string(),
        dir.to_string_lossy().into_owned(),
        "--out".to_string(),
        out,
        "--continue=true".to_string(),
        format!("--summary-interval={}", config.summary_interval_secs),
    ]);
    if mode == SpawnMode::Resume {
        args.push("--always-resume=true".to_string());
    }
    args.push(url.to_string());
    args
}

/// A running downloader. Stdout and stderr are merged into one line stream.
///
/// The child is killed if the runner is dropped without being waited on.
#[derive(Debug)]
pub struct ProcessRunner {
    child: Child,
    lines: mpsc::Receiver<String>,
    save_path: PathBuf,
    grace: Duration,
}

impl ProcessRunner {
    /// Spawns the downloader for `url`, writing to `save_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the destination directory cannot be
    /// created or the binary cannot be started.
    pub async fn spawn(
        config: &DownloaderConfig,
        url: &str,
        save_path: &Path,
        mode: SpawnMode,
    ) -> Result<Self> {
        if let Some(parent) = save_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Spawn {
                    binary: config.binary.display().to_string(),
                    reason: format!("cannot create {}: {e}", parent.display()),
                })?;
        }

        let args = build_args(config, url, save_path, mode);
        let mut child = Command::new(&config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Spawn {
                binary: config.binary.display().to_string(),
                reason: e.to_string(),
            })?;

        log::info!(
            "Spawned {} (pid {}, {mode:?}) for {}",
            config.binary.display(),
            child.id().unwrap_or_default(),
            save_path.display()
        );

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        Ok(Self {
            child,
            lines: rx,
            save_path: save_path.to_path_buf(),
            grace: config.stop_grace(),
        })
    }

    /// Spawns the downloader so it continues from the resume artifact.
    ///
    /// # Errors
    ///
    /// See [`ProcessRunner::spawn`].
    pub async fn resume(config: &DownloaderConfig, url: &str, save_path: &Path) -> Result<Self> {
        Self::spawn(config, url, save_path, SpawnMode::Resume).await
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next output line, or `None` once both pipes are closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Waits for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit status cannot be collected.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Terminates the process and keeps the partial file and resume artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be signalled or reaped.
    pub async fn pause(mut self) -> Result<()> {
        self.terminate().await
    }

    /// Terminates the process and removes the resume artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be reaped or the artifact
    /// cannot be removed.
    pub async fn stop(mut self) -> Result<()> {
        self.terminate().await?;
        discard_resume_artifact(&self.save_path).await
    }

    /// Sends SIGTERM and waits up to the grace period before killing.
    async fn terminate(&mut self) -> Result<()> {
        self.lines.close();
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                let _ = Command::new("kill")
                    .args(["-TERM", &pid.to_string()])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
            }
        }

        if let Ok(status) = tokio::time::timeout(self.grace, self.child.wait()).await {
            status?;
        } else {
            log::warn!(
                "Downloader for {} ignored termination; killing",
                self.save_path.display()
            );
            self.child.kill().await?;
        }
        Ok(())
    }
}

/// Removes the resume artifact that sits next to `save_path`, if any.
///
/// # Errors
///
/// Returns an error if the artifact exists but cannot be removed.
pub async fn discard_resume_artifact(save_path: &Path) -> Result<()> {
    let artifact = resume_artifact_path(save_path);
    if crate::fs::remove_if_exists(&artifact).await? {
        log::debug!("Removed {}", artifact.display());
    }
    Ok(())
}

fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    log::trace!("downloader: {line}");
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}
