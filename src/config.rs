//! Configuration for the orchestrator, its subprocesses and its store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the external downloader is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Path to the `aria2c` binary.
    pub binary: PathBuf,
    /// Arguments placed before the generated ones.
    pub extra_args: Vec<String>,
    /// Maximum connections per server (`-x`).
    pub connections: u32,
    /// Number of segments per download (`-s`).
    pub split: u32,
    /// Seconds between progress summaries (`--summary-interval`).
    pub summary_interval_secs: u32,
    /// How long a terminated downloader may take to exit before it is killed.
    pub stop_grace_ms: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary: resolve_binary(),
            extra_args: Vec::new(),
            connections: 16,
            split: 16,
            summary_interval_secs: 1,
            stop_grace_ms: 3_000,
        }
    }
}

impl DownloaderConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the downloader binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets arguments passed ahead of the generated ones.
    #[must_use]
    pub fn with_extra_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets connections per server and segment count.
    #[must_use]
    pub const fn with_connections(mut self, connections: u32, split: u32) -> Self {
        self.connections = connections;
        self.split = split;
        self
    }

    /// Sets the termination grace period.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Locates `aria2c`: `$DADALOADER_ARIA2C`, then well-known install paths,
/// then `PATH`. Falls back to the bare name so spawning reports the error.
#[must_use]
pub fn resolve_binary() -> PathBuf {
    if let Some(path) = std::env::var_os("DADALOADER_ARIA2C").filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    let name = if cfg!(target_os = "windows") {
        "aria2c.exe"
    } else {
        "aria2c"
    };

    let mut candidates = Vec::new();
    if cfg!(target_os = "macos") {
        candidates.push(PathBuf::from("/opt/homebrew/bin/aria2c"));
        candidates.push(PathBuf::from("/usr/local/bin/aria2c"));
    }
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/usr/bin/aria2c"));
        candidates.push(PathBuf::from("/usr/local/bin/aria2c"));
    }
    if let Some(path_var) = std::env::var_os("PATH") {
        candidates.extend(std::env::split_paths(&path_var).map(|dir| dir.join(name)));
    }

    candidates
        .into_iter()
        .find(|p| p.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Where downloads and state records live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory for downloads added without an absolute path.
    pub download_dir: PathBuf,
    /// Directory holding one record file per download.
    pub state_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let download_dir = dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("AsyncDADAloader");

        // systemd sets STATE_DIRECTORY when `StateDirectory=` is configured
        let state_dir = std::env::var_os("STATE_DIRECTORY").map_or_else(
            || {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("dadaloader")
                    .join("downloads")
            },
            |dir| PathBuf::from(dir).join("downloads"),
        );

        Self {
            download_dir,
            state_dir,
        }
    }
}

/// Write-rate and retry policy for the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Minimum time between progress-only writes for one download.
    pub progress_interval_ms: u64,
    /// Attempts per write before durability is flagged as degraded.
    pub retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 1_000,
            retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Backoff before retry number `attempt` (starting at 1).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub downloader: DownloaderConfig,
    pub paths: PathConfig,
    pub persistence: PersistenceConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dadaloader")
            .join("config.toml")
    }

    /// Loads configuration from `path`, writing the defaults there first if
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or created.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            return toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())));
        }

        let config = Self::default();
        config.save(path)?;
        log::info!("Wrote default configuration to {}", path.display());
        Ok(config)
    }

    /// Writes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    #[must_use]
    pub fn with_downloader(mut self, downloader: DownloaderConfig) -> Self {
        self.downloader = downloader;
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.state_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.download_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }
}
