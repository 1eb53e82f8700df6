//! The download entity and its lifecycle state machine.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::parser::ProgressSample;

/// Identifier of a download, assigned sequentially from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub u64);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Error,
    Stopped,
}

/// Commands and downloader events that move a download between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Pause,
    Resume,
    Stop,
    Retry,
    /// The downloader reported success.
    Complete,
    /// The downloader could not be spawned or exited with a failure.
    Fail,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Downloading => "Downloading",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Error => "Error",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Retry => "retry",
            Self::Complete => "complete",
            Self::Fail => "fail",
        };
        f.write_str(s)
    }
}

impl DownloadStatus {
    /// Returns the status reached by applying `action`, or `None` if the
    /// action is not legal from this status.
    #[must_use]
    pub const fn transition(self, action: Action) -> Option<Self> {
        use Action as A;
        use DownloadStatus as S;

        match (self, action) {
            (S::Pending, A::Start) | (S::Paused, A::Resume) => Some(S::Downloading),
            (S::Downloading, A::Pause) => Some(S::Paused),
            (S::Downloading, A::Complete) => Some(S::Completed),
            (S::Downloading | S::Paused, A::Fail) => Some(S::Error),
            (S::Pending | S::Downloading | S::Paused, A::Stop) => Some(S::Stopped),
            (S::Error, A::Retry) => Some(S::Pending),
            (
                S::Pending,
                A::Pause | A::Resume | A::Retry | A::Complete | A::Fail,
            )
            | (S::Downloading, A::Start | A::Resume | A::Retry)
            | (S::Paused, A::Start | A::Pause | A::Retry | A::Complete)
            | (S::Error, A::Start | A::Pause | A::Resume | A::Stop | A::Complete | A::Fail)
            | (S::Completed | S::Stopped, _) => None,
        }
    }

    /// Completed and Stopped accept no further actions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

/// Path of the control file `aria2c` keeps next to a partial download.
#[must_use]
pub fn resume_artifact_path(save_path: &Path) -> PathBuf {
    let mut name = save_path.as_os_str().to_os_string();
    name.push(".aria2");
    PathBuf::from(name)
}

/// One download and its last known progress.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadItem {
    pub id: DownloadId,
    pub url: String,
    pub save_path: PathBuf,
    /// `None` until the downloader reports a size.
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
    pub speed_bytes_per_sec: u64,
    pub eta_seconds: Option<u64>,
    pub status: DownloadStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadItem {
    /// Creates a Pending download.
    #[must_use]
    pub fn new(id: DownloadId, url: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id,
            url: url.into(),
            save_path: save_path.into(),
            total_bytes: None,
            downloaded_bytes: 0,
            speed_bytes_per_sec: 0,
            eta_seconds: None,
            status: DownloadStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the resume control file path for this download.
    #[must_use]
    pub fn resume_artifact(&self) -> PathBuf {
        resume_artifact_path(&self.save_path)
    }

    /// Completion percentage, when the total size is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some(self.downloaded_bytes as f64 * 100.0 / total as f64),
            _ if self.status == DownloadStatus::Completed => Some(100.0),
            _ => None,
        }
    }

    /// Applies `action` if legal, returning the previous status.
    ///
    /// Leaving Downloading zeroes the speed and forgets the ETA. `last_error`
    /// is cleared on every transition except into Error, where the caller
    /// sets it.
    pub fn apply(&mut self, action: Action) -> Option<DownloadStatus> {
        let next = self.status.transition(action)?;
        let previous = self.status;
        self.status = next;
        if next != DownloadStatus::Downloading {
            self.speed_bytes_per_sec = 0;
            self.eta_seconds = None;
        }
        if next != DownloadStatus::Error {
            self.last_error = None;
        }
        self.touch();
        Some(previous)
    }

    /// Moves to Error with the given reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Option<DownloadStatus> {
        let previous = self.apply(Action::Fail)?;
        self.last_error = Some(reason.into());
        Some(previous)
    }

    /// The recorded failure of a download in Error, as [`Error::Download`].
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        match (self.status, &self.last_error) {
            (DownloadStatus::Error, Some(reason)) => Some(Error::Download(reason.clone())),
            _ => None,
        }
    }

    /// Merges a parsed progress sample. Unknown fields keep their previous
    /// value except the ETA, which becomes unknown.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn apply_progress(&mut self, sample: &ProgressSample) {
        if let Some(total) = sample.total_bytes.filter(|&t| t > 0) {
            self.total_bytes = Some(total);
        }
        if let Some(done) = sample.downloaded_bytes {
            self.downloaded_bytes = done;
        } else if let (Some(pct), Some(total)) = (sample.percent, self.total_bytes) {
            self.downloaded_bytes = (total as f64 * pct.clamp(0.0, 100.0) / 100.0) as u64;
        }
        if let Some(total) = self.total_bytes {
            self.downloaded_bytes = self.downloaded_bytes.min(total);
        }
        if let Some(speed) = sample.speed_bytes_per_sec {
            self.speed_bytes_per_sec = speed;
        }
        self.eta_seconds = sample.eta_seconds;
        self.touch();
    }

    /// Marks the transfer complete. `file_len` is the size found on disk and
    /// fills in an unknown total.
    pub fn complete(&mut self, file_len: Option<u64>) -> Option<DownloadStatus> {
        let previous = self.apply(Action::Complete)?;
        let total = self
            .total_bytes
            .or(file_len)
            .unwrap_or(self.downloaded_bytes);
        self.total_bytes = Some(total);
        self.downloaded_bytes = total;
        Some(previous)
    }

    /// Bumps `updated_at`, keeping it strictly increasing.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }
}
