//! Error types for the dadaloader library.

use thiserror::Error;

use crate::item::{Action, DownloadId, DownloadStatus};

/// Errors that can occur during download orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// The URL handed to `add` is not a fetchable URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// No download with this id is registered.
    #[error("download {0} not found")]
    NotFound(DownloadId),

    /// The command is not legal for the download's current status.
    #[error("cannot {action} download {id} while it is {status}")]
    IllegalTransition {
        /// Download the command targeted.
        id: DownloadId,
        /// Rejected command.
        action: Action,
        /// Status the download was in.
        status: DownloadStatus,
    },

    /// The downloader binary could not be started.
    #[error("failed to spawn {binary}: {reason}")]
    Spawn {
        /// Binary that was invoked.
        binary: String,
        /// OS-level reason.
        reason: String,
    },

    /// The downloader ran but the transfer failed. Reported for a download
    /// in Error by [`DownloadItem::failure`](crate::item::DownloadItem::failure).
    #[error("download failed: {0}")]
    Download(String),

    /// The durable store rejected a read or write.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Configuration file could not be read or written.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for dadaloader operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_message_names_action_and_status() {
        let err = Error::IllegalTransition {
            id: DownloadId(7),
            action: Action::Pause,
            status: DownloadStatus::Paused,
        };
        assert_eq!(err.to_string(), "cannot pause download 7 while it is Paused");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
