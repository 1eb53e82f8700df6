//! Push notifications for presentation layers.

use crate::item::{DownloadId, DownloadItem, DownloadStatus};

/// Snapshot of the fields a front end renders for one download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadUpdate {
    pub id: DownloadId,
    pub status: DownloadStatus,
    pub percent: Option<f64>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: u64,
    pub eta_seconds: Option<u64>,
    pub last_error: Option<String>,
}

impl From<&DownloadItem> for DownloadUpdate {
    fn from(item: &DownloadItem) -> Self {
        Self {
            id: item.id,
            status: item.status,
            percent: item.percent(),
            downloaded_bytes: item.downloaded_bytes,
            total_bytes: item.total_bytes,
            speed_bytes_per_sec: item.speed_bytes_per_sec,
            eta_seconds: item.eta_seconds,
            last_error: item.last_error.clone(),
        }
    }
}

/// Events broadcast by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// A download changed status or reported progress.
    Updated(DownloadUpdate),
    /// A download was deleted.
    Removed(DownloadId),
    /// A write to the store failed after all retries; state is in memory only.
    DurabilityDegraded,
    /// A write succeeded again after a degraded period.
    DurabilityRestored,
}

impl DownloadEvent {
    /// The download this event concerns, if any.
    #[must_use]
    pub const fn id(&self) -> Option<DownloadId> {
        match self {
            Self::Updated(update) => Some(update.id),
            Self::Removed(id) => Some(*id),
            Self::DurabilityDegraded | Self::DurabilityRestored => None,
        }
    }
}
