//! dadaloader - a headless download orchestrator around `aria2c`.
//!
//! The library keeps a registry of downloads, runs one `aria2c` process per
//! active download, turns its console output into progress, and mirrors
//! every change into a durable store and a broadcast event stream. It has
//! no user interface of its own.
//!
//! # Example
//!
//! ```no_run
//! use dadaloader::{AppConfig, Orchestrator};
//!
//! # async fn example() -> dadaloader::Result<()> {
//! let config = AppConfig::load_or_create(&AppConfig::default_path())?;
//! let orchestrator = Orchestrator::new(config);
//!
//! // Pick up downloads from a previous run
//! orchestrator.restore_from_store().await?;
//!
//! let id = orchestrator
//!     .add("https://example.com/f.zip", "/tmp/f.zip")
//!     .await?;
//! orchestrator.start(id).await?;
//!
//! let mut events = orchestrator.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod fs;
pub mod item;
pub mod orchestrator;
pub mod parser;
pub mod runner;
pub mod store;

// Re-export main types for convenience
pub use config::{AppConfig, DownloaderConfig, PathConfig, PersistenceConfig};
pub use error::{Error, Result};
pub use events::{DownloadEvent, DownloadUpdate};
pub use format::{format_bytes, format_eta, format_percent, format_speed};
pub use item::{Action, DownloadId, DownloadItem, DownloadStatus};
pub use orchestrator::{Orchestrator, validate_url};
pub use parser::{ProgressEvent, ProgressParser, ProgressSample};
pub use runner::{ProcessRunner, SpawnMode};
pub use store::{DownloadRecord, MemoryStore, PersistenceStore, TomlStore, UpsertOutcome};
