//! The download registry and its command surface.
//!
//! Every command for a download is serialized on that download's own lock;
//! commands for different downloads never wait on each other. Each running
//! download is driven by one spawned task that feeds downloader output
//! through a [`ProgressParser`] into the item. Every status transition is
//! written to the store before the command returns.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::events::{DownloadEvent, DownloadUpdate};
use crate::item::{Action, DownloadId, DownloadItem, DownloadStatus};
use crate::parser::{ProgressEvent, ProgressParser};
use crate::runner::{ProcessRunner, SpawnMode, discard_resume_artifact};
use crate::store::{DownloadRecord, PersistenceStore, TomlStore, UpsertOutcome};

/// Capacity of the event channel; slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 1024;

/// Extra time a halted worker gets beyond the downloader's grace period.
const WORKER_JOIN_SLACK: Duration = Duration::from_secs(5);

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ftp", "sftp"];

/// Why a worker was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Pause,
    Stop,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Slot {
    item: DownloadItem,
    worker: Option<Worker>,
    /// Set by a command before it cancels the worker; the worker then
    /// leaves the item alone.
    halt: Option<Halt>,
    removed: bool,
}

struct Entry {
    commands: tokio::sync::Mutex<()>,
    slot: Mutex<Slot>,
}

impl Entry {
    fn new(item: DownloadItem) -> Self {
        Self {
            commands: tokio::sync::Mutex::new(()),
            slot: Mutex::new(Slot {
                item,
                worker: None,
                halt: None,
                removed: false,
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check(slot: &Slot, id: DownloadId, action: Action) -> Result<()> {
    if slot.removed {
        return Err(Error::NotFound(id));
    }
    if slot.item.status.transition(action).is_none() {
        return Err(Error::IllegalTransition {
            id,
            action,
            status: slot.item.status,
        });
    }
    Ok(())
}

/// Checks that `raw` is an absolute URL the downloader can fetch.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] for unparsable URLs, unsupported schemes
/// and URLs without a host.
pub fn validate_url(raw: &str) -> Result<url::Url> {
    let trimmed = raw.trim();
    let parsed =
        url::Url::parse(trimmed).map_err(|e| Error::InvalidUrl(format!("{trimmed}: {e}")))?;
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(Error::InvalidUrl(format!(
            "{trimmed}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(format!("{trimmed}: missing host")));
    }
    Ok(parsed)
}

struct Inner<S> {
    config: AppConfig,
    store: S,
    entries: RwLock<BTreeMap<DownloadId, Arc<Entry>>>,
    next_id: AtomicU64,
    /// Set once `next_id` is past every id the store already holds.
    ids_seeded: tokio::sync::OnceCell<()>,
    events: broadcast::Sender<DownloadEvent>,
    degraded: AtomicBool,
}

/// Owns every download and drives their downloaders.
///
/// Cloning is cheap; clones share the same registry.
pub struct Orchestrator<S: PersistenceStore = TomlStore> {
    inner: Arc<Inner<S>>,
}

impl<S: PersistenceStore> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Orchestrator<TomlStore> {
    /// Creates an orchestrator backed by a [`TomlStore`] in the configured
    /// state directory.
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let store = TomlStore::new(&config.paths.state_dir);
        Self::with_store(config, store)
    }
}

impl<S: PersistenceStore> Orchestrator<S> {
    /// Creates an orchestrator with a custom store.
    #[must_use]
    pub fn with_store(config: AppConfig, store: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                entries: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                ids_seeded: tokio::sync::OnceCell::new(),
                events,
                degraded: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Subscribes to download events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the last store write failed after all retries.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    /// Loads every stored record into the registry.
    ///
    /// Records left in Downloading by a previous run have no live process
    /// and come back as Paused. Returns the number of downloads restored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    pub async fn restore_from_store(&self) -> Result<usize> {
        let records = self.inner.store.list_all().await?;
        self.raise_next_id(&records);
        let _ = self.inner.ids_seeded.set(());

        let mut interrupted = Vec::new();
        let restored = {
            let mut entries = self.entries_mut();
            let mut restored = 0;
            for record in records {
                if entries.contains_key(&record.id) {
                    continue;
                }
                let mut item = DownloadItem::from(record);
                if item.status == DownloadStatus::Downloading {
                    item.apply(Action::Pause);
                    interrupted.push(DownloadRecord::from(&item));
                }
                entries.insert(item.id, Arc::new(Entry::new(item)));
                restored += 1;
            }
            restored
        };

        for record in &interrupted {
            self.persist(record).await;
        }

        log::info!(
            "Restored {restored} downloads ({} interrupted, now paused)",
            interrupted.len()
        );
        Ok(restored)
    }

    /// Registers a Pending download and persists it.
    ///
    /// A relative `save_path` is placed in the download directory, and a
    /// path without a file name gets one derived from the URL. If the path
    /// is taken by another download or an existing file, `_1`, `_2`, … is
    /// inserted before the extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` is not a fetchable URL, or
    /// [`Error::Persistence`] if the store cannot be listed to pick the
    /// first id.
    pub async fn add(&self, url: &str, save_path: impl AsRef<Path>) -> Result<DownloadId> {
        let parsed = validate_url(url)?;
        let mut wanted = save_path.as_ref().to_path_buf();
        if wanted.is_relative() {
            wanted = self.inner.config.paths.download_dir.join(wanted);
        }
        if wanted.file_name().is_none() || wanted.as_os_str().to_string_lossy().ends_with('/') {
            wanted = wanted.join(default_file_name(&parsed));
        }
        self.register(url.trim(), &wanted).await
    }

    /// Registers a download into the download directory, named after the
    /// last segment of the URL path.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::add`].
    pub async fn add_to_default_dir(&self, url: &str) -> Result<DownloadId> {
        let parsed = validate_url(url)?;
        let wanted = self
            .inner
            .config
            .paths
            .download_dir
            .join(default_file_name(&parsed));
        self.register(url.trim(), &wanted).await
    }

    async fn register(&self, url: &str, wanted: &Path) -> Result<DownloadId> {
        self.seed_ids().await?;
        let item = {
            let mut entries = self.entries_mut();
            let taken: HashSet<PathBuf> = entries
                .values()
                .map(|entry| entry.slot().item.save_path.clone())
                .collect();
            let save_path = crate::fs::unique_save_path(wanted, &taken);
            let id = DownloadId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
            let item = DownloadItem::new(id, url, save_path);
            entries.insert(id, Arc::new(Entry::new(item.clone())));
            item
        };

        log::info!("Added download {} -> {}", item.id, item.save_path.display());
        self.persist(&DownloadRecord::from(&item)).await;
        self.emit_update(&item);
        Ok(item.id)
    }

    /// Moves id allocation past every stored record, once, so a download
    /// added before [`Orchestrator::restore_from_store`] cannot take the id
    /// of a record from a previous run.
    async fn seed_ids(&self) -> Result<()> {
        self.inner
            .ids_seeded
            .get_or_try_init(|| async {
                let records = self.inner.store.list_all().await?;
                self.raise_next_id(&records);
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    fn raise_next_id(&self, records: &[DownloadRecord]) {
        if let Some(max) = records.iter().map(|r| r.id.0).max() {
            self.inner.next_id.fetch_max(max + 1, Ordering::SeqCst);
        }
    }

    /// Spawns the downloader for a Pending download.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`], [`Error::IllegalTransition`], or
    /// [`Error::Spawn`] when the downloader cannot be started. In the last
    /// case the download is left in Error.
    pub async fn start(&self, id: DownloadId) -> Result<()> {
        let entry = self.entry(id)?;
        let _commands = entry.commands.lock().await;
        check(&entry.slot(), id, Action::Start)?;
        self.launch(&entry, id, Action::Start, SpawnMode::Fresh).await
    }

    /// Terminates the downloader of a Downloading download, keeping its
    /// partial data and resume artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::IllegalTransition`].
    pub async fn pause(&self, id: DownloadId) -> Result<()> {
        let entry = self.entry(id)?;
        let _commands = entry.commands.lock().await;
        self.halt(&entry, id, Action::Pause).await
    }

    /// Restarts the downloader of a Paused download with the resume flag.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::start`].
    pub async fn resume(&self, id: DownloadId) -> Result<()> {
        let entry = self.entry(id)?;
        let _commands = entry.commands.lock().await;
        check(&entry.slot(), id, Action::Resume)?;
        self.launch(&entry, id, Action::Resume, SpawnMode::Resume).await
    }

    /// Stops a Pending, Downloading or Paused download for good and
    /// discards its resume artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::IllegalTransition`].
    pub async fn stop(&self, id: DownloadId) -> Result<()> {
        let entry = self.entry(id)?;
        let _commands = entry.commands.lock().await;
        self.halt(&entry, id, Action::Stop).await
    }

    /// Moves an Error download back to Pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::IllegalTransition`].
    pub async fn retry(&self, id: DownloadId) -> Result<()> {
        let entry = self.entry(id)?;
        let _commands = entry.commands.lock().await;
        self.reap(&entry, id).await?;
        let item = {
            let mut slot = entry.slot();
            check(&slot, id, Action::Retry)?;
            slot.item.apply(Action::Retry);
            slot.item.clone()
        };
        log::info!("Download {id} queued for retry");
        self.commit(&item).await;
        Ok(())
    }

    /// Removes a download from the registry and the store, stopping it
    /// first if it is running. With `also_delete_file` the destination and
    /// its resume artifact are removed too; missing files are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown ids.
    pub async fn delete(&self, id: DownloadId, also_delete_file: bool) -> Result<()> {
        let entry = self.entry(id)?;
        let _commands = entry.commands.lock().await;

        let (was_running, worker) = {
            let mut slot = entry.slot();
            if slot.removed {
                return Err(Error::NotFound(id));
            }
            let running = slot.item.status == DownloadStatus::Downloading;
            if running {
                slot.halt = Some(Halt::Stop);
            }
            (running, slot.worker.take())
        };
        if let Some(worker) = worker {
            self.join_worker(id, worker).await;
        }

        let item = {
            let mut slot = entry.slot();
            if was_running {
                slot.item.apply(Action::Stop);
            }
            slot.halt = None;
            slot.removed = true;
            slot.item.clone()
        };
        self.entries_mut().remove(&id);

        self.remove_record(id).await;

        if was_running {
            if let Err(e) = discard_resume_artifact(&item.save_path).await {
                log::warn!("Could not remove resume artifact for download {id}: {e}");
            }
        }
        if also_delete_file {
            for path in [item.save_path.clone(), item.resume_artifact()] {
                if let Err(e) = crate::fs::remove_if_exists(&path).await {
                    log::warn!("Could not remove {}: {e}", path.display());
                }
            }
        }

        log::info!("Deleted download {id}");
        self.emit(DownloadEvent::Removed(id));
        Ok(())
    }

    /// Snapshot of one download.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown ids.
    pub fn get(&self, id: DownloadId) -> Result<DownloadItem> {
        Ok(self.entry(id)?.slot().item.clone())
    }

    /// Snapshot of every download, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<DownloadItem> {
        let mut items: Vec<DownloadItem> = self
            .entries()
            .values()
            .map(|entry| entry.slot().item.clone())
            .collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items
    }

    /// Number of downloads currently Downloading.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries()
            .values()
            .filter(|entry| entry.slot().item.status == DownloadStatus::Downloading)
            .count()
    }

    /// Pauses every Downloading download. Returns how many were paused.
    pub async fn pause_all(&self) -> usize {
        let active: Vec<DownloadId> = self
            .list()
            .into_iter()
            .filter(|item| item.status == DownloadStatus::Downloading)
            .map(|item| item.id)
            .collect();

        let results = futures::future::join_all(active.iter().map(|&id| self.pause(id))).await;
        results
            .into_iter()
            .zip(active)
            .filter(|(result, id)| match result {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("Download {id} not paused: {e}");
                    false
                }
            })
            .count()
    }

    // ------------------------------------------------------------------
    // Command internals
    // ------------------------------------------------------------------

    /// Spawns the downloader and moves the item to Downloading, or to Error
    /// if spawning fails.
    async fn launch(
        &self,
        entry: &Arc<Entry>,
        id: DownloadId,
        action: Action,
        mode: SpawnMode,
    ) -> Result<()> {
        self.reap(entry, id).await?;
        let (url, save_path) = {
            let slot = entry.slot();
            (slot.item.url.clone(), slot.item.save_path.clone())
        };

        let runner =
            match ProcessRunner::spawn(&self.inner.config.downloader, &url, &save_path, mode).await
            {
                Ok(runner) => runner,
                Err(e) => {
                    let item = {
                        let mut slot = entry.slot();
                        slot.item.apply(action);
                        slot.item.fail(e.to_string());
                        slot.item.clone()
                    };
                    log::error!("Download {id} could not start: {e}");
                    self.commit(&item).await;
                    return Err(e);
                }
            };

        let item = {
            let mut slot = entry.slot();
            slot.item.apply(action);
            slot.halt = None;
            slot.item.clone()
        };
        self.commit(&item).await;

        let token = CancellationToken::new();
        let mut slot = entry.slot();
        let handle = tokio::spawn(self.clone().drive(
            id,
            Arc::clone(entry),
            runner,
            token.clone(),
        ));
        slot.worker = Some(Worker { token, handle });
        Ok(())
    }

    /// Cancels the worker (if any), applies `action` and persists it.
    async fn halt(&self, entry: &Arc<Entry>, id: DownloadId, action: Action) -> Result<()> {
        let worker = {
            let mut slot = entry.slot();
            check(&slot, id, action)?;
            slot.halt = Some(if action == Action::Stop {
                Halt::Stop
            } else {
                Halt::Pause
            });
            slot.worker.take()
        };
        if let Some(worker) = worker {
            self.join_worker(id, worker).await;
        }

        let item = {
            let mut slot = entry.slot();
            slot.halt = None;
            if slot.item.apply(action).is_none() {
                return Err(Error::IllegalTransition {
                    id,
                    action,
                    status: slot.item.status,
                });
            }
            slot.item.clone()
        };

        if action == Action::Stop {
            if let Err(e) = discard_resume_artifact(&item.save_path).await {
                log::warn!("Could not remove resume artifact for download {id}: {e}");
            }
        }

        log::info!("Download {id} {}", item.status);
        self.commit(&item).await;
        Ok(())
    }

    /// Joins a finished worker left behind by a completed or failed run, so
    /// its final write lands before the next command's.
    async fn reap(&self, entry: &Entry, id: DownloadId) -> Result<()> {
        let worker = {
            let mut slot = entry.slot();
            if slot.removed {
                return Err(Error::NotFound(id));
            }
            slot.worker.take()
        };
        if let Some(worker) = worker {
            self.join_worker(id, worker).await;
        }
        Ok(())
    }

    async fn join_worker(&self, id: DownloadId, worker: Worker) {
        worker.token.cancel();
        let limit = self.inner.config.downloader.stop_grace() + WORKER_JOIN_SLACK;
        let mut handle = worker.handle;
        if tokio::time::timeout(limit, &mut handle).await.is_err() {
            log::warn!("Worker for download {id} did not finish in {limit:?}; aborting");
            handle.abort();
            let _ = handle.await;
        }
    }

    // ------------------------------------------------------------------
    // Worker
    // ------------------------------------------------------------------

    /// Feeds downloader output into the item until the process exits or a
    /// command cancels the run.
    async fn drive(
        self,
        id: DownloadId,
        entry: Arc<Entry>,
        mut runner: ProcessRunner,
        token: CancellationToken,
    ) {
        let mut parser = ProgressParser::new();
        let interval = self.inner.config.persistence.progress_interval();
        let mut last_write = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => None,
                line = runner.next_line() => Some(line),
            };
            let Some(line) = next else {
                Self::halt_runner(&entry, id, runner).await;
                return;
            };
            let Some(line) = line else { break };

            match parser.feed(&line) {
                Some(ProgressEvent::Progress(sample)) => {
                    let snapshot = {
                        let mut slot = entry.slot();
                        if slot.halt.is_some() || slot.item.status != DownloadStatus::Downloading {
                            None
                        } else {
                            slot.item.apply_progress(&sample);
                            Some(slot.item.clone())
                        }
                    };
                    if let Some(item) = snapshot {
                        self.emit_update(&item);
                        if last_write.elapsed() >= interval {
                            last_write = Instant::now();
                            self.persist(&DownloadRecord::from(&item)).await;
                        }
                    }
                }
                Some(ProgressEvent::Failed(reason)) => log::warn!("Download {id}: {reason}"),
                Some(ProgressEvent::Completed) => log::debug!("Download {id} reported completion"),
                None => {}
            }
        }

        let exit = tokio::select! {
            biased;
            () = token.cancelled() => None,
            status = runner.wait() => Some(status),
        };
        let Some(status) = exit else {
            Self::halt_runner(&entry, id, runner).await;
            return;
        };

        let succeeded = matches!(&status, Ok(s) if s.success()) || parser.saw_completion();
        let save_path = entry.slot().item.save_path.clone();
        let file_len = if succeeded {
            crate::fs::file_len(&save_path).await
        } else {
            None
        };

        let item = {
            let mut slot = entry.slot();
            if slot.halt.is_some() || slot.item.status != DownloadStatus::Downloading {
                return;
            }
            if succeeded {
                slot.item.complete(file_len);
            } else {
                slot.item.fail(failure_reason(&parser, &status));
            }
            slot.item.clone()
        };

        match (&item.status, &item.last_error) {
            (DownloadStatus::Error, Some(reason)) => log::error!("Download {id} failed: {reason}"),
            _ => log::info!("Download {id} completed: {}", item.save_path.display()),
        }
        self.commit(&item).await;
    }

    async fn halt_runner(entry: &Entry, id: DownloadId, runner: ProcessRunner) {
        let halt = entry.slot().halt;
        let result = if halt == Some(Halt::Stop) {
            runner.stop().await
        } else {
            runner.pause().await
        };
        if let Err(e) = result {
            log::warn!("Download {id}: downloader did not shut down cleanly: {e}");
        }
    }

    // ------------------------------------------------------------------
    // Persistence and events
    // ------------------------------------------------------------------

    async fn commit(&self, item: &DownloadItem) {
        self.persist(&DownloadRecord::from(item)).await;
        self.emit_update(item);
    }

    /// Writes a record, retrying with backoff. After the last failed
    /// attempt the orchestrator is flagged degraded and keeps serving from
    /// memory.
    async fn persist(&self, record: &DownloadRecord) {
        let policy = &self.inner.config.persistence;
        let attempts = policy.retries.max(1);
        for attempt in 1..=attempts {
            match self.inner.store.upsert(record).await {
                Ok(outcome) => {
                    if outcome == UpsertOutcome::Stale {
                        log::debug!("Store already holds a newer record for {}", record.id);
                    }
                    self.mark_durable();
                    return;
                }
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "Persisting download {} failed (attempt {attempt}/{attempts}): {e}",
                        record.id
                    );
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
                Err(e) => {
                    log::error!("Persisting download {} failed: {e}", record.id);
                    self.mark_degraded();
                }
            }
        }
    }

    async fn remove_record(&self, id: DownloadId) {
        let policy = &self.inner.config.persistence;
        let attempts = policy.retries.max(1);
        for attempt in 1..=attempts {
            match self.inner.store.delete(id).await {
                Ok(()) => {
                    self.mark_durable();
                    return;
                }
                Err(e) if attempt < attempts => {
                    log::warn!("Removing download {id} failed (attempt {attempt}/{attempts}): {e}");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
                Err(e) => {
                    log::error!("Removing download {id} failed: {e}");
                    self.mark_degraded();
                }
            }
        }
    }

    fn mark_degraded(&self) {
        if !self.inner.degraded.swap(true, Ordering::SeqCst) {
            log::error!("Durability degraded: serving in-memory state only");
            self.emit(DownloadEvent::DurabilityDegraded);
        }
    }

    fn mark_durable(&self) {
        if self.inner.degraded.swap(false, Ordering::SeqCst) {
            log::info!("Durability restored");
            self.emit(DownloadEvent::DurabilityRestored);
        }
    }

    fn emit_update(&self, item: &DownloadItem) {
        self.emit(DownloadEvent::Updated(DownloadUpdate::from(item)));
    }

    fn emit(&self, event: DownloadEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn entry(&self, id: DownloadId) -> Result<Arc<Entry>> {
        self.entries()
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    fn entries(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<DownloadId, Arc<Entry>>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<DownloadId, Arc<Entry>>> {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn default_file_name(url: &url::Url) -> String {
    crate::fs::file_name_from_url(url)
        .unwrap_or_else(|| format!("download_{}", chrono::Utc::now().timestamp()))
}

fn failure_reason(parser: &ProgressParser, status: &Result<std::process::ExitStatus>) -> String {
    if let Some(reason) = parser.last_error() {
        return reason.to_string();
    }
    match status {
        Ok(status) => status.code().map_or_else(
            || "downloader was terminated by a signal".to_string(),
            |code| format!("downloader exited with status {code}"),
        ),
        Err(e) => format!("could not collect downloader exit status: {e}"),
    }
}
