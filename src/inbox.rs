//! Received workouts, deduplicated by id and ordered most recent first.
//!
//! The collection is rebuilt from the incoming staging directory on each
//! [`Inbox::reload`] and swapped in whole. Readers hold an [`Arc`] snapshot,
//! so a reload in progress is never visible half-done.

use crate::error::StagingError;
use crate::staging::{StagingStore, read_payload};
use crate::types::WorkoutPayload;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

pub type Snapshot = Arc<[WorkoutPayload]>;

type SkipHandler = Box<dyn Fn(&Path, &StagingError) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Entries in the published collection.
    pub loaded: usize,
    /// Files that failed to read or decode.
    pub skipped: usize,
    /// Decoded files whose id was already seen in this scan.
    pub duplicates: usize,
}

pub struct Inbox {
    store: StagingStore,
    entries: RwLock<Snapshot>,
    subscribers: Mutex<Vec<Sender<Snapshot>>>,
    on_skip: Option<SkipHandler>,
    // Serializes reloads so snapshots are published in scan order.
    reload_lock: Mutex<()>,
}

impl Inbox {
    /// An empty inbox over `store`. Call [`Self::reload`] to populate it.
    pub fn new(store: StagingStore) -> Self {
        Self {
            store,
            entries: RwLock::new(Arc::from(Vec::new())),
            subscribers: Mutex::new(Vec::new()),
            on_skip: None,
            reload_lock: Mutex::new(()),
        }
    }

    /// Called for every file a reload skips, after it has been logged.
    #[must_use]
    pub fn with_skip_handler(
        mut self,
        handler: impl Fn(&Path, &StagingError) + Send + Sync + 'static,
    ) -> Self {
        self.on_skip = Some(Box::new(handler));
        self
    }

    pub fn store(&self) -> &StagingStore {
        &self.store
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entries.read())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<WorkoutPayload> {
        self.entries.read().iter().find(|p| p.id == id).cloned()
    }

    /// Receives every snapshot published from now on.
    pub fn subscribe(&self) -> Receiver<Snapshot> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Rescans the store and publishes a fresh collection.
    ///
    /// Files that cannot be read or decoded are skipped. When two files carry
    /// the same id the one scanned last (by file name) wins. Nothing on disk is
    /// touched. Only a failure to list the directory aborts the reload, and in
    /// that case the previous collection stays published.
    pub fn reload(&self) -> Result<ReloadReport, StagingError> {
        let _guard = self.reload_lock.lock();

        let files = self.store.list()?;
        let mut report = ReloadReport::default();
        let mut by_id: HashMap<Uuid, WorkoutPayload> = HashMap::with_capacity(files.len());

        for path in &files {
            match read_payload(path) {
                Ok(payload) => {
                    if by_id.insert(payload.id, payload).is_some() {
                        report.duplicates += 1;
                    }
                }
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(path = %path.display(), err = %e, "skipping inbox file");
                    if let Some(handler) = &self.on_skip {
                        handler(path, &e);
                    }
                }
            }
        }

        let mut entries: Vec<WorkoutPayload> = by_id.into_values().collect();
        entries.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| a.id.cmp(&b.id)));
        report.loaded = entries.len();

        let snapshot: Snapshot = entries.into();
        *self.entries.write() = Arc::clone(&snapshot);
        self.publish(&snapshot);

        tracing::info!(
            dir = %self.store.dir().display(),
            files = files.len(),
            loaded = report.loaded,
            skipped = report.skipped,
            duplicates = report.duplicates,
            "inbox reloaded"
        );
        Ok(report)
    }

    /// Stages `payload` into the inbox directory and reloads.
    pub fn ingest(&self, payload: &WorkoutPayload) -> Result<ReloadReport, StagingError> {
        self.store.write(payload)?;
        self.reload()
    }

    /// Runs [`Self::reload`] on a worker thread.
    pub fn reload_in_background(self: &Arc<Self>) -> JoinHandle<Result<ReloadReport, StagingError>> {
        let inbox = Arc::clone(self);
        thread::spawn(move || inbox.reload())
    }

    fn publish(&self, snapshot: &Snapshot) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(Arc::clone(snapshot)).is_ok());
    }
}
