// File: src/listener.rs
//
// Change-feed adapter and listener: normalize document-store watch items
// into storage events, deduplicate, and feed the sync service

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use docsync_core::{Document, DocumentStore, StorageEvent, SyncError, SyncResult, WatchEvent};

use crate::sync::SyncService;

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Wraps the document store's typed watch stream and emits normalized
/// `StorageEvent`s over a bounded channel. A slow consumer blocks the feed
/// reader, preserving order, rather than dropping events.
pub struct StorageAdapter<T, S> {
    store: Arc<S>,
    capacity: usize,
    _document: PhantomData<T>,
}

impl<T, S> StorageAdapter<T, S>
where
    T: Document,
    S: DocumentStore<T> + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            _document: PhantomData,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Open the feed. Watch errors surface verbatim.
    pub async fn watch(&self) -> SyncResult<mpsc::Receiver<StorageEvent>> {
        let mut source = self.store.watch().await?;
        let (tx, rx) = mpsc::channel(self.capacity);

        tokio::spawn(async move {
            while let Some(change) = source.recv().await {
                if tx.send(normalize(change)).await.is_err() {
                    // Consumer gone; stop forwarding.
                    break;
                }
            }
        });

        Ok(rx)
    }
}

/// Turn a typed change-feed item into the uniform envelope. The version
/// comes from the post-image when one exists, falling back to the diff;
/// deletions carry neither and report zero.
fn normalize<T: Document>(change: WatchEvent<T>) -> StorageEvent {
    let version = change
        .data
        .as_ref()
        .map(|doc| doc.version())
        .or_else(|| change.diff.as_ref().map(|diff| diff.version))
        .unwrap_or(0);

    let mut event = StorageEvent::new(change.document_id, change.operation).with_version(version);
    if let Some(doc) = change.data.as_ref() {
        if let Ok(value) = serde_json::to_value(doc) {
            event = event.with_data(value);
        }
    }
    if let Some(diff) = change.diff {
        event = event.with_diff(diff);
    }
    event
}

/// Counters for the listener loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub events_processed: u64,
    pub duplicates_skipped: u64,
    pub handler_errors: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    duplicates: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerState {
    Idle,
    Running,
    Stopped,
}

/// Owns the task that drains the adapter channel into
/// `SyncService::handle_storage_event`.
///
/// Dedup is an in-memory load-or-store set of `(document, operation,
/// version)` triples; it collapses change-feed redelivery (resume-token
/// replay) and mutations the facade path already appended. The set is
/// process-local and unbounded; the event store's uniqueness is the
/// authoritative guard, so a restart that reprocesses the feed is safe.
pub struct StorageListener<T, S> {
    adapter: StorageAdapter<T, S>,
    sync: Arc<SyncService>,
    seen: Arc<StdMutex<HashSet<String>>>,
    counters: Arc<Counters>,
    state: Arc<StdMutex<ListenerState>>,
    shutdown: StdMutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T, S> StorageListener<T, S>
where
    T: Document,
    S: DocumentStore<T> + 'static,
{
    pub fn new(adapter: StorageAdapter<T, S>, sync: Arc<SyncService>) -> Self {
        Self {
            adapter,
            sync,
            seen: Arc::new(StdMutex::new(HashSet::new())),
            counters: Arc::new(Counters::default()),
            state: Arc::new(StdMutex::new(ListenerState::Idle)),
            shutdown: StdMutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Begin a fresh change-feed read. The dedup set starts empty; events
    /// replayed by the feed after a restart are absorbed by event-store
    /// uniqueness checks.
    pub async fn start(&self) -> SyncResult<()> {
        {
            let state = self.state.lock().unwrap();
            if *state == ListenerState::Running {
                return Err(SyncError::invalid_state("listener already running"));
            }
        }

        let rx = self.adapter.watch().await?;
        self.seen.lock().unwrap().clear();
        *self.state.lock().unwrap() = ListenerState::Running;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(
            rx,
            self.sync.clone(),
            self.seen.clone(),
            self.counters.clone(),
            self.state.clone(),
            shutdown_rx,
        ));

        *self.shutdown.lock().unwrap() = Some(shutdown_tx);
        *self.handle.lock().await = Some(task);
        info!("storage listener started");
        Ok(())
    }

    /// Signal shutdown and join the read loop.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.handle.lock().await.take() {
            let _ = task.await;
        }
        *self.state.lock().unwrap() = ListenerState::Stopped;
        info!("storage listener stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == ListenerState::Running
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            events_processed: self.counters.processed.load(Ordering::Relaxed),
            duplicates_skipped: self.counters.duplicates.load(Ordering::Relaxed),
            handler_errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

async fn run_loop(
    mut rx: mpsc::Receiver<StorageEvent>,
    sync: Arc<SyncService>,
    seen: Arc<StdMutex<HashSet<String>>>,
    counters: Arc<Counters>,
    state: Arc<StdMutex<ListenerState>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            item = rx.recv() => {
                let Some(event) = item else {
                    debug!("change feed closed");
                    break;
                };
                process(&sync, &seen, &counters, event).await;
            }
        }
    }
    *state.lock().unwrap() = ListenerState::Stopped;
}

async fn process(
    sync: &SyncService,
    seen: &StdMutex<HashSet<String>>,
    counters: &Counters,
    event: StorageEvent,
) {
    let key = event.dedup_key();

    // load-or-store: a key already present means the feed redelivered a
    // mutation we have handled in this process.
    let first_sight = seen.lock().unwrap().insert(key.clone());
    if !first_sight {
        counters.duplicates.fetch_add(1, Ordering::Relaxed);
        debug!(%key, "skipping duplicate change-feed event");
        return;
    }

    // First sight of a triple: the same mutation may already be in the log
    // via the facade path, which appends before the feed delivers. Seed the
    // set and skip rather than double-append.
    if event.version > 0 {
        match sync
            .events_after_version(&event.document_id, event.version - 1)
            .await
        {
            Ok(existing)
                if existing
                    .iter()
                    .any(|e| e.server_seq == event.version && e.operation == event.operation) =>
            {
                counters.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "event already persisted, skipping");
                return;
            }
            Ok(_) => {}
            Err(error) => {
                // Fall through to the append; uniqueness still guards it.
                warn!(%key, %error, "persisted-event lookup failed");
            }
        }
    }

    match sync.handle_storage_event(event).await {
        Ok(_) => {
            counters.processed.fetch_add(1, Ordering::Relaxed);
        }
        Err(error) => {
            // Per-event failures do not terminate the loop.
            counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(%key, %error, "failed to handle change-feed event");
        }
    }
}
