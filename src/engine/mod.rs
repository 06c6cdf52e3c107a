mod error;
pub mod ledger;
mod mutations;
mod queries;
mod store;
mod validate;

pub use error::EngineError;
pub use ledger::LedgerEntry;
pub use store::BookingStore;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::identity::{AccessPolicy, OwnerOrAdmin};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

/// A resource's ledger entry behind its serialization point.
pub type SharedLedgerEntry = Arc<RwLock<LedgerEntry>>;

/// Whether new bookings start out `Confirmed` instead of `Pending`.
/// A global default with optional per-resource-type overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmPolicy {
    pub auto_confirm: bool,
    pub overrides: HashMap<ResourceType, bool>,
}

impl ConfirmPolicy {
    pub fn global(auto_confirm: bool) -> Self {
        Self {
            auto_confirm,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, kind: ResourceType, auto_confirm: bool) -> Self {
        self.overrides.insert(kind, auto_confirm);
        self
    }

    pub fn auto_confirm_for(&self, kind: ResourceType) -> bool {
        self.overrides.get(&kind).copied().unwrap_or(self.auto_confirm)
    }

    pub fn initial_status(&self, kind: ResourceType) -> BookingStatus {
        if self.auto_confirm_for(kind) {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        }
    }
}

/// Collaborators and policy handed to [`Engine::new`].
pub struct EngineOptions {
    pub confirm: ConfirmPolicy,
    pub access: Arc<dyn AccessPolicy>,
    pub clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            confirm: ConfirmPolicy::default(),
            access: Arc::new(OwnerOrAdmin),
            clock: Arc::new(SystemClock),
            notify: Arc::new(NotifyHub::new()),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        warn!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mark = wal.mark()?;
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = result {
        // Every caller in the batch rolls back, so none of it may reach the log.
        if let Err(rewind_err) = wal.rewind(mark) {
            error!("WAL rewind after failed flush also failed, journal closed for writes: {rewind_err}");
        }
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    /// Per-resource serialization points. Entries are created on first use and never removed.
    pub(super) ledger: DashMap<ResourceKey, SharedLedgerEntry>,
    pub(super) store: Arc<BookingStore>,
    pub(super) catalog: Arc<dyn Catalog>,
    pub(super) access: Arc<dyn AccessPolicy>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) confirm: ConfirmPolicy,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every journal-append-then-apply, exclusively by compaction,
    /// so a compaction snapshot never misses an appended event.
    pub(super) commit_gate: Arc<RwLock<()>>,
    pub notify: Arc<NotifyHub>,
}

/// What a critical section needs from the engine, owned so the section can
/// run on its own task.
#[derive(Clone)]
pub(super) struct Committer {
    store: Arc<BookingStore>,
    access: Arc<dyn AccessPolicy>,
    clock: Arc<dyn Clock>,
    wal_tx: mpsc::Sender<WalCommand>,
    commit_gate: Arc<RwLock<()>>,
    notify: Arc<NotifyHub>,
}

impl Committer {
    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))
    }
}

impl Engine {
    /// Open the journal at `wal_path`, replay it into the store, and rebuild
    /// the ledger from the active bookings. Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, catalog: Arc<dyn Catalog>, options: EngineOptions) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledger: DashMap::new(),
            store: Arc::new(BookingStore::new()),
            catalog,
            access: options.access,
            clock: options.clock,
            confirm: options.confirm,
            wal_tx,
            commit_gate: Arc::new(RwLock::new(())),
            notify: options.notify,
        };

        for event in &events {
            if let Err(e) = engine.store.apply_event(event) {
                warn!("replay: skipping {}: {e}", event.booking_id());
            }
        }
        let rebuilt = ledger::rebuild(&engine.store.snapshot());
        for (key, entry) in rebuilt {
            engine.ledger.insert(key, Arc::new(RwLock::new(entry)));
        }

        if !events.is_empty() {
            info!(
                "replayed {} events: {} bookings, {} resources with commitments",
                events.len(),
                engine.store.len(),
                engine.ledger.len()
            );
        }
        Ok(engine)
    }

    pub(super) fn committer(&self) -> Committer {
        Committer {
            store: self.store.clone(),
            access: self.access.clone(),
            clock: self.clock.clone(),
            wal_tx: self.wal_tx.clone(),
            commit_gate: self.commit_gate.clone(),
            notify: self.notify.clone(),
        }
    }

    /// The serialization point for a resource, created on first use.
    pub(super) fn ledger_entry(&self, resource: &ResourceKey) -> SharedLedgerEntry {
        if let Some(entry) = self.ledger.get(resource) {
            return entry.value().clone();
        }
        self.ledger
            .entry(resource.clone())
            .or_insert_with(|| Arc::new(RwLock::new(LedgerEntry::new())))
            .value()
            .clone()
    }

    pub fn booking_count(&self) -> usize {
        self.store.len()
    }

    /// Current time on the engine's clock.
    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }
}
