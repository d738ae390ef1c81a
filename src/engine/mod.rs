mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::{now_ms, validate_span};
pub use error::{EngineError, UnavailableReason};
pub use store::ReservationStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceBook = Arc<RwLock<ResourceBook>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive while a flush is pending ride along in
/// the same fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
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

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so stray buffered bytes do not leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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

/// Durable reservation store: one write-locked book per resource, backed by the WAL.
pub struct Engine {
    pub(super) books: DashMap<Ulid, SharedResourceBook>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → resource id.
    pub(super) reservation_to_resource: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared, compaction holds it exclusive. Always taken
    /// before any book lock.
    pub(super) wal_gate: RwLock<()>,
}

/// Apply an event to a book (caller holds the write lock).
fn apply_to_book(book: &mut ResourceBook, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.resource_id);
            book.insert(reservation.clone());
        }
        Event::ReservationDeleted { id, .. } => {
            book.remove(*id);
            index.remove(id);
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            books: DashMap::new(),
            wal_tx,
            reservation_to_resource: DashMap::new(),
            wal_gate: RwLock::new(()),
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // blocking_write would panic inside an async context.
        for event in &events {
            let book = engine.book_or_create(event.resource_id());
            let mut guard = book
                .try_write()
                .map_err(|_| io::Error::other("replay: resource book already locked"))?;
            apply_to_book(&mut guard, event, &engine.reservation_to_resource);
        }
        tracing::info!(
            "replayed {} WAL events into {} resources",
            events.len(),
            engine.books.len()
        );

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::TransientDependency("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::TransientDependency("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::TransientDependency(e.to_string()))
    }

    pub fn get_book(&self, resource_id: &Ulid) -> Option<SharedResourceBook> {
        self.books.get(resource_id).map(|e| e.value().clone())
    }

    /// Resources are owned by the catalog; their books appear on first use.
    pub(super) fn book_or_create(&self, resource_id: Ulid) -> SharedResourceBook {
        self.books
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceBook::new(resource_id))))
            .value()
            .clone()
    }

    pub fn resource_for_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_to_resource.get(id).map(|e| *e.value())
    }

    /// WAL-append, then apply. Nothing is visible to readers unless the append is durable.
    pub(super) async fn persist_and_apply(
        &self,
        book: &mut ResourceBook,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_book(book, event, &self.reservation_to_resource);
        Ok(())
    }
}
