mod availability;
mod conflict;
mod error;
mod mutations;
mod projection;
mod queries;
mod store;

pub use availability::{is_available, list_available};
pub use conflict::has_conflict;
pub use error::EngineError;
pub use projection::project;
pub use store::AppointmentStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::model::*;
use crate::wal::Wal;

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
/// 4. Single flush_sync for the whole batch, rolled back as a unit on failure.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // Every caller in the batch hears about the failure, so none of its bytes
    // may survive on disk.
    if let Err(e) = &result {
        tracing::error!("WAL batch of {} failed: {e}", batch.len());
        if let Err(e) = wal.rollback() {
            tracing::error!("WAL rollback failed, retrying on next append: {e}");
        }
    }
    result
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The scheduling engine: catalog, customers, and the committed-appointment store.
///
/// Every write holds `store` exclusively from its availability check through the
/// WAL append, so check-then-act is one critical section. Customers sit in a
/// `DashMap` for lock-free reads but are only written under that same lock.
pub struct Engine {
    catalog: Arc<Catalog>,
    pub customers: DashMap<Ulid, Customer>,
    pub(super) store: RwLock<AppointmentStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, catalog: Arc<Catalog>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path, replay.valid_len)?;
        let events = replay.events;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let customers = DashMap::new();
        let mut store = AppointmentStore::new();
        for event in &events {
            store.apply_event(event, &customers);
        }
        tracing::debug!(
            "replayed {} events: {} customers, {} appointments",
            events.len(),
            customers.len(),
            store.len()
        );

        Ok(Self {
            catalog,
            customers,
            store: RwLock::new(store),
            wal_tx,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
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
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// WAL-append then apply. Nothing is applied unless the append is durable.
    pub(super) async fn persist_and_apply(
        &self,
        store: &mut AppointmentStore,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        store.apply_event(event, &self.customers);
        Ok(())
    }
}
