use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

#[derive(Debug)]
pub enum StoreError {
    /// Update or delete addressed a document that does not exist.
    Missing(Ulid),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Missing(id) => write!(f, "no document with id {id}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Collection-scoped document store holding tables and reservations.
///
/// Query results come back in creation order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_table(&self, table: Table) -> Result<(), StoreError>;
    async fn get_table(&self, id: Ulid) -> Result<Option<Table>, StoreError>;
    async fn update_table(&self, table: Table) -> Result<(), StoreError>;
    async fn delete_table(&self, id: Ulid) -> Result<(), StoreError>;
    async fn query_tables(&self, query: &TableQuery) -> Result<Vec<Table>, StoreError>;

    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;
    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;
    async fn update_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;
    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError>;
    async fn query_reservations(
        &self,
        query: &ReservationQuery,
    ) -> Result<Vec<Reservation>, StoreError>;
    /// Delete every listed reservation as one atomic batch. Ids that no longer
    /// exist are skipped. Returns how many were deleted.
    async fn delete_reservations(&self, ids: &[Ulid]) -> Result<usize, StoreError>;
    /// Delete, as one atomic batch, every reservation dated strictly before
    /// `cutoff` at the moment the batch commits.
    async fn delete_reservations_before(&self, cutoff: NaiveDate) -> Result<usize, StoreError>;
}

// ── In-memory collections ────────────────────────────────

/// Live documents. After replay only the WAL writer task mutates them, in log
/// order, so memory and a later replay always agree.
#[derive(Default)]
struct Collections {
    tables: DashMap<Ulid, Table>,
    reservations: DashMap<Ulid, Reservation>,
}

impl Collections {
    fn apply(&self, event: &Event) {
        match event {
            Event::TableCreated(t) | Event::TableUpdated(t) => {
                self.tables.insert(t.id, t.clone());
            }
            Event::TableDeleted { id } => {
                self.tables.remove(id);
            }
            Event::ReservationCreated(r) | Event::ReservationUpdated(r) => {
                self.reservations.insert(r.id, r.clone());
            }
            Event::ReservationDeleted { id } => {
                self.reservations.remove(id);
            }
            Event::ReservationsPurged { ids } => {
                for id in ids {
                    self.reservations.remove(id);
                }
            }
        }
    }

    /// The fewest records that rebuild current state, oldest first.
    fn snapshot(&self) -> Vec<Event> {
        let mut tables: Vec<Table> = self.tables.iter().map(|e| e.value().clone()).collect();
        tables.sort_by_key(|t| t.id);
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);

        tables
            .into_iter()
            .map(Event::TableCreated)
            .chain(reservations.into_iter().map(Event::ReservationCreated))
            .collect()
    }
}

// ── Group-commit WAL writer ──────────────────────────────

/// A mutation as submitted. The writer resolves it against current state
/// when its batch is assembled, not when it was sent.
enum Write {
    Record(Event),
    PurgeBefore(NaiveDate),
}

type Reply = oneshot::Sender<Result<usize, StoreError>>;

enum WalCommand {
    Write { write: Write, reply: Reply },
    Compact { reply: oneshot::Sender<io::Result<()>> },
    RecordsSinceCompact { reply: oneshot::Sender<u64> },
}

fn affected(event: &Event) -> usize {
    match event {
        Event::ReservationsPurged { ids } => ids.len(),
        _ => 1,
    }
}

/// Committed state overlaid with the effect of earlier writes in the batch
/// being assembled. `true`/`Some` means live once the batch lands.
struct Pending<'a> {
    docs: &'a Collections,
    tables: HashMap<Ulid, bool>,
    reservations: HashMap<Ulid, Option<Reservation>>,
}

impl<'a> Pending<'a> {
    fn new(docs: &'a Collections) -> Self {
        Self {
            docs,
            tables: HashMap::new(),
            reservations: HashMap::new(),
        }
    }

    fn table_exists(&self, id: Ulid) -> bool {
        match self.tables.get(&id) {
            Some(live) => *live,
            None => self.docs.tables.contains_key(&id),
        }
    }

    fn reservation_exists(&self, id: Ulid) -> bool {
        match self.reservations.get(&id) {
            Some(r) => r.is_some(),
            None => self.docs.reservations.contains_key(&id),
        }
    }

    fn expired_reservations(&self, cutoff: NaiveDate) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self
            .docs
            .reservations
            .iter()
            .filter(|e| !self.reservations.contains_key(e.key()) && e.value().dated_before(cutoff))
            .map(|e| *e.key())
            .collect();
        ids.extend(self.reservations.iter().filter_map(|(id, r)| match r {
            Some(r) if r.dated_before(cutoff) => Some(*id),
            _ => None,
        }));
        ids.sort();
        ids
    }

    /// The record to log for `write`, `None` if there is nothing to do.
    fn resolve(&self, write: Write) -> Result<Option<Event>, StoreError> {
        let event = match write {
            Write::Record(event) => event,
            Write::PurgeBefore(cutoff) => Event::ReservationsPurged {
                ids: self.expired_reservations(cutoff),
            },
        };
        let missing = match &event {
            Event::TableUpdated(t) => (!self.table_exists(t.id)).then_some(t.id),
            Event::TableDeleted { id } => (!self.table_exists(*id)).then_some(*id),
            Event::ReservationUpdated(r) => (!self.reservation_exists(r.id)).then_some(r.id),
            Event::ReservationDeleted { id } => (!self.reservation_exists(*id)).then_some(*id),
            _ => None,
        };
        if let Some(id) = missing {
            return Err(StoreError::Missing(id));
        }
        match event {
            Event::ReservationsPurged { ids } => {
                let ids: Vec<Ulid> = ids
                    .into_iter()
                    .filter(|id| self.reservation_exists(*id))
                    .collect();
                Ok((!ids.is_empty()).then_some(Event::ReservationsPurged { ids }))
            }
            event => Ok(Some(event)),
        }
    }

    fn stage(&mut self, event: &Event) {
        match event {
            Event::TableCreated(t) | Event::TableUpdated(t) => {
                self.tables.insert(t.id, true);
            }
            Event::TableDeleted { id } => {
                self.tables.insert(*id, false);
            }
            Event::ReservationCreated(r) | Event::ReservationUpdated(r) => {
                self.reservations.insert(r.id, Some(r.clone()));
            }
            Event::ReservationDeleted { id } => {
                self.reservations.insert(*id, None);
            }
            Event::ReservationsPurged { ids } => {
                for id in ids {
                    self.reservations.insert(*id, None);
                }
            }
        }
    }
}

/// Background task that owns the WAL and the right to mutate `docs`.
/// 1. Block until the first write arrives.
/// 2. Drain every write already queued (the batch window).
/// 3. Resolve each in arrival order against state plus the batch so far.
/// 4. Stage the resulting records and sync once.
/// 5. Apply them to memory in the same order, then reply to every sender.
async fn wal_writer_loop(mut wal: Wal, docs: Arc<Collections>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Write { write, reply } => {
                let mut batch = vec![(write, reply)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Write { write, reply }) => batch.push((write, reply)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &docs, batch);
                if let Some(other) = deferred {
                    handle_maintenance(&mut wal, &docs, other);
                }
            }
            other => handle_maintenance(&mut wal, &docs, other),
        }
    }
}

enum Outcome {
    /// Logged in this batch; the result depends on the sync.
    Logged(usize),
    Settled(Result<usize, StoreError>),
}

fn commit_batch(wal: &mut Wal, docs: &Collections, batch: Vec<(Write, Reply)>) {
    let mut pending = Pending::new(docs);
    let mut events = Vec::with_capacity(batch.len());
    let mut outcomes = Vec::with_capacity(batch.len());
    for (write, reply) in batch {
        let outcome = match pending.resolve(write) {
            Ok(Some(event)) => {
                pending.stage(&event);
                let n = affected(&event);
                events.push(event);
                Outcome::Logged(n)
            }
            Ok(None) => Outcome::Settled(Ok(0)),
            Err(e) => Outcome::Settled(Err(e)),
        };
        outcomes.push((reply, outcome));
    }

    let synced = if events.is_empty() {
        Ok(())
    } else {
        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(events.len() as f64);
        let started = Instant::now();
        let result = sync_events(wal, &events);
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    };
    if synced.is_ok() {
        for event in &events {
            docs.apply(event);
        }
    }

    for (reply, outcome) in outcomes {
        let result = match outcome {
            Outcome::Logged(n) => match &synced {
                Ok(()) => Ok(n),
                Err(e) => Err(StoreError::WalError(e.to_string())),
            },
            Outcome::Settled(result) => result,
        };
        let _ = reply.send(result);
    }
}

fn sync_events(wal: &mut Wal, events: &[Event]) -> io::Result<()> {
    let staged = events.iter().try_for_each(|event| wal.stage(event));
    // Sync even after a staging error so half-buffered bytes are not left
    // to prefix the next batch.
    let synced = wal.sync();
    staged.and(synced)
}

fn handle_maintenance(wal: &mut Wal, docs: &Collections, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { reply } => {
            let _ = reply.send(wal.rewrite(&docs.snapshot()));
        }
        WalCommand::RecordsSinceCompact { reply } => {
            let _ = reply.send(wal.records_since_rewrite());
        }
        WalCommand::Write { write, reply } => commit_batch(wal, docs, vec![(write, reply)]),
    }
}

// ── Store ────────────────────────────────────────────────

/// Document store kept in memory and made durable by a write-ahead log.
pub struct WalStore {
    docs: Arc<Collections>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the log at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.torn_tail {
            warn!(
                "discarded torn tail of {} after {} records",
                wal_path.display(),
                replay.events.len()
            );
        }
        let docs = Arc::new(Collections::default());
        for event in &replay.events {
            docs.apply(event);
        }
        debug!(
            tables = docs.tables.len(),
            reservations = docs.reservations.len(),
            "store replayed"
        );

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, docs.clone(), wal_rx));
        Ok(Self { docs, wal_tx })
    }

    async fn ask<T>(&self, cmd: impl FnOnce(oneshot::Sender<T>) -> WalCommand) -> Result<T, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(cmd(tx))
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))
    }

    async fn submit(&self, write: Write) -> Result<usize, StoreError> {
        self.ask(|reply| WalCommand::Write { write, reply }).await?
    }

    async fn record(&self, event: Event) -> Result<(), StoreError> {
        self.submit(Write::Record(event)).await.map(|_| ())
    }

    pub fn table_count(&self) -> usize {
        self.docs.tables.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.docs.reservations.len()
    }

    /// Rewrite the WAL with only the records needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        self.ask(|reply| WalCommand::Compact { reply })
            .await?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.ask(|reply| WalCommand::RecordsSinceCompact { reply })
            .await
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for WalStore {
    async fn insert_table(&self, table: Table) -> Result<(), StoreError> {
        self.record(Event::TableCreated(table)).await
    }

    async fn get_table(&self, id: Ulid) -> Result<Option<Table>, StoreError> {
        Ok(self.docs.tables.get(&id).map(|e| e.value().clone()))
    }

    async fn update_table(&self, table: Table) -> Result<(), StoreError> {
        self.record(Event::TableUpdated(table)).await
    }

    async fn delete_table(&self, id: Ulid) -> Result<(), StoreError> {
        self.record(Event::TableDeleted { id }).await
    }

    async fn query_tables(&self, query: &TableQuery) -> Result<Vec<Table>, StoreError> {
        let mut out: Vec<Table> = self
            .docs
            .tables
            .iter()
            .filter(|e| query.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|t| t.id);
        Ok(out)
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.record(Event::ReservationCreated(reservation)).await
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.docs.reservations.get(&id).map(|e| e.value().clone()))
    }

    async fn update_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.record(Event::ReservationUpdated(reservation)).await
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError> {
        self.record(Event::ReservationDeleted { id }).await
    }

    async fn query_reservations(
        &self,
        query: &ReservationQuery,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut out: Vec<Reservation> = self
            .docs
            .reservations
            .iter()
            .filter(|e| query.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn delete_reservations(&self, ids: &[Ulid]) -> Result<usize, StoreError> {
        self.submit(Write::Record(Event::ReservationsPurged { ids: ids.to_vec() }))
            .await
    }

    async fn delete_reservations_before(&self, cutoff: NaiveDate) -> Result<usize, StoreError> {
        self.submit(Write::PurgeBefore(cutoff)).await
    }
}
