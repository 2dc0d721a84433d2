use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::engine::conflict::{check_no_conflict, find_conflict, validate_span};
use crate::engine::lifecycle::{ensure_transition, StatusChange};
use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use super::BookingStore;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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
/// 3. Drain all immediately available Appends.
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

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Append and fsync the whole group, or none of it: on any failure the log
/// is rolled back to where the group started and every sender gets the error.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let written = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = written {
        if let Err(rollback_err) = wal.rollback() {
            error!("WAL rollback after failed group commit failed: {rollback_err}");
        }
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
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
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// Reference `BookingStore`: per-provider state behind async locks, with an
/// optional write-ahead log for durability.
pub struct MemoryStore {
    providers: DashMap<Ulid, SharedProviderState>,
    /// Reverse lookup: booking id → provider id
    booking_to_provider: DashMap<Ulid, Ulid>,
    /// Series root → occurrence ids
    series: DashMap<Ulid, Vec<Ulid>>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    notify: Arc<NotifyHub>,
    /// Mutations hold this shared; compaction holds it exclusively.
    gate: RwLock<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(NotifyHub::new()))
    }
}

impl MemoryStore {
    /// Volatile store, nothing survives the process.
    pub fn new(notify: Arc<NotifyHub>) -> Self {
        Self {
            providers: DashMap::new(),
            booking_to_provider: DashMap::new(),
            series: DashMap::new(),
            wal_tx: None,
            notify,
            gate: RwLock::new(()),
        }
    }

    /// Durable store backed by the WAL at `wal_path`, replaying it first.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::recover(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Self::new(notify);
        store.wal_tx = Some(wal_tx);

        let mut states: HashMap<Ulid, ProviderState> = HashMap::new();
        for event in &events {
            for pid in event.provider_ids() {
                let ps = states.entry(pid).or_insert_with(|| ProviderState::new(pid));
                store.apply_to_provider(ps, event);
            }
        }
        let booking_count: usize = states.values().map(|ps| ps.bookings.len()).sum();
        for (pid, ps) in states {
            store.providers.insert(pid, Arc::new(RwLock::new(ps)));
        }
        info!(
            "replayed {} events into {} bookings from {}",
            events.len(),
            booking_count,
            wal_path.display()
        );
        Ok(store)
    }

    /// Subscribe to committed events for one provider.
    pub fn subscribe(&self, provider_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(provider_id)
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_provider.len()
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    fn provider(&self, id: Ulid) -> SharedProviderState {
        self.providers
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderState::new(id))))
            .value()
            .clone()
    }

    fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    fn provider_of(&self, booking_id: &Ulid) -> Result<Ulid, EngineError> {
        self.booking_to_provider
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*booking_id))
    }

    /// Lookup booking → provider, acquire the provider's write lock.
    async fn resolve_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ProviderState>), EngineError> {
        let provider_id = self.provider_of(booking_id)?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        Ok((provider_id, ps.write_owned().await))
    }

    fn insert_indexed(&self, ps: &mut ProviderState, booking: Booking) {
        self.booking_to_provider.insert(booking.id, booking.provider_id);
        if let Some(parent) = booking.parent_booking_id {
            self.series.entry(parent).or_default().push(booking.id);
        }
        ps.insert_booking(booking);
    }

    /// Apply the part of `event` that concerns `ps` (caller holds the lock).
    fn apply_to_provider(&self, ps: &mut ProviderState, event: &Event) {
        match event {
            Event::BookingCreated { booking } => self.insert_indexed(ps, booking.clone()),
            Event::BatchCreated { bookings } => {
                let pid = ps.provider_id;
                for booking in bookings.iter().filter(|b| b.provider_id == pid) {
                    self.insert_indexed(ps, booking.clone());
                }
            }
            Event::StatusChanged { change, .. } => {
                if let Some(booking) = ps.get_mut(change.id) {
                    change.apply(booking);
                }
            }
            Event::Rescheduled { id, span, .. } => {
                if let Some(mut booking) = ps.remove_booking(*id) {
                    booking.set_span(*span);
                    ps.insert_booking(booking);
                }
            }
            Event::ReminderMarked { id, kind, .. } => {
                if let Some(booking) = ps.get_mut(*id) {
                    booking.set_reminder_sent(*kind);
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
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

    /// WAL-append + apply + notify in one call.
    async fn persist_and_apply(&self, ps: &mut ProviderState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_provider(ps, event);
        self.notify.send(ps.provider_id, event);
        Ok(())
    }

    fn ensure_parent_known(&self, parent: Ulid, batch: &[Booking]) -> Result<(), EngineError> {
        if self.booking_to_provider.contains_key(&parent) || batch.iter().any(|b| b.id == parent) {
            Ok(())
        } else {
            Err(EngineError::NotFound(parent))
        }
    }

    fn snapshot_handles(&self) -> Vec<SharedProviderState> {
        self.providers.iter().map(|e| e.value().clone()).collect()
    }

    /// Rewrite the WAL with one `BookingCreated` per stored booking.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.gate.write().await;

        let mut events = Vec::with_capacity(self.booking_count());
        for ps in self.snapshot_handles() {
            let guard = ps.read().await;
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
        }
        let event_count = events.len();

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted WAL to {event_count} records");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Pairs of active bookings of the same provider whose intervals overlap.
    /// Empty unless the non-overlap invariant has been broken.
    pub async fn find_overlaps(&self) -> Vec<(Ulid, Ulid)> {
        let mut pairs = Vec::new();
        for ps in self.snapshot_handles() {
            let guard = ps.read().await;
            // Sorted by start: track the active booking reaching furthest.
            let mut reach: Option<&Booking> = None;
            for b in guard.bookings.iter().filter(|b| b.is_active()) {
                if let Some(prev) = reach {
                    if b.start_time < prev.end_time {
                        pairs.push((prev.id, b.id));
                    }
                    if b.end_time > prev.end_time {
                        reach = Some(b);
                    }
                } else {
                    reach = Some(b);
                }
            }
        }
        pairs
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let provider_id = self.provider_of(&id)?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = ps.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    async fn find_active_bookings(&self, provider_id: Ulid, range: Span) -> Result<Vec<Booking>, EngineError> {
        let Some(ps) = self.get_provider(&provider_id) else {
            return Ok(Vec::new());
        };
        let guard = ps.read().await;
        Ok(guard.active_overlapping(&range).cloned().collect())
    }

    async fn create_booking(&self, booking: Booking) -> Result<Booking, EngineError> {
        let span = Span::try_new(booking.start_time, booking.end_time)?;
        let _gate = self.gate.read().await;
        if let Some(parent) = booking.parent_booking_id {
            self.ensure_parent_known(parent, &[])?;
        }

        let ps = self.provider(booking.provider_id);
        let mut guard = ps.write().await;
        if self.booking_to_provider.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        if booking.is_active() {
            check_no_conflict(&guard, &span, None)?;
        }

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    async fn create_booking_batch(&self, bookings: Vec<Booking>) -> Result<Vec<Booking>, EngineError> {
        if bookings.is_empty() {
            return Ok(bookings);
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for b in &bookings {
            Span::try_new(b.start_time, b.end_time)?;
        }

        let _gate = self.gate.read().await;
        for (i, b) in bookings.iter().enumerate() {
            if bookings[..i].iter().any(|earlier| earlier.id == b.id) {
                return Err(EngineError::AlreadyExists(b.id));
            }
            if let Some(parent) = b.parent_booking_id {
                self.ensure_parent_known(parent, &bookings)?;
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut provider_ids: Vec<Ulid> = bookings.iter().map(|b| b.provider_id).collect();
        provider_ids.sort();
        provider_ids.dedup();

        let mut guards: HashMap<Ulid, OwnedRwLockWriteGuard<ProviderState>> = HashMap::new();
        for pid in &provider_ids {
            let guard = self.provider(*pid).write_owned().await;
            guards.insert(*pid, guard);
        }

        // Phase 1: validate every entry against stored bookings, then against
        // earlier entries of the batch.
        for (i, b) in bookings.iter().enumerate() {
            if self.booking_to_provider.contains_key(&b.id) {
                return Err(EngineError::AlreadyExists(b.id));
            }
            if !b.is_active() {
                continue;
            }
            let span = b.span();
            let guard = &guards[&b.provider_id];
            let stored = find_conflict(guard.active_overlapping(&span), &span, None);
            let earlier = find_conflict(
                bookings[..i].iter().filter(|e| e.provider_id == b.provider_id),
                &span,
                None,
            );
            if let Some(existing) = stored.or(earlier) {
                debug!("batch entry {i} conflicts with {}", existing.id);
                return Err(EngineError::BatchConflict {
                    index: i,
                    conflicting: existing.id,
                });
            }
        }

        // Phase 2: one WAL record for the whole batch, then apply everywhere.
        let event = Event::BatchCreated { bookings: bookings.clone() };
        self.wal_append(&event).await?;
        for (pid, guard) in guards.iter_mut() {
            self.apply_to_provider(guard, &event);
            self.notify.send(*pid, &event);
        }

        Ok(bookings)
    }

    async fn update_booking_status(&self, change: StatusChange) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let (provider_id, mut guard) = self.resolve_write(&change.id).await?;
        let current = guard.get(change.id).ok_or(EngineError::NotFound(change.id))?;
        if !ensure_transition(current.status, change.status)? {
            return Ok(current.clone());
        }

        let id = change.id;
        let event = Event::StatusChanged { provider_id, change };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    async fn reschedule_booking(&self, id: Ulid, span: Span) -> Result<Booking, EngineError> {
        validate_span(&span)?;
        let _gate = self.gate.read().await;
        let (provider_id, mut guard) = self.resolve_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if current.status.is_terminal() {
            return Err(EngineError::InvalidRequest("terminal bookings cannot be rescheduled"));
        }
        check_no_conflict(&guard, &span, Some(id))?;

        let event = Event::Rescheduled { id, provider_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    async fn find_series(&self, parent_booking_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let provider_id = self.provider_of(&parent_booking_id)?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(parent_booking_id))?;
        let child_ids = self
            .series
            .get(&parent_booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let guard = ps.read().await;
        let root = guard
            .get(parent_booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(parent_booking_id))?;
        let mut children: Vec<Booking> = child_ids
            .iter()
            .filter_map(|id| guard.get(*id).cloned())
            .collect();
        children.sort_by_key(|b| b.start_time);

        let mut series = Vec::with_capacity(children.len() + 1);
        series.push(root);
        series.extend(children);
        Ok(series)
    }

    async fn find_upcoming(&self, range: Span) -> Result<Vec<Booking>, EngineError> {
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let mut upcoming = Vec::new();
        for ps in self.snapshot_handles() {
            let guard = ps.read().await;
            upcoming.extend(
                guard
                    .overlapping(&range)
                    .filter(|b| b.is_active() && range.contains_instant(b.start_time))
                    .cloned(),
            );
        }
        upcoming.sort_by_key(|b| b.start_time);
        Ok(upcoming)
    }

    async fn mark_reminder_sent(&self, id: Ulid, kind: ReminderKind) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let (provider_id, mut guard) = self.resolve_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if current.reminder_sent(kind) {
            return Ok(current.clone());
        }

        let event = Event::ReminderMarked { id, provider_id, kind };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }
}
