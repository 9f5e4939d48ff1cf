mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
pub mod queue;

pub use availability::{
    BlockingInterval, BlockingSource, blocked_hours, blocking_intervals, compute_slots, merge_overlapping,
};
pub use error::{EngineError, EntityKind, Policy};
pub use mutations::PaymentApplication;

pub(crate) use conflict::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedCourtState = Arc<RwLock<CourtState>>;
pub type SharedPayment = Arc<RwLock<Payment>>;

/// Store behaviour toggles that differ between deployments.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// When false the store refuses the `paid` reservation status, as an older
    /// schema would; confirmation then goes straight to `confirmed`.
    pub paid_status_enabled: bool,
    /// Whether `draft` queue sessions hold their court time.
    pub draft_sessions_block: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            paid_status_enabled: true,
            draft_sessions_block: true,
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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Every append that is already queued when the first one arrives shares a
/// single fsync; a non-append command ends the batch early.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
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
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, events = batch.len(), "WAL flush failed");
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
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't bleed into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
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
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// The reservation store. Each court's reservations and queue sessions live
/// behind that court's lock; payments each have their own lock.
pub struct Engine {
    pub venues: DashMap<Ulid, Venue>,
    pub courts: DashMap<Ulid, SharedCourtState>,
    pub payments: DashMap<Ulid, SharedPayment>,
    pub settings: EngineSettings,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared from WAL append until the event is applied in memory;
    /// compaction takes it exclusively.
    pub(super) compaction: RwLock<()>,
    /// Reverse lookup: reservation / queue session id → court id
    pub(super) entity_to_court: DashMap<Ulid, Ulid>,
    pub(super) payments_by_gateway_id: DashMap<String, Ulid>,
    pub(super) payments_by_source_id: DashMap<String, Ulid>,
    /// Reservation id → its payments, oldest first.
    pub(super) payments_by_reservation: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event to one court's state (no locking; the caller holds the lock).
fn apply_to_court(cs: &mut CourtState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::CourtUpdated {
            hourly_rate, active, ..
        } => {
            cs.court.hourly_rate = *hourly_rate;
            cs.court.active = *active;
        }
        Event::ReservationCreated { reservation } => {
            entity_map.insert(reservation.id, reservation.court_id);
            cs.insert_reservation(reservation.clone());
        }
        Event::ReservationStatusChanged {
            id,
            status,
            amount_paid,
            entries,
            ..
        } => {
            if let Some(r) = cs.reservation_mut(*id) {
                r.status = *status;
                r.amount_paid = *amount_paid;
                r.history.extend(entries.iter().cloned());
            }
        }
        Event::ReservationCancelled {
            id, at, reason, entry, ..
        } => {
            if let Some(r) = cs.reservation_mut(*id) {
                r.status = ReservationStatus::Cancelled;
                r.cancelled_at = Some(*at);
                r.cancellation_reason = Some(reason.clone());
                r.history.push(entry.clone());
            }
        }
        Event::QueueSessionCreated { session } => {
            entity_map.insert(session.id, session.court_id);
            cs.insert_session(session.clone());
        }
        Event::QueueSessionStatusChanged { id, status, .. } => {
            if let Some(s) = cs.session_mut(*id) {
                s.status = *status;
            }
        }
        Event::ParticipantJoined { participant, .. } => {
            if let Some(s) = cs.session_mut(participant.session_id) {
                s.participants.push(participant.clone());
            }
        }
        Event::ParticipantLeft { id, session_id, at, .. } => {
            if let Some(p) = cs.session_mut(*session_id).and_then(|s| s.participant_mut(*id)) {
                p.left_at = Some(*at);
            }
        }
        Event::GameRecorded {
            session_id,
            players,
            winners,
            cost,
            ..
        } => {
            if let Some(s) = cs.session_mut(*session_id) {
                for p in s.participants.iter_mut().filter(|p| p.is_present()) {
                    if !players.contains(&p.user_id) {
                        continue;
                    }
                    p.games_played += 1;
                    p.amount_owed = p.amount_owed.saturating_add(*cost);
                    p.payment_status = ParticipantPaymentStatus::Unpaid;
                    if winners.contains(&p.user_id) {
                        p.games_won += 1;
                        p.status = ParticipantStatus::Playing;
                    } else {
                        p.status = ParticipantStatus::Waiting;
                    }
                }
            }
        }
        Event::ParticipantSettled { id, session_id, .. } => {
            if let Some(p) = cs.session_mut(*session_id).and_then(|s| s.participant_mut(*id)) {
                p.amount_owed = rust_decimal::Decimal::ZERO;
                p.payment_status = ParticipantPaymentStatus::Paid;
            }
        }
        // Registry-level and payment events are handled outside court state
        Event::VenueRegistered { .. }
        | Event::CourtRegistered { .. }
        | Event::PaymentCreated { .. }
        | Event::PaymentUpdated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: EngineSettings) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            venues: DashMap::new(),
            courts: DashMap::new(),
            payments: DashMap::new(),
            settings,
            wal_tx,
            compaction: RwLock::new(()),
            entity_to_court: DashMap::new(),
            payments_by_gateway_id: DashMap::new(),
            payments_by_source_id: DashMap::new(),
            payments_by_reservation: DashMap::new(),
        };

        // We're the sole owner of every Arc during replay, so try_read/try_write
        // never contend. Blocking variants would panic inside the runtime.
        for event in &events {
            match event {
                Event::VenueRegistered { venue } => {
                    engine.venues.insert(venue.id, venue.clone());
                }
                Event::CourtRegistered { court } => {
                    let cs = CourtState::new(court.clone());
                    engine.courts.insert(court.id, Arc::new(RwLock::new(cs)));
                }
                Event::PaymentCreated { payment } | Event::PaymentUpdated { payment } => {
                    engine.replay_payment(payment);
                }
                other => {
                    if let Some(court_id) = event_court_id(other)
                        && let Some(cs) = engine.get_court(&court_id)
                        && let Ok(mut guard) = cs.try_write()
                    {
                        apply_to_court(&mut guard, other, &engine.entity_to_court);
                    }
                }
            }
        }

        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            courts = engine.courts.len(),
            payments = engine.payments.len(),
            "engine state restored"
        );
        Ok(engine)
    }

    fn replay_payment(&self, payment: &Payment) {
        self.index_payment(payment);
        if let Some(existing) = self.get_payment(&payment.id)
            && let Ok(mut guard) = existing.try_write()
        {
            *guard = payment.clone();
            return;
        }
        self.payments
            .insert(payment.id, Arc::new(RwLock::new(payment.clone())));
    }

    /// Write event to WAL via the background group-commit writer.
    ///
    /// The returned guard must be held until the event is applied in memory,
    /// otherwise a compaction could snapshot state that lacks it.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        let gate = self.compaction.read().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(gate)
    }

    pub fn get_court(&self, id: &Ulid) -> Option<SharedCourtState> {
        self.courts.get(id).map(|e| e.value().clone())
    }

    pub fn get_payment(&self, id: &Ulid) -> Option<SharedPayment> {
        self.payments.get(id).map(|e| e.value().clone())
    }

    pub fn get_venue(&self, id: &Ulid) -> Option<Venue> {
        self.venues.get(id).map(|e| e.value().clone())
    }

    pub fn court_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_court.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn court_handle(&self, id: Ulid) -> Result<SharedCourtState, EngineError> {
        self.get_court(&id)
            .ok_or(EngineError::not_found(EntityKind::Court, id))
    }

    pub(super) fn venue_of(&self, court: &Court) -> Result<Venue, EngineError> {
        self.get_venue(&court.venue_id)
            .ok_or(EngineError::not_found(EntityKind::Venue, court.venue_id))
    }

    /// WAL-append, then apply. A failed append leaves state untouched.
    pub(super) async fn persist_and_apply(&self, cs: &mut CourtState, event: &Event) -> Result<(), EngineError> {
        let _applied = self.wal_append(event).await?;
        apply_to_court(cs, event, &self.entity_to_court);
        Ok(())
    }

    /// Lookup reservation/session → court, acquire the court's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        kind: EntityKind,
        entity_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<CourtState>, EngineError> {
        let court_id = self
            .court_for_entity(&entity_id)
            .ok_or(EngineError::not_found(kind, entity_id))?;
        let cs = self.court_handle(court_id)?;
        Ok(cs.write_owned().await)
    }

    pub(super) fn index_payment(&self, payment: &Payment) {
        if let Some(gid) = &payment.gateway_id {
            self.payments_by_gateway_id.insert(gid.clone(), payment.id);
        }
        if let Some(sid) = &payment.source_id {
            self.payments_by_source_id.insert(sid.clone(), payment.id);
        }
        if let Some(rid) = payment.reservation_id {
            let mut ids = self.payments_by_reservation.entry(rid).or_default();
            if !ids.contains(&payment.id) {
                ids.push(payment.id);
            }
        }
    }
}

/// Extract the court id from a court-scoped event.
fn event_court_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::CourtUpdated { id, .. } => Some(*id),
        Event::ReservationCreated { reservation } => Some(reservation.court_id),
        Event::QueueSessionCreated { session } => Some(session.court_id),
        Event::ReservationStatusChanged { court_id, .. }
        | Event::ReservationCancelled { court_id, .. }
        | Event::QueueSessionStatusChanged { court_id, .. }
        | Event::ParticipantJoined { court_id, .. }
        | Event::ParticipantLeft { court_id, .. }
        | Event::GameRecorded { court_id, .. }
        | Event::ParticipantSettled { court_id, .. } => Some(*court_id),
        Event::VenueRegistered { .. }
        | Event::CourtRegistered { .. }
        | Event::PaymentCreated { .. }
        | Event::PaymentUpdated { .. } => None,
    }
}
