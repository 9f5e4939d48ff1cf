use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKING_CONFLICTS_TOTAL, RESERVATIONS_CANCELLED_TOTAL, RESERVATIONS_CREATED_TOTAL};

use super::conflict::{check_exclusion, check_no_conflict, local_day, validate_amount, validate_booking_window};
use super::{Engine, EngineError, EntityKind, Policy, WalCommand};

/// A payment being credited to a reservation as part of a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentApplication {
    pub payment_id: Ulid,
    pub event_id: Option<String>,
    pub amount: Decimal,
}

fn check_name(name: &Option<String>) -> Result<(), EngineError> {
    if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Venues & courts ──────────────────────────────────────

    pub async fn register_venue(&self, venue: Venue) -> Result<(), EngineError> {
        if self.venues.len() >= MAX_VENUES {
            return Err(EngineError::LimitExceeded("too many venues"));
        }
        check_name(&venue.name)?;
        if self.venues.contains_key(&venue.id) {
            return Err(EngineError::AlreadyExists(venue.id));
        }
        let event = Event::VenueRegistered { venue: venue.clone() };
        let _applied = self.wal_append(&event).await?;
        self.venues.insert(venue.id, venue);
        Ok(())
    }

    pub async fn register_court(&self, court: Court) -> Result<(), EngineError> {
        if self.courts.len() >= MAX_COURTS {
            return Err(EngineError::LimitExceeded("too many courts"));
        }
        check_name(&court.name)?;
        validate_amount(court.hourly_rate)?;
        if self.courts.contains_key(&court.id) {
            return Err(EngineError::AlreadyExists(court.id));
        }
        if !self.venues.contains_key(&court.venue_id) {
            return Err(EngineError::not_found(EntityKind::Venue, court.venue_id));
        }
        let event = Event::CourtRegistered { court: court.clone() };
        let _applied = self.wal_append(&event).await?;
        self.courts
            .insert(court.id, Arc::new(RwLock::new(CourtState::new(court))));
        Ok(())
    }

    pub async fn update_court(&self, id: Ulid, hourly_rate: Decimal, active: bool) -> Result<(), EngineError> {
        validate_amount(hourly_rate)?;
        let cs = self.court_handle(id)?;
        let mut guard = cs.write().await;
        let event = Event::CourtUpdated {
            id,
            hourly_rate,
            active,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book `[start, end)` on a court for `user_id`.
    ///
    /// Availability is re-derived under the court's write lock, so two
    /// concurrent requests for the same hours serialize and the second one
    /// sees the first one's reservation.
    pub async fn create_reservation(
        &self,
        court_id: Ulid,
        user_id: Ulid,
        start: Ms,
        end: Ms,
        total_amount: Decimal,
        now: Ms,
    ) -> Result<Ulid, EngineError> {
        validate_amount(total_amount)?;
        let cs = self.court_handle(court_id)?;
        let mut guard = cs.write().await;
        if !guard.court.active {
            return Err(Policy::InactiveCourt.into());
        }
        let venue = self.venue_of(&guard.court)?;
        let day = validate_booking_window(&venue, start, end, now)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_COURT {
            return Err(EngineError::LimitExceeded("too many reservations on court"));
        }

        let span = Span::new(start, end);
        let draft_blocks = self.settings.draft_sessions_block;
        if let Err(e) = check_no_conflict(&guard, &span, &day, user_id, draft_blocks)
            .and_then(|()| check_exclusion(&guard, &span, draft_blocks))
        {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let id = Ulid::new();
        let event = Event::ReservationCreated {
            reservation: Reservation {
                id,
                court_id,
                user_id,
                span,
                status: ReservationStatus::PendingPayment,
                total_amount,
                amount_paid: Decimal::ZERO,
                history: vec![AuditEntry::Created { at: now, total_amount }],
                cancelled_at: None,
                cancellation_reason: None,
                created_at: now,
            },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(%id, %court_id, %user_id, start, end, "reservation created");
        Ok(id)
    }

    /// Cancel a reservation that still holds its slot.
    ///
    /// Users may only cancel their own bookings, and only more than
    /// [`CANCELLATION_LEAD_MS`] before the start. Admin and system
    /// cancellations skip both checks.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        actor: Actor,
        reason: String,
        now: Ms,
    ) -> Result<(), EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let mut guard = self.resolve_entity_write(EntityKind::Reservation, id).await?;
        let r = guard
            .reservation(id)
            .ok_or(EngineError::not_found(EntityKind::Reservation, id))?;
        if !r.status.is_blocking() {
            return Err(Policy::NotCancellable(r.status).into());
        }
        if let Actor::User(user_id) = actor {
            if user_id != r.user_id {
                return Err(Policy::NotOwner.into());
            }
            if r.span.start - now <= CANCELLATION_LEAD_MS {
                return Err(Policy::CancellationWindow.into());
            }
        }

        let event = Event::ReservationCancelled {
            id,
            court_id: r.court_id,
            at: now,
            reason: reason.clone(),
            entry: AuditEntry::Cancelled { at: now, actor, reason },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let actor_label = match actor {
            Actor::User(_) => "user",
            Actor::Admin => "admin",
            Actor::System => "system",
        };
        metrics::counter!(RESERVATIONS_CANCELLED_TOTAL, "actor" => actor_label).increment(1);
        info!(%id, actor = actor_label, "reservation cancelled");
        Ok(())
    }

    /// Move a reservation to `to`, optionally crediting a payment.
    ///
    /// Re-applying the current status is a no-op, except that a `confirmed`
    /// reservation takes the credited amount if it differs. A payment already
    /// in the history is never credited twice.
    pub async fn advance_reservation(
        &self,
        id: Ulid,
        to: ReservationStatus,
        applied: Option<PaymentApplication>,
        now: Ms,
    ) -> Result<(), EngineError> {
        if to == ReservationStatus::Paid && !self.settings.paid_status_enabled {
            return Err(EngineError::Integrity(format!(
                "reservation {id}: status 'paid' is not accepted by this store"
            )));
        }
        let mut guard = self.resolve_entity_write(EntityKind::Reservation, id).await?;
        self.advance_locked(&mut guard, id, to, applied, now).await
    }

    /// `advance_reservation` with the court's write lock already held.
    async fn advance_locked(
        &self,
        cs: &mut CourtState,
        id: Ulid,
        to: ReservationStatus,
        applied: Option<PaymentApplication>,
        now: Ms,
    ) -> Result<(), EngineError> {
        let r = cs
            .reservation(id)
            .ok_or(EngineError::not_found(EntityKind::Reservation, id))?;

        let mut entries = Vec::new();
        if r.status != to {
            if !r.status.can_transition_to(to) {
                return Err(Policy::InvalidTransition { from: r.status, to }.into());
            }
            entries.push(AuditEntry::StatusChanged {
                at: now,
                from: r.status,
                to,
            });
        }

        let mut amount_paid = r.amount_paid;
        if let Some(app) = applied {
            let already_credited = r.history.iter().any(|e| {
                matches!(e, AuditEntry::PaymentApplied { payment_id, .. } if *payment_id == app.payment_id)
            });
            if app.amount != r.amount_paid || !already_credited {
                if app.amount > r.total_amount {
                    warn!(%id, amount = %app.amount, total = %r.total_amount, "payment exceeds reservation total");
                }
                amount_paid = app.amount;
                if !already_credited {
                    entries.push(AuditEntry::PaymentApplied {
                        at: now,
                        payment_id: app.payment_id,
                        event_id: app.event_id,
                        amount: app.amount,
                    });
                }
            }
        }

        if entries.is_empty() && amount_paid == r.amount_paid {
            return Ok(());
        }

        let event = Event::ReservationStatusChanged {
            id,
            court_id: r.court_id,
            status: to,
            amount_paid,
            entries,
        };
        self.persist_and_apply(cs, &event).await?;
        info!(%id, status = %to, %amount_paid, "reservation status updated");
        Ok(())
    }

    /// Pay-at-venue: record a completed cash payment and confirm without passing through `paid`.
    ///
    /// The court stays write-locked from the status check until the
    /// reservation is confirmed, so a concurrent cancellation cannot strand
    /// the payment.
    pub async fn confirm_cash_payment(&self, reservation_id: Ulid, amount: Decimal, now: Ms) -> Result<Ulid, EngineError> {
        validate_amount(amount)?;
        let mut guard = self
            .resolve_entity_write(EntityKind::Reservation, reservation_id)
            .await?;
        let status = guard
            .reservation(reservation_id)
            .ok_or(EngineError::not_found(EntityKind::Reservation, reservation_id))?
            .status;
        if !matches!(status, ReservationStatus::PendingPayment | ReservationStatus::Pending) {
            return Err(Policy::NotAwaitingPayment.into());
        }
        let payment = Payment {
            id: Ulid::new(),
            reservation_id: Some(reservation_id),
            gateway_id: None,
            source_id: None,
            amount,
            status: PaymentStatus::Completed,
            processed_events: BTreeSet::new(),
            lock: None,
            failure_reason: None,
            history: vec![AuditEntry::PaymentStatusChanged {
                at: now,
                from: PaymentStatus::Pending,
                to: PaymentStatus::Completed,
                event_id: None,
            }],
            created_at: now,
        };
        let payment_id = self.insert_payment(payment).await?;
        self.advance_locked(
            &mut guard,
            reservation_id,
            ReservationStatus::Confirmed,
            Some(PaymentApplication {
                payment_id,
                event_id: None,
                amount,
            }),
            now,
        )
        .await?;
        Ok(payment_id)
    }

    /// Record whether the player showed up: `confirmed → completed | no_show`.
    pub async fn mark_attendance(&self, reservation_id: Ulid, attended: bool, now: Ms) -> Result<(), EngineError> {
        let to = if attended {
            ReservationStatus::Completed
        } else {
            ReservationStatus::NoShow
        };
        let status = self.reservation_status(reservation_id).await?;
        if status != ReservationStatus::Confirmed {
            return Err(Policy::InvalidTransition { from: status, to }.into());
        }
        self.advance_reservation(reservation_id, to, None, now).await
    }

    // ── Payments ─────────────────────────────────────────────

    /// Open a pending gateway payment for a reservation awaiting payment.
    pub async fn create_payment(
        &self,
        reservation_id: Ulid,
        source_id: Option<String>,
        amount: Decimal,
        now: Ms,
    ) -> Result<Ulid, EngineError> {
        validate_amount(amount)?;
        if source_id.as_ref().is_some_and(|s| s.len() > MAX_GATEWAY_ID_LEN) {
            return Err(EngineError::LimitExceeded("source id too long"));
        }
        if let Some(existing) = source_id
            .as_ref()
            .and_then(|s| self.payment_by_source_id(s))
        {
            return Err(EngineError::AlreadyExists(existing));
        }
        let guard = self
            .resolve_entity_write(EntityKind::Reservation, reservation_id)
            .await?;
        let status = guard
            .reservation(reservation_id)
            .ok_or(EngineError::not_found(EntityKind::Reservation, reservation_id))?
            .status;
        if status != ReservationStatus::PendingPayment {
            return Err(Policy::NotAwaitingPayment.into());
        }
        let payment = Payment {
            id: Ulid::new(),
            reservation_id: Some(reservation_id),
            gateway_id: None,
            source_id,
            amount,
            status: PaymentStatus::Pending,
            processed_events: BTreeSet::new(),
            lock: None,
            failure_reason: None,
            history: Vec::new(),
            created_at: now,
        };
        let id = self.insert_payment(payment).await?;
        drop(guard);
        info!(%id, %reservation_id, %amount, "payment created");
        Ok(id)
    }

    async fn insert_payment(&self, payment: Payment) -> Result<Ulid, EngineError> {
        let id = payment.id;
        let event = Event::PaymentCreated { payment: payment.clone() };
        let _applied = self.wal_append(&event).await?;
        self.index_payment(&payment);
        self.payments.insert(id, Arc::new(RwLock::new(payment)));
        Ok(id)
    }

    /// Read-modify-write one payment under its lock.
    ///
    /// `f` edits a copy; the copy is persisted and installed only if `f`
    /// succeeds and actually changed something. Returns the resulting payment.
    pub async fn modify_payment<F, T>(&self, id: Ulid, f: F) -> Result<(Payment, T), EngineError>
    where
        F: FnOnce(&mut Payment) -> Result<T, EngineError>,
    {
        let handle = self
            .get_payment(&id)
            .ok_or(EngineError::not_found(EntityKind::Payment, id))?;
        let mut guard = handle.write().await;
        let mut updated = guard.clone();
        let out = f(&mut updated)?;
        if updated != *guard {
            if updated.processed_events.len() > MAX_PROCESSED_EVENTS_PER_PAYMENT {
                return Err(EngineError::LimitExceeded("too many events on payment"));
            }
            let event = Event::PaymentUpdated { payment: updated.clone() };
            let _applied = self.wal_append(&event).await?;
            self.index_payment(&updated);
            *guard = updated;
        }
        Ok((guard.clone(), out))
    }

    // ── Queue sessions ───────────────────────────────────────

    /// Create a queue session on a court, in `draft`. Court time is checked
    /// exactly as for a reservation owned by the organizer.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_queue_session(
        &self,
        court_id: Ulid,
        organizer_id: Ulid,
        start: Ms,
        end: Ms,
        max_players: u32,
        cost_per_game: Decimal,
        now: Ms,
    ) -> Result<Ulid, EngineError> {
        validate_amount(cost_per_game)?;
        if max_players == 0 || max_players > MAX_PLAYERS_PER_SESSION {
            return Err(EngineError::LimitExceeded("max_players out of range"));
        }
        let cs = self.court_handle(court_id)?;
        let mut guard = cs.write().await;
        if !guard.court.active {
            return Err(Policy::InactiveCourt.into());
        }
        let venue = self.venue_of(&guard.court)?;
        let day = validate_booking_window(&venue, start, end, now)?;
        if guard.sessions.len() >= MAX_SESSIONS_PER_COURT {
            return Err(EngineError::LimitExceeded("too many queue sessions on court"));
        }

        let span = Span::new(start, end);
        let draft_blocks = self.settings.draft_sessions_block;
        if let Err(e) = check_no_conflict(&guard, &span, &day, organizer_id, draft_blocks)
            .and_then(|()| check_exclusion(&guard, &span, draft_blocks))
        {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let id = Ulid::new();
        let event = Event::QueueSessionCreated {
            session: QueueSession {
                id,
                court_id,
                organizer_id,
                span,
                status: SessionStatus::Draft,
                max_players,
                cost_per_game,
                participants: Vec::new(),
                created_at: now,
            },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%id, %court_id, %organizer_id, "queue session created");
        Ok(id)
    }

    pub async fn set_session_status(&self, session_id: Ulid, status: SessionStatus) -> Result<(), EngineError> {
        let mut guard = self
            .resolve_entity_write(EntityKind::QueueSession, session_id)
            .await?;
        let session = guard
            .session(session_id)
            .ok_or(EngineError::not_found(EntityKind::QueueSession, session_id))?;
        let from = session.status;
        if !from.can_transition_to(status) {
            return Err(Policy::InvalidSessionTransition { from, to: status }.into());
        }
        // A draft that did not hold its time may have been booked over meanwhile.
        let draft_blocks = self.settings.draft_sessions_block;
        if !from.is_blocking(draft_blocks) && status.is_blocking(draft_blocks) {
            let venue = self.venue_of(&guard.court)?;
            let day = local_day(&venue, session.span.start)?;
            if let Err(e) = check_no_conflict(&guard, &session.span, &day, session.organizer_id, draft_blocks)
                .and_then(|()| check_exclusion(&guard, &session.span, draft_blocks))
            {
                metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
        }
        let event = Event::QueueSessionStatusChanged {
            id: session_id,
            court_id: session.court_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(id = %session_id, ?from, to = ?status, "queue session status changed");
        Ok(())
    }

    pub async fn join_queue(&self, session_id: Ulid, user_id: Ulid, now: Ms) -> Result<Ulid, EngineError> {
        let mut guard = self
            .resolve_entity_write(EntityKind::QueueSession, session_id)
            .await?;
        let session = guard
            .session(session_id)
            .ok_or(EngineError::not_found(EntityKind::QueueSession, session_id))?;
        if !session.status.is_joinable() {
            return Err(Policy::NotJoinable.into());
        }
        if session.current_players() >= session.max_players {
            return Err(Policy::Full.into());
        }
        if session.present_participant(user_id).is_some() {
            return Err(Policy::AlreadyJoined.into());
        }
        if session.participants.len() >= MAX_PARTICIPANT_ROWS_PER_SESSION {
            return Err(EngineError::LimitExceeded("too many participants on session"));
        }

        let participant = QueueParticipant {
            id: Ulid::new(),
            session_id,
            user_id,
            joined_at: now,
            left_at: None,
            status: ParticipantStatus::Waiting,
            games_played: 0,
            games_won: 0,
            amount_owed: Decimal::ZERO,
            payment_status: ParticipantPaymentStatus::Unpaid,
        };
        let id = participant.id;
        let event = Event::ParticipantJoined {
            court_id: session.court_id,
            participant,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%session_id, %user_id, "joined queue");
        Ok(id)
    }

    /// Leave a session. Blocked while the player owes for games already played.
    pub async fn leave_queue(&self, session_id: Ulid, user_id: Ulid, now: Ms) -> Result<(), EngineError> {
        let mut guard = self
            .resolve_entity_write(EntityKind::QueueSession, session_id)
            .await?;
        let session = guard
            .session(session_id)
            .ok_or(EngineError::not_found(EntityKind::QueueSession, session_id))?;
        let participant = session
            .present_participant(user_id)
            .ok_or(Policy::NotInQueue)?;
        if let Some(amount_owed) = participant.outstanding_balance() {
            return Err(EngineError::PaymentRequired { amount_owed });
        }
        let event = Event::ParticipantLeft {
            id: participant.id,
            session_id,
            court_id: session.court_id,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%session_id, %user_id, "left queue");
        Ok(())
    }

    /// Charge one game to every listed player. Winners stay on court.
    pub async fn record_game(&self, session_id: Ulid, players: Vec<Ulid>, winners: Vec<Ulid>) -> Result<(), EngineError> {
        let mut guard = self
            .resolve_entity_write(EntityKind::QueueSession, session_id)
            .await?;
        let session = guard
            .session(session_id)
            .ok_or(EngineError::not_found(EntityKind::QueueSession, session_id))?;
        if session.status != SessionStatus::Active {
            return Err(Policy::SessionNotActive.into());
        }
        let players: Vec<Ulid> = players
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if players.is_empty() {
            return Err(Policy::NotInQueue.into());
        }
        if let Some(missing) = players
            .iter()
            .chain(winners.iter())
            .find(|u| session.present_participant(**u).is_none() || !players.contains(u))
        {
            return Err(EngineError::not_found(EntityKind::Participant, *missing));
        }
        let cost = session.cost_per_game;
        if players.iter().any(|u| {
            session
                .present_participant(*u)
                .and_then(|p| p.amount_owed.checked_add(cost))
                .is_none_or(|owed| owed > MAX_AMOUNT)
        }) {
            return Err(EngineError::LimitExceeded("balance too large"));
        }

        let event = Event::GameRecorded {
            session_id,
            court_id: session.court_id,
            players,
            winners,
            cost,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Mark a present participant's balance as paid.
    pub async fn settle_participant(&self, session_id: Ulid, user_id: Ulid) -> Result<(), EngineError> {
        let mut guard = self
            .resolve_entity_write(EntityKind::QueueSession, session_id)
            .await?;
        let session = guard
            .session(session_id)
            .ok_or(EngineError::not_found(EntityKind::QueueSession, session_id))?;
        let participant = session
            .present_participant(user_id)
            .ok_or(Policy::NotInQueue)?;
        let event = Event::ParticipantSettled {
            id: participant.id,
            session_id,
            court_id: session.court_id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Payments whose advisory lock has outlived its TTL.
    pub fn collect_stale_locks(&self, now: Ms) -> Vec<Ulid> {
        self.payments
            .iter()
            .filter_map(|entry| {
                let guard = entry.value().try_read().ok()?;
                guard
                    .lock
                    .as_ref()
                    .is_some_and(|l| l.is_stale(now))
                    .then_some(guard.id)
            })
            .collect()
    }

    /// Drop a stale advisory lock so the next delivery can retry the charge.
    /// Returns whether a lock was released.
    pub async fn release_stale_lock(&self, payment_id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let (_, released) = self
            .modify_payment(payment_id, |p| {
                let Some(lock) = p.lock.take_if(|l| l.is_stale(now)) else {
                    return Ok(false);
                };
                p.history.push(AuditEntry::LockReleased {
                    at: now,
                    event_id: lock.event_id,
                });
                Ok(true)
            })
            .await?;
        Ok(released)
    }

    /// Rewrite the WAL as one snapshot event per live entity.
    ///
    /// Known courts and payments are read-locked first, then the compaction
    /// gate is taken exclusively, which waits out every append that has not
    /// been applied yet. Entities registered in between are picked up with
    /// `try_read`; if one is busy the attempt is dropped and retried.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        loop {
            let mut courts = read_all(&self.courts).await;
            let mut payments = read_all(&self.payments).await;
            let gate = self.compaction.write().await;
            if !read_new(&self.courts, &mut courts) || !read_new(&self.payments, &mut payments) {
                drop((gate, courts, payments));
                tokio::task::yield_now().await;
                continue;
            }

            let mut events: Vec<Event> = self
                .venues
                .iter()
                .map(|v| Event::VenueRegistered { venue: v.value().clone() })
                .collect();
            events.extend(courts.values().map(|cs| Event::CourtRegistered {
                court: cs.court.clone(),
            }));
            for cs in courts.values() {
                events.extend(
                    cs.reservations
                        .iter()
                        .map(|r| Event::ReservationCreated { reservation: r.clone() }),
                );
                events.extend(
                    cs.sessions
                        .iter()
                        .map(|s| Event::QueueSessionCreated { session: s.clone() }),
                );
            }
            // Ulids sort by creation time; replay rebuilds per-reservation payment order from this.
            events.extend(
                payments
                    .values()
                    .map(|p| Event::PaymentCreated { payment: (**p).clone() }),
            );

            let (tx, rx) = oneshot::channel();
            self.wal_tx
                .send(WalCommand::Compact { events, response: tx })
                .await
                .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
            return rx
                .await
                .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
                .map_err(|e| EngineError::WalError(e.to_string()));
        }
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

async fn read_all<T>(map: &DashMap<Ulid, Arc<RwLock<T>>>) -> BTreeMap<Ulid, OwnedRwLockReadGuard<T>> {
    let handles: Vec<_> = map.iter().map(|e| (*e.key(), e.value().clone())).collect();
    let mut guards = BTreeMap::new();
    for (id, handle) in handles {
        guards.insert(id, handle.read_owned().await);
    }
    guards
}

/// Read-lock entries added to `map` since `guards` was filled. False if one is busy.
fn read_new<T>(map: &DashMap<Ulid, Arc<RwLock<T>>>, guards: &mut BTreeMap<Ulid, OwnedRwLockReadGuard<T>>) -> bool {
    for entry in map.iter() {
        if guards.contains_key(entry.key()) {
            continue;
        }
        match entry.value().clone().try_read_owned() {
            Ok(guard) => {
                guards.insert(*entry.key(), guard);
            }
            Err(_) => return false,
        }
    }
    true
}
