use chrono::NaiveDate;
use ulid::Ulid;

use crate::hours::LocalClock;
use crate::model::*;

use super::availability::{blocked_hours, blocking_intervals, compute_slots};
use super::queue;
use super::{Engine, EngineError, EntityKind};

impl Engine {
    /// Hourly slots for `date` in the venue's local time.
    ///
    /// A closed day yields no slots. An inactive court lists its slots, all unavailable.
    pub async fn available_slots(&self, court_id: Ulid, date: NaiveDate, now: Ms) -> Result<Vec<Slot>, EngineError> {
        let cs = self.court_handle(court_id)?;
        let guard = cs.read().await;
        let venue = self.venue_of(&guard.court)?;

        let Some(hours) = venue.hours.resolve(date) else {
            return Ok(Vec::new());
        };
        let day = LocalClock::new(venue.utc_offset_minutes)
            .day_span(date)
            .ok_or(EngineError::LimitExceeded("date out of range"))?;

        let blocking = blocking_intervals(&guard, &day, self.settings.draft_sessions_block);
        let blocked = blocked_hours(&blocking, &day);
        let mut slots = compute_slots(hours, &day, &blocked, now);
        if !guard.court.active {
            for slot in &mut slots {
                slot.available = false;
            }
        }
        Ok(slots)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let court_id = self
            .court_for_entity(&id)
            .ok_or(EngineError::not_found(EntityKind::Reservation, id))?;
        let cs = self.court_handle(court_id)?;
        let guard = cs.read().await;
        guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::not_found(EntityKind::Reservation, id))
    }

    pub async fn reservation_status(&self, id: Ulid) -> Result<ReservationStatus, EngineError> {
        self.get_reservation(id).await.map(|r| r.status)
    }

    pub async fn get_session(&self, id: Ulid) -> Result<QueueSession, EngineError> {
        let court_id = self
            .court_for_entity(&id)
            .ok_or(EngineError::not_found(EntityKind::QueueSession, id))?;
        let cs = self.court_handle(court_id)?;
        let guard = cs.read().await;
        guard
            .session(id)
            .cloned()
            .ok_or(EngineError::not_found(EntityKind::QueueSession, id))
    }

    /// Present participants with their positions, plus the viewer's own wait.
    pub async fn queue_standings(&self, session_id: Ulid, viewer: Option<Ulid>) -> Result<QueueStandings, EngineError> {
        let session = self.get_session(session_id).await?;
        Ok(queue::standings(&session, viewer))
    }

    pub async fn payment_snapshot(&self, id: Ulid) -> Result<Payment, EngineError> {
        let handle = self
            .get_payment(&id)
            .ok_or(EngineError::not_found(EntityKind::Payment, id))?;
        let guard = handle.read().await;
        Ok(guard.clone())
    }

    pub fn payment_by_gateway_id(&self, gateway_id: &str) -> Option<Ulid> {
        self.payments_by_gateway_id.get(gateway_id).map(|e| *e.value())
    }

    pub fn payment_by_source_id(&self, source_id: &str) -> Option<Ulid> {
        self.payments_by_source_id.get(source_id).map(|e| *e.value())
    }

    /// Most recently created payment for a reservation.
    pub fn latest_payment_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.payments_by_reservation
            .get(reservation_id)
            .and_then(|ids| ids.last().copied())
    }
}
