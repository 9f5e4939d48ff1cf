use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::hours::OperatingHours;
use crate::limits::ADVISORY_LOCK_TTL_MS;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Widen to whole hours relative to `origin`: start rounds down, end rounds up.
    /// A booking ending at 14:30 occupies the 14:00 hour entirely.
    pub fn to_hour_grid(&self, origin: Ms) -> Span {
        let start = origin + (self.start - origin).div_euclid(HOUR_MS) * HOUR_MS;
        let rel_end = self.end - origin;
        let end = origin + (rel_end + HOUR_MS - 1).div_euclid(HOUR_MS) * HOUR_MS;
        Span::new(start, end)
    }
}

// ── Venue & court ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Ulid,
    pub name: Option<String>,
    /// Offset of the venue's wall clock from UTC, in minutes.
    pub utc_offset_minutes: i32,
    pub hours: OperatingHours,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub name: Option<String>,
    pub hourly_rate: Decimal,
    pub active: bool,
}

// ── Reservation ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    PendingPayment,
    /// Held without an online payment (pay at the venue).
    Pending,
    Paid,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl ReservationStatus {
    /// Statuses that occupy the court for availability purposes.
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::PendingPayment | Self::Pending | Self::Paid | Self::Confirmed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::NoShow)
    }

    pub fn can_transition_to(self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, to),
            (PendingPayment, Pending | Paid | Confirmed | Cancelled)
                | (Pending, Paid | Confirmed | Cancelled)
                | (Paid, Confirmed | Cancelled)
                | (Confirmed, Completed | NoShow | Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::NoShow => "no_show",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User(Ulid),
    Admin,
    /// Initiated by this service itself, e.g. after a failed payment.
    System,
}

/// One immutable entry in a reservation's or payment's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntry {
    Created {
        at: Ms,
        total_amount: Decimal,
    },
    StatusChanged {
        at: Ms,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    PaymentApplied {
        at: Ms,
        payment_id: Ulid,
        event_id: Option<String>,
        amount: Decimal,
    },
    Cancelled {
        at: Ms,
        actor: Actor,
        reason: String,
    },
    PaymentStatusChanged {
        at: Ms,
        from: PaymentStatus,
        to: PaymentStatus,
        event_id: Option<String>,
    },
    LockAcquired {
        at: Ms,
        event_id: String,
        took_over_from: Option<String>,
    },
    LockReleased {
        at: Ms,
        event_id: String,
    },
    GatewayCharged {
        at: Ms,
        charge_id: String,
    },
    PaymentFailed {
        at: Ms,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub court_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub history: Vec<AuditEntry>,
    pub cancelled_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }
}

// ── Payment ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Short-lived, persisted marker that a worker is creating a charge for this payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryLock {
    pub event_id: String,
    pub acquired_at: Ms,
}

impl AdvisoryLock {
    pub fn is_stale(&self, now: Ms) -> bool {
        now - self.acquired_at > ADVISORY_LOCK_TTL_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub reservation_id: Option<Ulid>,
    /// Charge id assigned by the gateway once a charge exists.
    pub gateway_id: Option<String>,
    /// Chargeable source the user authorized at checkout.
    pub source_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    /// Gateway event ids already applied to this payment.
    pub processed_events: BTreeSet<String>,
    pub lock: Option<AdvisoryLock>,
    pub failure_reason: Option<String>,
    pub history: Vec<AuditEntry>,
    pub created_at: Ms,
}

impl Payment {
    pub fn has_processed(&self, event_id: &str) -> bool {
        self.processed_events.contains(event_id)
    }
}

// ── Queue sessions ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Draft,
    PendingApproval,
    Open,
    Active,
    Paused,
    Closed,
    Cancelled,
}

impl SessionStatus {
    /// Statuses that occupy the court. `Draft` blocks only when configured to.
    pub fn is_blocking(self, draft_blocks: bool) -> bool {
        match self {
            Self::PendingApproval | Self::Open | Self::Active | Self::Paused => true,
            Self::Draft => draft_blocks,
            Self::Closed | Self::Cancelled => false,
        }
    }

    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Open | Self::Active)
    }

    pub fn can_transition_to(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Draft, PendingApproval | Open | Cancelled)
                | (PendingApproval, Open | Cancelled)
                | (Open, Active | Closed | Cancelled)
                | (Active, Paused | Closed | Cancelled)
                | (Paused, Active | Closed | Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Waiting,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantPaymentStatus {
    Unpaid,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueParticipant {
    pub id: Ulid,
    pub session_id: Ulid,
    pub user_id: Ulid,
    pub joined_at: Ms,
    /// `None` while the participant is still in the session.
    pub left_at: Option<Ms>,
    pub status: ParticipantStatus,
    pub games_played: u32,
    pub games_won: u32,
    pub amount_owed: Decimal,
    pub payment_status: ParticipantPaymentStatus,
}

impl QueueParticipant {
    pub fn is_present(&self) -> bool {
        self.left_at.is_none()
    }

    /// Leaving is blocked while played games are unpaid.
    pub fn outstanding_balance(&self) -> Option<Decimal> {
        let owes = self.games_played >= 1
            && self.amount_owed > Decimal::ZERO
            && self.payment_status != ParticipantPaymentStatus::Paid;
        owes.then_some(self.amount_owed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSession {
    pub id: Ulid,
    pub court_id: Ulid,
    pub organizer_id: Ulid,
    pub span: Span,
    pub status: SessionStatus,
    pub max_players: u32,
    pub cost_per_game: Decimal,
    /// Every participant ever admitted, including those who left.
    pub participants: Vec<QueueParticipant>,
    pub created_at: Ms,
}

impl QueueSession {
    pub fn present(&self) -> impl Iterator<Item = &QueueParticipant> {
        self.participants.iter().filter(|p| p.is_present())
    }

    pub fn current_players(&self) -> u32 {
        self.present().count() as u32
    }

    pub fn present_participant(&self, user_id: Ulid) -> Option<&QueueParticipant> {
        self.present().find(|p| p.user_id == user_id)
    }

    pub fn present_participant_mut(&mut self, user_id: Ulid) -> Option<&mut QueueParticipant> {
        self.participants
            .iter_mut()
            .find(|p| p.is_present() && p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, id: Ulid) -> Option<&mut QueueParticipant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }
}

// ── Per-court state ──────────────────────────────────────────────

/// Everything that lives under one court's row lock.
#[derive(Debug, Clone)]
pub struct CourtState {
    pub court: Court,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    /// Sorted by `span.start`.
    pub sessions: Vec<QueueSession>,
}

impl CourtState {
    pub fn new(court: Court) -> Self {
        Self {
            court,
            reservations: Vec::new(),
            sessions: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.court.id
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn insert_session(&mut self, session: QueueSession) {
        let pos = self
            .sessions
            .partition_point(|s| s.span.start <= session.span.start);
        self.sessions.insert(pos, session);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn session(&self, id: Ulid) -> Option<&QueueSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: Ulid) -> Option<&mut QueueSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping_reservations(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn overlapping_sessions(&self, query: &Span) -> impl Iterator<Item = &QueueSession> {
        let right_bound = self.sessions.partition_point(|s| s.span.start < query.end);
        self.sessions[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VenueRegistered {
        venue: Venue,
    },
    CourtRegistered {
        court: Court,
    },
    CourtUpdated {
        id: Ulid,
        hourly_rate: Decimal,
        active: bool,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        court_id: Ulid,
        status: ReservationStatus,
        amount_paid: Decimal,
        entries: Vec<AuditEntry>,
    },
    ReservationCancelled {
        id: Ulid,
        court_id: Ulid,
        at: Ms,
        reason: String,
        entry: AuditEntry,
    },
    PaymentCreated {
        payment: Payment,
    },
    PaymentUpdated {
        payment: Payment,
    },
    QueueSessionCreated {
        session: QueueSession,
    },
    QueueSessionStatusChanged {
        id: Ulid,
        court_id: Ulid,
        status: SessionStatus,
    },
    ParticipantJoined {
        court_id: Ulid,
        participant: QueueParticipant,
    },
    ParticipantLeft {
        id: Ulid,
        session_id: Ulid,
        court_id: Ulid,
        at: Ms,
    },
    GameRecorded {
        session_id: Ulid,
        court_id: Ulid,
        players: Vec<Ulid>,
        winners: Vec<Ulid>,
        cost: Decimal,
    },
    ParticipantSettled {
        id: Ulid,
        session_id: Ulid,
        court_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One hourly unit of court time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// `HH:00`
    pub time: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStanding {
    pub participant_id: Ulid,
    pub user_id: Ulid,
    pub position: u32,
    pub joined_at: Ms,
    pub status: ParticipantStatus,
    pub games_played: u32,
    pub estimated_wait_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStandings {
    pub session_id: Ulid,
    pub status: SessionStatus,
    pub current_players: u32,
    pub max_players: u32,
    pub standings: Vec<QueueStanding>,
    /// The viewer's own position, if they are in the session.
    pub position: Option<u32>,
    pub estimated_wait_minutes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            court_id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            total_amount: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            history: Vec::new(),
            cancelled_at: None,
            cancellation_reason: None,
            created_at: 0,
        }
    }

    fn court_state() -> CourtState {
        CourtState::new(Court {
            id: Ulid::new(),
            venue_id: Ulid::new(),
            name: None,
            hourly_rate: Decimal::new(500, 0),
            active: true,
        })
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn hour_grid_rounds_end_up() {
        let origin = 1_000 * HOUR_MS;
        let s = Span::new(origin + 14 * HOUR_MS, origin + 14 * HOUR_MS + 30 * MINUTE_MS);
        assert_eq!(
            s.to_hour_grid(origin),
            Span::new(origin + 14 * HOUR_MS, origin + 15 * HOUR_MS)
        );
        let s = Span::new(origin + 9 * HOUR_MS + 15 * MINUTE_MS, origin + 11 * HOUR_MS);
        assert_eq!(
            s.to_hour_grid(origin),
            Span::new(origin + 9 * HOUR_MS, origin + 11 * HOUR_MS)
        );
    }

    #[test]
    fn reservation_transitions() {
        use ReservationStatus::*;
        assert!(PendingPayment.can_transition_to(Paid));
        assert!(PendingPayment.can_transition_to(Confirmed));
        assert!(Paid.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(NoShow));
        assert!(!Confirmed.can_transition_to(Paid));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!PendingPayment.can_transition_to(Completed));
    }

    #[test]
    fn blocking_sets() {
        use ReservationStatus::*;
        for s in [PendingPayment, Pending, Paid, Confirmed] {
            assert!(s.is_blocking());
        }
        for s in [Cancelled, Completed, NoShow] {
            assert!(!s.is_blocking());
            assert!(s.is_terminal());
        }
        assert!(SessionStatus::Draft.is_blocking(true));
        assert!(!SessionStatus::Draft.is_blocking(false));
        assert!(SessionStatus::Active.is_blocking(false));
        assert!(!SessionStatus::Closed.is_blocking(true));
    }

    #[test]
    fn advisory_lock_staleness() {
        let lock = AdvisoryLock {
            event_id: "evt_1".into(),
            acquired_at: 0,
        };
        assert!(!lock.is_stale(ADVISORY_LOCK_TTL_MS));
        assert!(lock.is_stale(ADVISORY_LOCK_TTL_MS + 1));
    }

    #[test]
    fn reservations_kept_sorted() {
        let mut cs = court_state();
        cs.insert_reservation(reservation(300, 400, ReservationStatus::Confirmed));
        cs.insert_reservation(reservation(100, 200, ReservationStatus::Confirmed));
        cs.insert_reservation(reservation(200, 300, ReservationStatus::Cancelled));
        let starts: Vec<Ms> = cs.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut cs = court_state();
        cs.insert_reservation(reservation(100, 200, ReservationStatus::Confirmed));
        cs.insert_reservation(reservation(450, 600, ReservationStatus::Confirmed));
        cs.insert_reservation(reservation(1000, 1100, ReservationStatus::Confirmed));

        let query = Span::new(500, 800);
        let hits: Vec<_> = cs.overlapping_reservations(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut cs = court_state();
        cs.insert_reservation(reservation(100, 200, ReservationStatus::Confirmed));
        let hits: Vec<_> = cs.overlapping_reservations(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn outstanding_balance_requires_played_unpaid_games() {
        let mut p = QueueParticipant {
            id: Ulid::new(),
            session_id: Ulid::new(),
            user_id: Ulid::new(),
            joined_at: 0,
            left_at: None,
            status: ParticipantStatus::Waiting,
            games_played: 0,
            games_won: 0,
            amount_owed: Decimal::ZERO,
            payment_status: ParticipantPaymentStatus::Unpaid,
        };
        assert_eq!(p.outstanding_balance(), None);

        p.games_played = 2;
        p.amount_owed = Decimal::new(300, 0);
        assert_eq!(p.outstanding_balance(), Some(Decimal::new(300, 0)));

        p.payment_status = ParticipantPaymentStatus::Paid;
        assert_eq!(p.outstanding_balance(), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation(100, 200, ReservationStatus::PendingPayment),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
