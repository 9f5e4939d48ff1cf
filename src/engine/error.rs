use std::fmt;

use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::{ReservationStatus, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Venue,
    Court,
    Reservation,
    Payment,
    QueueSession,
    Participant,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Venue => "venue",
            EntityKind::Court => "court",
            EntityKind::Reservation => "reservation",
            EntityKind::Payment => "payment",
            EntityKind::QueueSession => "queue session",
            EntityKind::Participant => "participant",
        };
        f.write_str(s)
    }
}

/// A request that is well-formed but not allowed in the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Policy {
    #[error("cancellation must be made more than 24 hours before the booking starts")]
    CancellationWindow,
    #[error("a {0} reservation cannot be cancelled")]
    NotCancellable(ReservationStatus),
    #[error("not the owner of this reservation")]
    NotOwner,
    #[error("session is not accepting players")]
    NotJoinable,
    #[error("session is full")]
    Full,
    #[error("already in this session")]
    AlreadyJoined,
    #[error("not in this session")]
    NotInQueue,
    #[error("session is not active")]
    SessionNotActive,
    #[error("reservation cannot move from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("session cannot move from {from:?} to {to:?}")]
    InvalidSessionTransition { from: SessionStatus, to: SessionStatus },
    #[error("reservation is not awaiting payment")]
    NotAwaitingPayment,
    #[error("requested time is outside operating hours")]
    OutsideHours,
    #[error("bookings must start and end on the same day")]
    CrossesMidnight,
    #[error("requested time is in the past")]
    InPast,
    #[error("court is not accepting bookings")]
    InactiveCourt,
    #[error("start must be before end")]
    InvalidSpan,
    #[error("amount must not be negative")]
    InvalidAmount,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Ulid },
    #[error("{0} already exists")]
    AlreadyExists(Ulid),
    #[error("slot no longer available (conflicts with {0})")]
    Conflict(Ulid),
    #[error(transparent)]
    Policy(#[from] Policy),
    #[error("payment required: {amount_owed} owed")]
    PaymentRequired { amount_owed: Decimal },
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn not_found(kind: EntityKind, id: Ulid) -> Self {
        EngineError::NotFound { kind, id }
    }
}
