//! Gateway webhooks: signature check, event parsing and reconciliation
//! against local payments and reservations.

mod event;
mod reconciler;
mod signature;

pub use event::{EventKind, GatewayEvent, parse_event};
pub use reconciler::Reconciler;
pub use signature::{SIGNATURE_HEADER, SignatureError, SignatureVerifier, sign};

use ulid::Ulid;

use crate::engine::EngineError;

/// What handling one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Already processed; at most a repair was run.
    Duplicate,
    /// Another delivery holds the payment's charge lock.
    Deferred,
    Ignored,
    /// The gateway refused the charge; payment failed and reservation cancelled.
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Duplicate => "duplicate",
            Outcome::Deferred => "deferred",
            Outcome::Ignored => "ignored",
            Outcome::Failed => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("payment {payment_id} completed but reservation {reservation_id:?} was not confirmed: {reason}")]
    Integrity {
        payment_id: Ulid,
        reservation_id: Option<Ulid>,
        reason: String,
    },
    #[error("malformed event: {0}")]
    Malformed(String),
}
