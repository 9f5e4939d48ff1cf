use rust_decimal::Decimal;

use crate::model::{HOUR_MS, MINUTE_MS, Ms};

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Reservations and queue sessions never exceed one calendar day.
pub const MAX_SPAN_DURATION_MS: Ms = 24 * HOUR_MS;

/// User-initiated cancellation must happen at least this long before start.
pub const CANCELLATION_LEAD_MS: Ms = 24 * HOUR_MS;

/// A `processing` advisory lock older than this belongs to a crashed worker.
pub const ADVISORY_LOCK_TTL_MS: Ms = 5 * MINUTE_MS;

/// Fixed duration of one queue game, used for wait estimates.
pub const GAME_DURATION_MINUTES: u32 = 15;

pub const MAX_VENUES: usize = 10_000;
pub const MAX_COURTS: usize = 50_000;
pub const MAX_RESERVATIONS_PER_COURT: usize = 200_000;
pub const MAX_SESSIONS_PER_COURT: usize = 50_000;
pub const MAX_PLAYERS_PER_SESSION: u32 = 64;
/// Rows kept per session, counting players who left and rejoined.
pub const MAX_PARTICIPANT_ROWS_PER_SESSION: usize = 4096;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_GATEWAY_ID_LEN: usize = 256;
pub const MAX_PROCESSED_EVENTS_PER_PAYMENT: usize = 1024;

/// Largest single money amount, and largest balance a queue participant may owe.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
