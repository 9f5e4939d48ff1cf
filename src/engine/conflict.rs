use rust_decimal::Decimal;
use ulid::Ulid;

use crate::hours::LocalClock;
use crate::model::*;

use super::availability::{blocked_hours, blocking_intervals};
use super::{EngineError, Policy};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_amount(amount: Decimal) -> Result<(), EngineError> {
    if amount < Decimal::ZERO {
        return Err(Policy::InvalidAmount.into());
    }
    if amount > crate::limits::MAX_AMOUNT {
        return Err(EngineError::LimitExceeded("amount too large"));
    }
    Ok(())
}

/// The venue-local day that `start` falls on, as a Unix-ms span.
pub(crate) fn local_day(venue: &Venue, start: Ms) -> Result<Span, EngineError> {
    let clock = LocalClock::new(venue.utc_offset_minutes);
    clock
        .date_of(start)
        .and_then(|date| clock.day_span(date))
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))
}

/// Checks a requested `[start, end)` against the venue calendar and returns the
/// local day it falls on, as a Unix-ms span.
///
/// Rejects bookings that cross local midnight, fall outside the day's operating
/// hours, or start at or before `now`.
pub(crate) fn validate_booking_window(
    venue: &Venue,
    start: Ms,
    end: Ms,
    now: Ms,
) -> Result<Span, EngineError> {
    if start >= end {
        return Err(Policy::InvalidSpan.into());
    }
    let span = Span::new(start, end);
    validate_span(&span)?;
    if start <= now {
        return Err(Policy::InPast.into());
    }

    let clock = LocalClock::new(venue.utc_offset_minutes);
    let start_date = clock
        .date_of(start)
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    // `end` is exclusive: a booking ending exactly at midnight stays on its day.
    let end_date = clock
        .date_of(end - 1)
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    if start_date != end_date {
        return Err(Policy::CrossesMidnight.into());
    }

    let day = clock
        .day_span(start_date)
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    let hours = venue
        .hours
        .resolve(start_date)
        .ok_or(Policy::OutsideHours)?;
    let start_min = ((start - day.start) / MINUTE_MS) as u32;
    let end_min = (end - day.start + MINUTE_MS - 1).div_euclid(MINUTE_MS) as u32;
    if !hours.covers(start_min, end_min) {
        return Err(Policy::OutsideHours.into());
    }
    Ok(day)
}

/// Whole-hour conflict check: the requested hours may not touch any hour
/// blocked by another user's reservation or queue session. The requester's own
/// bookings are skipped here; `check_exclusion` still applies to them.
pub(crate) fn check_no_conflict(
    cs: &CourtState,
    span: &Span,
    day: &Span,
    requester: Ulid,
    draft_blocks: bool,
) -> Result<(), EngineError> {
    let requested = span.to_hour_grid(day.start);
    for b in blocking_intervals(cs, day, draft_blocks) {
        if b.owner == requester {
            continue;
        }
        let taken = blocked_hours(std::slice::from_ref(&b), day);
        if taken.iter().any(|t| t.overlaps(&requested)) {
            return Err(EngineError::Conflict(b.id));
        }
    }
    Ok(())
}

/// Store-level exclusion: no two blocking bookings on a court may overlap,
/// whoever owns them.
pub(crate) fn check_exclusion(cs: &CourtState, span: &Span, draft_blocks: bool) -> Result<(), EngineError> {
    if let Some(r) = cs.overlapping_reservations(span).find(|r| r.is_blocking()) {
        return Err(EngineError::Conflict(r.id));
    }
    if let Some(s) = cs
        .overlapping_sessions(span)
        .find(|s| s.status.is_blocking(draft_blocks))
    {
        return Err(EngineError::Conflict(s.id));
    }
    Ok(())
}
