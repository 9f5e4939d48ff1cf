use ulid::Ulid;

use crate::hours::DayHours;
use crate::model::*;

// ── Blocking intervals ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingSource {
    Reservation(ReservationStatus),
    QueueSession(SessionStatus),
}

/// A stretch of court time held by a reservation or a queue session.
/// Reservations and sessions use different status vocabularies; both reduce to this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingInterval {
    pub court_id: Ulid,
    pub id: Ulid,
    /// Reservation holder or session organizer.
    pub owner: Ulid,
    pub span: Span,
    pub source: BlockingSource,
}

/// Every blocking reservation and queue session on the court that overlaps `window`.
pub fn blocking_intervals(cs: &CourtState, window: &Span, draft_blocks: bool) -> Vec<BlockingInterval> {
    let court_id = cs.id();
    let reservations = cs
        .overlapping_reservations(window)
        .filter(|r| r.is_blocking())
        .map(|r| BlockingInterval {
            court_id,
            id: r.id,
            owner: r.user_id,
            span: r.span,
            source: BlockingSource::Reservation(r.status),
        });
    let sessions = cs
        .overlapping_sessions(window)
        .filter(|s| s.status.is_blocking(draft_blocks))
        .map(|s| BlockingInterval {
            court_id,
            id: s.id,
            owner: s.organizer_id,
            span: s.span,
            source: BlockingSource::QueueSession(s.status),
        });

    let mut out: Vec<BlockingInterval> = reservations.chain(sessions).collect();
    out.sort_by_key(|b| b.span.start);
    out
}

/// Whole-hour ranges blocked inside `day`: each interval widened to
/// `[floor(start), ceil(end))`, clamped to the day, then merged.
pub fn blocked_hours(blocking: &[BlockingInterval], day: &Span) -> Vec<Span> {
    let mut spans: Vec<Span> = blocking
        .iter()
        .filter(|b| b.span.overlaps(day))
        .map(|b| {
            let grid = b.span.to_hour_grid(day.start);
            Span::new(grid.start.max(day.start), grid.end.min(day.end))
        })
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

// ── Slot generation ───────────────────────────────────────────────

/// Hourly slots for one local day.
///
/// One slot per whole hour from the first full hour after opening up to the
/// last full hour before closing. A slot is unavailable when it has already
/// started (which covers the in-progress hour of today) or when it falls in
/// any blocked range.
pub fn compute_slots(hours: &DayHours, day: &Span, blocked: &[Span], now: Ms) -> Vec<Slot> {
    let first = hours.first_slot_hour();
    let end = hours.slot_end_hour();
    let mut slots = Vec::with_capacity(end.saturating_sub(first) as usize);
    let mut bi = 0;

    for hour in first..end {
        let start = day.start + Ms::from(hour) * HOUR_MS;
        let slot = Span::new(start, start + HOUR_MS);

        // Blocked ranges are sorted and disjoint; skip those that ended before this slot.
        while bi < blocked.len() && blocked[bi].end <= slot.start {
            bi += 1;
        }
        let is_blocked = blocked.get(bi).is_some_and(|b| b.overlaps(&slot));
        let has_started = slot.start <= now;

        slots.push(Slot {
            time: format!("{hour:02}:00"),
            available: !is_blocked && !has_started,
        });
    }
    slots
}
