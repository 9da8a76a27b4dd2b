use crate::model::*;

use super::EngineError;

/// Source of "now" for the past-date rule.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        now_ms()
    }
}

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Build a span, rejecting empty or reversed intervals.
pub(crate) fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    Ok(Span::new(start, end))
}

pub(crate) fn check_not_past(span: &Span, now: Ms) -> Result<(), EngineError> {
    if span.start < now {
        return Err(EngineError::PastDate {
            start: span.start,
            now,
        });
    }
    Ok(())
}

/// Confirmed bookings that overlap `span`, ordered by start.
pub fn find_conflicts(bookings: &[Booking], span: &Span) -> Vec<Booking> {
    let mut hits: Vec<Booking> = bookings
        .iter()
        .filter(|b| b.conflicts_with(span))
        .cloned()
        .collect();
    hits.sort_by_key(|b| b.span.start);
    hits
}
