use chrono::{Datelike, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// True iff any billable candidate overlaps any committed span.
///
/// Pause candidates are skipped. The committed set is scanned in full.
pub fn has_conflict(candidates: &[ProjectedInterval], committed: &[Span]) -> bool {
    candidates
        .iter()
        .filter(|c| c.is_billable())
        .any(|c| committed.iter().any(|span| c.span.overlaps(span)))
}

/// Committed appointment that the billable candidates would collide with, if any.
/// `exclude` is left out of the comparison set (an appointment being moved).
pub(crate) fn find_conflict(
    candidates: &[ProjectedInterval],
    committed: &[Appointment],
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    candidates
        .iter()
        .filter(|c| c.is_billable())
        .find_map(|c| {
            committed
                .iter()
                .filter(|a| Some(a.id) != exclude)
                .find(|a| c.span.overlaps(&a.span()))
                .map(|a| a.id)
        })
}

pub(crate) fn check_no_conflict(
    candidates: &[ProjectedInterval],
    committed: &[Appointment],
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(candidates, committed, exclude) {
        Some(id) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}

pub(crate) fn validate_start(start: NaiveDateTime) -> Result<(), EngineError> {
    if start.year() < MIN_VALID_YEAR || start.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("start instant out of range"));
    }
    Ok(())
}

pub(crate) fn validate_duration(duration_minutes: Minutes) -> Result<(), EngineError> {
    if duration_minutes == 0 {
        return Err(EngineError::Validation("duration_minutes must be positive".into()));
    }
    if duration_minutes > MAX_BLOCK_MINUTES {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    Ok(())
}
