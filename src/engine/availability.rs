use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::catalog::Catalog;
use crate::model::*;

use super::conflict::has_conflict;
use super::projection::project;

// ── Availability Oracle ───────────────────────────────────────────

/// Can `service` start at `start` without any billable block overlapping a
/// committed appointment?
///
/// Every committed row counts (pauses are never persisted, so each row is a
/// realized service block). A service without billable blocks is always
/// available.
pub fn is_available(service: &Service, start: NaiveDateTime, committed: &[Appointment]) -> bool {
    let candidates = project(service, start);
    if !candidates.iter().any(ProjectedInterval::is_billable) {
        return true;
    }
    let busy: Vec<Span> = committed.iter().map(Appointment::span).collect();
    !has_conflict(&candidates, &busy)
}

/// Every catalog service that could start at `start`, keyed by code.
///
/// Each service is judged independently against the same snapshot.
pub fn list_available(
    catalog: &Catalog,
    start: NaiveDateTime,
    committed: &[Appointment],
) -> BTreeMap<String, Service> {
    let busy: Vec<Span> = committed.iter().map(Appointment::span).collect();
    catalog
        .all()
        .iter()
        .filter(|(_, service)| !has_conflict(&project(service, start), &busy))
        .map(|(code, service)| (code.clone(), service.clone()))
        .collect()
}
