use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Whole minutes, the only duration unit.
pub type Minutes = u32;

pub fn minutes(m: Minutes) -> TimeDelta {
    TimeDelta::minutes(i64::from(m))
}

/// Half-open interval `[start, end)` on the shop's wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Span of `duration` minutes beginning at `start`.
    pub fn starting_at(start: NaiveDateTime, duration: Minutes) -> Self {
        Self::new(start, start + minutes(duration))
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Billable work or a mandatory pause inside a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Conflict-checked and persisted.
    Service,
    /// Consumes timeline, never checked or persisted.
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBlock {
    pub kind: BlockKind,
    pub duration_minutes: Minutes,
}

impl ServiceBlock {
    pub fn service(duration_minutes: Minutes) -> Self {
        Self { kind: BlockKind::Service, duration_minutes }
    }

    pub fn pause(duration_minutes: Minutes) -> Self {
        Self { kind: BlockKind::Pause, duration_minutes }
    }
}

/// A named catalog entry. Block order is fixed at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub code: String,
    pub blocks: Vec<ServiceBlock>,
}

impl Service {
    pub fn new(code: impl Into<String>, blocks: Vec<ServiceBlock>) -> Self {
        Self { code: code.into(), blocks }
    }

    /// Wall-clock minutes the whole sequence occupies, pauses included.
    pub fn total_minutes(&self) -> Minutes {
        self.blocks.iter().map(|b| b.duration_minutes).sum()
    }

    /// Multi-block services get a group id when materialized.
    pub fn is_grouped(&self) -> bool {
        self.blocks.len() > 1
    }
}

/// One block of a service placed on the timeline. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectedInterval {
    pub span: Span,
    pub kind: BlockKind,
    /// Position in the originating block list.
    pub block_index: u32,
}

impl ProjectedInterval {
    pub fn is_billable(&self) -> bool {
        self.kind == BlockKind::Service
    }
}

/// A committed, billable appointment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub start: NaiveDateTime,
    pub duration_minutes: Minutes,
    /// Shared by every row materialized from one multi-block request.
    pub group_id: Option<Ulid>,
    pub service_code: Option<String>,
    pub block_index: u32,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::starting_at(self.start, self.duration_minutes)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.span().end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub name: String,
    pub phone: String,
}

/// Result of a successful materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub group_id: Option<Ulid>,
    pub appointments: Vec<Appointment>,
}

/// WAL record format. Flat, no nesting.
///
/// Every variant is one atomic unit: a multi-row write is a single record, so
/// replay sees either all of its rows or none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CustomerCreated {
        id: Ulid,
        name: String,
        phone: String,
    },
    CustomerUpdated {
        id: Ulid,
        name: String,
        phone: String,
    },
    CustomerDeleted {
        id: Ulid,
        appointment_ids: Vec<Ulid>,
    },
    AppointmentsCommitted {
        appointments: Vec<Appointment>,
    },
    AppointmentRescheduled {
        id: Ulid,
        start: NaiveDateTime,
        duration_minutes: Minutes,
    },
    AppointmentsRemoved {
        ids: Vec<Ulid>,
    },
}
