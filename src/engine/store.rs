use std::collections::HashMap;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Committed appointments, kept sorted by `(start, id)`, plus a group index
/// and an id -> start index so lookups by id are a binary search.
///
/// Lives behind the engine's store lock; every method assumes the caller holds
/// it (shared for reads, exclusive for writes).
#[derive(Debug, Default)]
pub struct AppointmentStore {
    appointments: Vec<Appointment>,
    starts: HashMap<Ulid, NaiveDateTime>,
    groups: HashMap<Ulid, Vec<Ulid>>,
}

impl AppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    /// Full scan, ordered by start.
    pub fn list_all(&self) -> &[Appointment] {
        &self.appointments
    }

    fn position(&self, id: &Ulid) -> Option<usize> {
        let start = *self.starts.get(id)?;
        self.appointments
            .binary_search_by_key(&(start, *id), |a| (a.start, a.id))
            .ok()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Appointment> {
        self.position(id).map(|pos| &self.appointments[pos])
    }

    /// Insert maintaining sort order by `(start, id)`.
    pub fn insert(&mut self, appointment: Appointment) -> Ulid {
        let id = appointment.id;
        if let Some(gid) = appointment.group_id {
            self.groups.entry(gid).or_default().push(id);
        }
        self.starts.insert(id, appointment.start);
        let pos = self
            .appointments
            .binary_search_by_key(&(appointment.start, id), |a| (a.start, a.id))
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
        id
    }

    pub fn delete(&mut self, id: &Ulid) -> Option<Appointment> {
        let pos = self.position(id)?;
        self.starts.remove(id);
        let removed = self.appointments.remove(pos);
        if let Some(gid) = removed.group_id
            && let Some(mut members) = self.groups.remove(&gid)
        {
            members.retain(|m| m != id);
            if !members.is_empty() {
                self.groups.insert(gid, members);
            }
        }
        Some(removed)
    }

    /// Members of a group in block order.
    pub fn group_members(&self, group_id: &Ulid) -> Vec<&Appointment> {
        let mut members: Vec<&Appointment> = self
            .groups
            .get(group_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default();
        members.sort_by_key(|a| a.block_index);
        members
    }

    /// Ids that go away when `id` is deleted: its whole group, or just itself.
    pub fn cascade_ids(&self, id: &Ulid) -> Option<Vec<Ulid>> {
        let appointment = self.get(id)?;
        match appointment.group_id {
            Some(gid) => Some(self.group_members(&gid).iter().map(|a| a.id).collect()),
            None => Some(vec![appointment.id]),
        }
    }

    pub fn ids_for_customer(&self, customer_id: &Ulid) -> Vec<Ulid> {
        self.appointments
            .iter()
            .filter(|a| a.customer_id == *customer_id)
            .map(|a| a.id)
            .collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply one WAL record. Customers live outside the store lock's data but
    /// are only written while it is held exclusively.
    pub fn apply_event(&mut self, event: &Event, customers: &DashMap<Ulid, Customer>) {
        match event {
            Event::CustomerCreated { id, name, phone }
            | Event::CustomerUpdated { id, name, phone } => {
                customers.insert(
                    *id,
                    Customer {
                        id: *id,
                        name: name.clone(),
                        phone: phone.clone(),
                    },
                );
            }
            Event::CustomerDeleted {
                id,
                appointment_ids,
            } => {
                for aid in appointment_ids {
                    self.delete(aid);
                }
                customers.remove(id);
            }
            Event::AppointmentsCommitted { appointments } => {
                for appointment in appointments {
                    self.insert(appointment.clone());
                }
            }
            Event::AppointmentRescheduled {
                id,
                start,
                duration_minutes,
            } => {
                if let Some(mut appointment) = self.delete(id) {
                    appointment.start = *start;
                    appointment.duration_minutes = *duration_minutes;
                    self.insert(appointment);
                }
            }
            Event::AppointmentsRemoved { ids } => {
                for id in ids {
                    self.delete(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn appt(start: NaiveDateTime, group_id: Option<Ulid>, block_index: u32) -> Appointment {
        Appointment {
            id: Ulid::new(),
            customer_id: Ulid::new(),
            start,
            duration_minutes: 15,
            group_id,
            service_code: group_id.map(|_| "COLOR".to_string()),
            block_index,
        }
    }

    #[test]
    fn list_all_is_ordered_by_start() {
        let mut store = AppointmentStore::new();
        store.insert(appt(at(12, 0), None, 0));
        store.insert(appt(at(9, 0), None, 0));
        store.insert(appt(at(10, 30), None, 0));
        let starts: Vec<_> = store.list_all().iter().map(|a| a.start).collect();
        assert_eq!(starts, vec![at(9, 0), at(10, 30), at(12, 0)]);
    }

    #[test]
    fn delete_single() {
        let mut store = AppointmentStore::new();
        let id = store.insert(appt(at(9, 0), None, 0));
        store.insert(appt(at(10, 0), None, 0));
        assert_eq!(store.delete(&id).map(|a| a.id), Some(id));
        assert_eq!(store.len(), 1);
        assert!(store.delete(&id).is_none());
    }

    #[test]
    fn group_index_tracks_members() {
        let mut store = AppointmentStore::new();
        let gid = Ulid::new();
        let second = store.insert(appt(at(10, 0), Some(gid), 2));
        let first = store.insert(appt(at(9, 0), Some(gid), 0));
        store.insert(appt(at(11, 0), None, 0));

        let ids: Vec<_> = store.group_members(&gid).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(store.cascade_ids(&second), Some(vec![first, second]));

        store.delete(&first);
        let ids: Vec<_> = store.group_members(&gid).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second]);
        store.delete(&second);
        assert!(store.group_members(&gid).is_empty());
    }

    #[test]
    fn lookup_by_id_tracks_inserts_and_moves() {
        let customers = DashMap::new();
        let mut store = AppointmentStore::new();
        let same_start: Vec<Ulid> = (0..5).map(|_| store.insert(appt(at(9, 0), None, 0))).collect();
        for id in &same_start {
            assert_eq!(store.get(id).map(|a| a.id), Some(*id));
        }

        let moved = same_start[2];
        store.apply_event(
            &Event::AppointmentRescheduled {
                id: moved,
                start: at(15, 0),
                duration_minutes: 15,
            },
            &customers,
        );
        assert_eq!(store.get(&moved).map(|a| a.start), Some(at(15, 0)));

        store.delete(&moved);
        assert!(store.get(&moved).is_none());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn cascade_ids_for_ungrouped_is_self() {
        let mut store = AppointmentStore::new();
        let id = store.insert(appt(at(9, 0), None, 0));
        assert_eq!(store.cascade_ids(&id), Some(vec![id]));
        assert_eq!(store.cascade_ids(&Ulid::new()), None);
    }

    #[test]
    fn apply_reschedule_keeps_order() {
        let customers = DashMap::new();
        let mut store = AppointmentStore::new();
        let moved = store.insert(appt(at(9, 0), None, 0));
        store.insert(appt(at(10, 0), None, 0));

        store.apply_event(
            &Event::AppointmentRescheduled {
                id: moved,
                start: at(11, 0),
                duration_minutes: 45,
            },
            &customers,
        );
        let last = store.list_all().last().unwrap();
        assert_eq!(last.id, moved);
        assert_eq!(last.start, at(11, 0));
        assert_eq!(last.duration_minutes, 45);
    }

    #[test]
    fn apply_customer_delete_cascades() {
        let customers = DashMap::new();
        let mut store = AppointmentStore::new();
        let cid = Ulid::new();
        store.apply_event(
            &Event::CustomerCreated {
                id: cid,
                name: "Ana".into(),
                phone: "555".into(),
            },
            &customers,
        );
        let mut mine = appt(at(9, 0), None, 0);
        mine.customer_id = cid;
        store.insert(mine);
        store.insert(appt(at(10, 0), None, 0));

        let ids = store.ids_for_customer(&cid);
        assert_eq!(ids.len(), 1);
        store.apply_event(
            &Event::CustomerDeleted {
                id: cid,
                appointment_ids: ids,
            },
            &customers,
        );
        assert!(customers.get(&cid).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.ids_for_customer(&cid).is_empty());
    }
}
