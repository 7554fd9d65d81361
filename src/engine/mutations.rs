use chrono::NaiveDateTime;
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_duration, validate_start};
use super::projection::project;
use super::{Engine, EngineError, WalCommand};

/// Appointments per `AppointmentsCommitted` record in a compacted WAL.
const COMPACT_CHUNK: usize = 1024;

fn validate_customer_fields(name: &str, phone: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("customer name is required".into()));
    }
    if phone.trim().is_empty() {
        return Err(EngineError::Validation("customer phone is required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("customer phone too long"));
    }
    Ok(())
}

impl Engine {
    // ── Customers ────────────────────────────────────────────

    pub async fn create_customer(
        &self,
        id: Ulid,
        name: String,
        phone: String,
    ) -> Result<(), EngineError> {
        validate_customer_fields(&name, &phone)?;
        let mut store = self.store.write().await;
        if self.customers.len() >= MAX_CUSTOMERS {
            return Err(EngineError::LimitExceeded("too many customers"));
        }
        if self.customers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::CustomerCreated { id, name, phone };
        self.persist_and_apply(&mut store, &event).await
    }

    /// Partial update: `None` keeps the current value.
    pub async fn update_customer(
        &self,
        id: Ulid,
        name: Option<String>,
        phone: Option<String>,
    ) -> Result<Customer, EngineError> {
        let mut store = self.store.write().await;
        let current = self
            .get_customer(&id)
            .ok_or(EngineError::NotFound(id))?;
        let name = name.unwrap_or(current.name);
        let phone = phone.unwrap_or(current.phone);
        validate_customer_fields(&name, &phone)?;

        let event = Event::CustomerUpdated { id, name: name.clone(), phone: phone.clone() };
        self.persist_and_apply(&mut store, &event).await?;
        Ok(Customer { id, name, phone })
    }

    /// Delete a customer and every appointment referencing it, in one record.
    /// Returns the ids of the removed appointments.
    pub async fn delete_customer(&self, id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let mut store = self.store.write().await;
        if !self.customers.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let appointment_ids = store.ids_for_customer(&id);

        let event = Event::CustomerDeleted { id, appointment_ids: appointment_ids.clone() };
        self.persist_and_apply(&mut store, &event).await?;
        info!("deleted customer {id} and {} appointments", appointment_ids.len());
        Ok(appointment_ids)
    }

    // ── Appointments ─────────────────────────────────────────

    /// Book `service_code` for a customer starting at `start`.
    ///
    /// One row per billable block, all written as a single WAL record. A
    /// multi-block service shares a fresh group id across its rows; a
    /// single-block service gets none. Pauses are projected but never stored.
    pub async fn materialize(
        &self,
        customer_id: Ulid,
        service_code: &str,
        start: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        validate_start(start)?;
        let service = self
            .catalog()
            .get(service_code)
            .ok_or_else(|| EngineError::UnknownService(service_code.to_string()))?;

        let mut store = self.store.write().await;
        if !self.customers.contains_key(&customer_id) {
            return Err(EngineError::NotFound(customer_id));
        }

        let projected = project(service, start);
        if let Err(e) = check_no_conflict(&projected, store.list_all(), None) {
            debug!("rejected {service_code} at {start} for {customer_id}: {e}");
            return Err(e);
        }

        let billable: Vec<&ProjectedInterval> =
            projected.iter().filter(|p| p.is_billable()).collect();
        if billable.is_empty() {
            return Ok(Booking { group_id: None, appointments: Vec::new() });
        }
        if store.len() + billable.len() > MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        let group_id = service.is_grouped().then(Ulid::new);
        let appointments: Vec<Appointment> = billable
            .into_iter()
            .map(|p| Appointment {
                id: Ulid::new(),
                customer_id,
                start: p.span.start,
                duration_minutes: service.blocks[p.block_index as usize].duration_minutes,
                group_id,
                service_code: Some(service.code.clone()),
                block_index: p.block_index,
            })
            .collect();

        let event = Event::AppointmentsCommitted { appointments: appointments.clone() };
        self.persist_and_apply(&mut store, &event).await?;

        metrics::counter!(crate::observability::APPOINTMENTS_COMMITTED_TOTAL)
            .increment(appointments.len() as u64);
        info!(
            "booked {service_code} at {start} for {customer_id}: {} rows, group {:?}",
            appointments.len(),
            group_id
        );
        Ok(Booking { group_id, appointments })
    }

    /// Book a bare duration without a service: one ungrouped row.
    pub async fn book_direct(
        &self,
        customer_id: Ulid,
        start: NaiveDateTime,
        duration_minutes: Minutes,
    ) -> Result<Appointment, EngineError> {
        validate_start(start)?;
        validate_duration(duration_minutes)?;

        let mut store = self.store.write().await;
        if !self.customers.contains_key(&customer_id) {
            return Err(EngineError::NotFound(customer_id));
        }
        if store.len() >= MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }
        let candidate = direct_interval(start, duration_minutes);
        check_no_conflict(&[candidate], store.list_all(), None)?;

        let appointment = Appointment {
            id: Ulid::new(),
            customer_id,
            start,
            duration_minutes,
            group_id: None,
            service_code: None,
            block_index: 0,
        };
        let event = Event::AppointmentsCommitted { appointments: vec![appointment.clone()] };
        self.persist_and_apply(&mut store, &event).await?;
        metrics::counter!(crate::observability::APPOINTMENTS_COMMITTED_TOTAL).increment(1);
        Ok(appointment)
    }

    /// Move an ungrouped appointment and/or change its length.
    ///
    /// Grouped rows are refused: their blocks must keep the catalog's relative
    /// timing, so a group is deleted and booked again instead.
    pub async fn reschedule(
        &self,
        id: Ulid,
        start: NaiveDateTime,
        duration_minutes: Minutes,
    ) -> Result<Appointment, EngineError> {
        validate_start(start)?;
        validate_duration(duration_minutes)?;

        let mut store = self.store.write().await;
        let current = store.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if let Some(gid) = current.group_id {
            return Err(EngineError::Validation(format!(
                "appointment {id} belongs to group {gid}; delete and book again to move it"
            )));
        }
        let candidate = direct_interval(start, duration_minutes);
        check_no_conflict(&[candidate], store.list_all(), Some(id))?;

        let event = Event::AppointmentRescheduled { id, start, duration_minutes };
        self.persist_and_apply(&mut store, &event).await?;
        Ok(Appointment { start, duration_minutes, ..current })
    }

    /// Delete an appointment; a grouped one takes its whole group with it.
    /// Returns the removed ids.
    pub async fn delete_group(&self, appointment_id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let mut store = self.store.write().await;
        let ids = store
            .cascade_ids(&appointment_id)
            .ok_or(EngineError::NotFound(appointment_id))?;

        let event = Event::AppointmentsRemoved { ids: ids.clone() };
        self.persist_and_apply(&mut store, &event).await?;
        info!("deleted appointment {appointment_id} ({} rows)", ids.len());
        Ok(ids)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Holds the store lock shared until the swap completes, so no write can
    /// land between the snapshot and the new file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let store = self.store.read().await;

        let mut customers: Vec<Customer> =
            self.customers.iter().map(|e| e.value().clone()).collect();
        customers.sort_by_key(|c| c.id);
        let mut events: Vec<Event> = customers
            .into_iter()
            .map(|c| Event::CustomerCreated { id: c.id, name: c.name, phone: c.phone })
            .collect();
        for chunk in store.list_all().chunks(COMPACT_CHUNK) {
            events.push(Event::AppointmentsCommitted { appointments: chunk.to_vec() });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()));
        drop(store);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn direct_interval(start: NaiveDateTime, duration_minutes: Minutes) -> ProjectedInterval {
    ProjectedInterval {
        span: Span::starting_at(start, duration_minutes),
        kind: BlockKind::Service,
        block_index: 0,
    }
}
