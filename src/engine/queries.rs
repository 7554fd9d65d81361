use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

use super::availability::{is_available, list_available};
use super::conflict::validate_start;
use super::{Engine, EngineError};

impl Engine {
    pub fn get_customer(&self, id: &Ulid) -> Option<Customer> {
        self.customers.get(id).map(|e| e.value().clone())
    }

    /// All customers in creation order.
    pub fn list_customers(&self) -> Vec<Customer> {
        let mut customers: Vec<Customer> =
            self.customers.iter().map(|e| e.value().clone()).collect();
        customers.sort_by_key(|c| c.id);
        customers
    }

    /// Every committed appointment ordered by start.
    pub async fn list_appointments(&self) -> Vec<Appointment> {
        self.store.read().await.list_all().to_vec()
    }

    pub async fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.store.read().await.get(id).cloned()
    }

    /// Rows sharing `group_id`, in block order.
    pub async fn group_members(&self, group_id: &Ulid) -> Vec<Appointment> {
        self.store
            .read()
            .await
            .group_members(group_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// The catalog in code order.
    pub fn list_services(&self) -> Vec<Service> {
        self.catalog().all().values().cloned().collect()
    }

    pub async fn check_availability(
        &self,
        service_code: &str,
        start: NaiveDateTime,
    ) -> Result<bool, EngineError> {
        let service = self
            .catalog()
            .get(service_code)
            .ok_or_else(|| EngineError::UnknownService(service_code.to_string()))?;
        validate_start(start)?;
        let store = self.store.read().await;
        Ok(is_available(service, start, store.list_all()))
    }

    /// Every service that can start at `start`, judged against one snapshot.
    pub async fn available_services(
        &self,
        start: NaiveDateTime,
    ) -> Result<BTreeMap<String, Service>, EngineError> {
        validate_start(start)?;
        let store = self.store.read().await;
        Ok(list_available(self.catalog(), start, store.list_all()))
    }
}
