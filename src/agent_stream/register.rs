//! Id registers for applications, instances and service names
//!
//! Agents refer to everything by small integer ids once registered. Id `0`
//! is reserved for "not registered yet"; allocated ids start at 1 and are
//! stable for the lifetime of the register.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

/// Id returned when a registration is rejected
pub const UNREGISTERED: i32 = 0;

/// Allocates application ids from application codes
pub trait ApplicationIdService: Send + Sync {
    /// Id of `application_code`, allocating one on first sight
    fn get_or_create(&self, application_code: &str) -> i32;

    /// Reverse lookup
    fn application_code(&self, application_id: i32) -> Option<String>;
}

/// Allocates instance ids for agent processes of an application
pub trait InstanceIdService: Send + Sync {
    fn get_or_create(&self, application_id: i32, agent_uuid: &str, registered_at: i64) -> i32;

    /// Application the instance belongs to
    fn application_id(&self, instance_id: i32) -> Option<i32>;
}

/// Allocates service ids for (application, service name) pairs
pub trait ServiceNameService: Send + Sync {
    fn get_or_create(&self, application_id: i32, service_name: &str) -> i32;

    fn service_name(&self, service_id: i32) -> Option<(i32, String)>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub application_id: i32,
    pub agent_uuid: String,
    pub registered_at: i64,
}

#[derive(Default)]
struct Table<K> {
    ids: HashMap<K, i32>,
    entries: Vec<K>,
}

impl<K: Clone + Eq + std::hash::Hash> Table<K> {
    fn get_or_create(&mut self, key: K) -> (i32, bool) {
        if let Some(id) = self.ids.get(&key) {
            return (*id, false);
        }
        self.entries.push(key.clone());
        let id = i32::try_from(self.entries.len()).unwrap_or(i32::MAX);
        self.ids.insert(key, id);
        (id, true)
    }

    fn get(&self, id: i32) -> Option<&K> {
        usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| self.entries.get(index))
    }
}

#[derive(Default)]
struct Tables {
    applications: Table<String>,
    instances: Table<(i32, String)>,
    instance_registered_at: HashMap<i32, i64>,
    services: Table<(i32, String)>,
}

/// Process-local implementation of all three registers
#[derive(Default)]
pub struct InMemoryRegister {
    tables: Mutex<Tables>,
}

impl InMemoryRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full record of a registered instance
    pub fn instance(&self, instance_id: i32) -> Option<InstanceRecord> {
        let tables = self.lock();
        let (application_id, agent_uuid) = tables.instances.get(instance_id)?.clone();
        Some(InstanceRecord {
            application_id,
            agent_uuid,
            registered_at: tables
                .instance_registered_at
                .get(&instance_id)
                .copied()
                .unwrap_or_default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ApplicationIdService for InMemoryRegister {
    fn get_or_create(&self, application_code: &str) -> i32 {
        if application_code.is_empty() {
            return UNREGISTERED;
        }

        let (id, created) = self
            .lock()
            .applications
            .get_or_create(application_code.to_string());
        if created {
            debug!("registered application '{}' as {}", application_code, id);
        }
        id
    }

    fn application_code(&self, application_id: i32) -> Option<String> {
        self.lock().applications.get(application_id).cloned()
    }
}

impl InstanceIdService for InMemoryRegister {
    fn get_or_create(&self, application_id: i32, agent_uuid: &str, registered_at: i64) -> i32 {
        if application_id == UNREGISTERED || agent_uuid.is_empty() {
            return UNREGISTERED;
        }

        let mut tables = self.lock();
        if tables.applications.get(application_id).is_none() {
            trace!("instance of unknown application {}", application_id);
            return UNREGISTERED;
        }

        let (id, created) = tables
            .instances
            .get_or_create((application_id, agent_uuid.to_string()));
        if created {
            tables.instance_registered_at.insert(id, registered_at);
            debug!(
                "registered instance {} of application {} as {}",
                agent_uuid, application_id, id
            );
        }
        id
    }

    fn application_id(&self, instance_id: i32) -> Option<i32> {
        self.lock()
            .instances
            .get(instance_id)
            .map(|(application_id, _)| *application_id)
    }
}

impl ServiceNameService for InMemoryRegister {
    fn get_or_create(&self, application_id: i32, service_name: &str) -> i32 {
        if application_id == UNREGISTERED || service_name.is_empty() {
            return UNREGISTERED;
        }

        let (id, created) = self
            .lock()
            .services
            .get_or_create((application_id, service_name.to_string()));
        if created {
            trace!("registered service '{}' as {}", service_name, id);
        }
        id
    }

    fn service_name(&self, service_id: i32) -> Option<(i32, String)> {
        self.lock().services.get(service_id).cloned()
    }
}
