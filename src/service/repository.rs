use super::{SYSTEM_SERVICE_ID, Service};
use crate::collectors::Exporter;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::sync::Mutex;

/// Concurrency-safe store of monitored services keyed by service id.
///
/// Every accessor copies what it needs out of the map before the lock is released,
/// so callers never hold the lock across a network round-trip. Lock poisoning is
/// recovered from: one panicking writer must not stop discovery or scraping.
#[derive(Default)]
pub struct Repository {
    services: RwLock<HashMap<String, Service>>,
}

impl Repository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Service>> {
        match self.services.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("service repository read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Service>> {
        match self.services.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("service repository write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Insert or replace a service. A collector already attached to an entry with
    /// the same id survives the replacement.
    pub fn add(&self, mut service: Service) {
        let mut guard = self.write();
        if service.collector.is_none()
            && let Some(existing) = guard.get(service.service_id())
        {
            service.collector.clone_from(&existing.collector);
        }
        guard.insert(service.service_id().to_string(), service);
    }

    /// Insert only when no service with the same id exists. Returns whether it was
    /// inserted.
    pub fn add_if_absent(&self, service: Service) -> bool {
        let mut guard = self.write();
        if guard.contains_key(service.service_id()) {
            return false;
        }
        guard.insert(service.service_id().to_string(), service);
        true
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Service> {
        self.read().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Remove a service. The system pseudo-service is never removed.
    pub fn remove(&self, id: &str) -> Option<Service> {
        if id == SYSTEM_SERVICE_ID {
            return None;
        }
        self.write().remove(id)
    }

    /// Service ids in sorted order.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copies of all services, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.read().values().cloned().collect();
        services.sort_by(|a, b| a.service_id().cmp(b.service_id()));
        services
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Pids services were discovered from.
    #[must_use]
    pub fn known_pids(&self) -> Vec<u32> {
        self.read().values().filter_map(|s| s.pid).collect()
    }

    /// Increment the failure counter, returning the new value.
    pub fn mark_failed(&self, id: &str) -> Option<u32> {
        self.write().get_mut(id).map(|s| {
            s.total_errors = s.total_errors.saturating_add(1);
            s.total_errors
        })
    }

    pub fn mark_healthy(&self, id: &str) {
        if let Some(s) = self.write().get_mut(id) {
            s.total_errors = 0;
        }
    }

    #[must_use]
    pub fn failure_count(&self, id: &str) -> Option<u32> {
        self.read().get(id).map(|s| s.total_errors)
    }

    /// Attach a collector unless one is already present. Returns whether it was
    /// attached.
    pub fn attach_collector(&self, id: &str, collector: Arc<Mutex<Exporter>>) -> bool {
        match self.write().get_mut(id) {
            Some(s) if s.collector.is_none() => {
                s.collector = Some(collector);
                true
            }
            _ => false,
        }
    }

    /// Record the pid a known service currently runs under.
    pub fn set_pid(&self, id: &str, pid: u32) {
        if let Some(s) = self.write().get_mut(id) {
            s.pid = Some(pid);
        }
    }

    /// Services that still need a collector.
    #[must_use]
    pub fn without_collector(&self) -> Vec<Service> {
        let mut pending: Vec<Service> = self
            .read()
            .values()
            .filter(|s| s.collector.is_none())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.service_id().cmp(b.service_id()));
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceType;

    fn pg(port: u16) -> Service {
        Service::new(
            format!("postgres:{port}"),
            ServiceType::Postgresql,
            format!("host=127.0.0.1 port={port}"),
        )
    }

    #[test]
    fn test_add_get_remove() {
        let repo = Repository::new();
        repo.add(pg(5432));
        repo.add(pg(5433));
        assert_eq!(repo.count(), 2);
        assert_eq!(repo.list_ids(), vec!["postgres:5432", "postgres:5433"]);
        assert_eq!(
            repo.get("postgres:5432").map(|s| s.conninfo),
            Some("host=127.0.0.1 port=5432".to_string())
        );
        assert!(repo.remove("postgres:5432").is_some());
        assert!(repo.get("postgres:5432").is_none());
        assert_eq!(repo.count(), 1);
    }

    #[test]
    fn test_add_same_id_last_write_wins() {
        let repo = Repository::new();
        repo.add(pg(5432));
        let mut replacement = pg(5432);
        replacement.conninfo = "host=/tmp port=5432".to_string();
        repo.add(replacement);
        assert_eq!(repo.count(), 1);
        assert_eq!(
            repo.get("postgres:5432").map(|s| s.conninfo),
            Some("host=/tmp port=5432".to_string())
        );
        assert!(!repo.add_if_absent(pg(5432)));
    }

    #[test]
    fn test_system_service_is_never_removed() {
        let repo = Repository::new();
        repo.add(Service::system());
        assert!(repo.remove(SYSTEM_SERVICE_ID).is_none());
        assert!(repo.contains(SYSTEM_SERVICE_ID));
    }

    #[test]
    fn test_failure_accounting() {
        let repo = Repository::new();
        repo.add(pg(5432));
        assert_eq!(repo.mark_failed("postgres:5432"), Some(1));
        assert_eq!(repo.mark_failed("postgres:5432"), Some(2));
        assert_eq!(repo.failure_count("postgres:5432"), Some(2));
        repo.mark_healthy("postgres:5432");
        assert_eq!(repo.failure_count("postgres:5432"), Some(0));
        assert_eq!(repo.mark_failed("missing:0"), None);
    }

    #[test]
    fn test_attach_collector_once() {
        let repo = Repository::new();
        repo.add(Service::system());
        let first = Arc::new(Mutex::new(Exporter::new(&Service::system(), "host", &[])));
        let second = Arc::new(Mutex::new(Exporter::new(&Service::system(), "host", &[])));
        assert!(repo.attach_collector(SYSTEM_SERVICE_ID, Arc::clone(&first)));
        assert!(!repo.attach_collector(SYSTEM_SERVICE_ID, second));
        assert!(repo.without_collector().is_empty());

        let attached = repo.get(SYSTEM_SERVICE_ID).and_then(|s| s.collector);
        assert!(attached.is_some_and(|c| Arc::ptr_eq(&c, &first)));

        // Re-adding the same id keeps the collector.
        repo.add(Service::system());
        assert!(repo.get(SYSTEM_SERVICE_ID).is_some_and(|s| s.collector.is_some()));
    }

    #[test]
    fn test_count_matches_distinct_ids() {
        let repo = Repository::new();
        let ops: [(bool, u16); 8] = [
            (true, 1),
            (true, 2),
            (true, 1),
            (false, 3),
            (true, 3),
            (false, 1),
            (true, 4),
            (false, 4),
        ];
        let mut model = std::collections::HashSet::new();
        for (add, port) in ops {
            if add {
                repo.add(pg(port));
                model.insert(port);
            } else {
                repo.remove(&format!("postgres:{port}"));
                model.remove(&port);
            }
            assert_eq!(repo.count(), model.len());
        }
    }
}
