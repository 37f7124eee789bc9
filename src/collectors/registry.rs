use super::{Exporter, FAILURE_THRESHOLD, metrics::MetricSet};
use crate::service::{Repository, SYSTEM_SERVICE_ID, Service};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Drives every attached collector for a scrape or a push round.
///
/// Collectors live on the services in the [`Repository`]; the registry only looks
/// them up, so services added or evicted by discovery take effect on the next
/// round.
#[derive(Clone)]
pub struct CollectorRegistry {
    repository: Arc<Repository>,
}

impl CollectorRegistry {
    #[must_use]
    pub const fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Collect all services into one set, for the pull endpoint.
    pub async fn collect_all(&self) -> MetricSet {
        let mut set = MetricSet::new();
        for service in self.repository.list() {
            if let Some(collector) = service.collector.clone() {
                self.collect_one(&service, &collector, &mut set).await;
            }
        }
        debug!(samples = set.samples(), "scrape collected");
        set
    }

    /// Collect each service into its own set, for the push loop.
    pub async fn collect_per_service(&self) -> Vec<(String, MetricSet)> {
        let mut sets = Vec::new();
        for service in self.repository.list() {
            if let Some(collector) = service.collector.clone() {
                let mut set = MetricSet::new();
                self.collect_one(&service, &collector, &mut set).await;
                sets.push((service.service_id().to_string(), set));
            }
        }
        sets
    }

    async fn collect_one(&self, service: &Service, collector: &Arc<Mutex<Exporter>>, set: &mut MetricSet) -> usize {
        let mut exporter = collector.lock().await;
        let emitted = exporter.collect(service, set).await;
        let failures = exporter.total_failures();
        drop(exporter);

        if failures >= FAILURE_THRESHOLD && service.service_id() != SYSTEM_SERVICE_ID {
            warn!(
                service_id = service.service_id(),
                failures,
                "collector failed too many times, removing service"
            );
            self.repository.remove(service.service_id());
        } else if failures > 0 {
            info!(service_id = service.service_id(), failures, "collector failed");
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceType;

    fn attach(repo: &Repository, service: &Service) {
        let exporter = Exporter::new(service, "db1", &[]);
        repo.add(service.clone());
        repo.attach_collector(service.service_id(), Arc::new(Mutex::new(exporter)));
    }

    #[tokio::test]
    async fn test_failing_collector_is_deregistered_at_threshold() {
        let repo = Arc::new(Repository::new());
        let dead = Service::new(
            "postgres:1",
            ServiceType::Postgresql,
            "host=127.0.0.1 port=1 user=postgres dbname=postgres",
        );
        attach(&repo, &dead);
        let registry = CollectorRegistry::new(Arc::clone(&repo));

        for _ in 0..FAILURE_THRESHOLD - 1 {
            registry.collect_all().await;
            assert!(repo.contains("postgres:1"));
        }
        registry.collect_all().await;
        assert!(!repo.contains("postgres:1"));
    }

    #[tokio::test]
    async fn test_services_without_collector_are_skipped() {
        let repo = Arc::new(Repository::new());
        repo.add(Service::new("postgres:1", ServiceType::Postgresql, "host=127.0.0.1 port=1"));
        let registry = CollectorRegistry::new(Arc::clone(&repo));

        assert!(registry.collect_per_service().await.is_empty());
        assert_eq!(registry.collect_all().await.samples(), 0);
        assert!(repo.contains("postgres:1"));
    }

    #[tokio::test]
    async fn test_per_service_sets() {
        let repo = Arc::new(Repository::new());
        attach(&repo, &Service::system());
        let registry = CollectorRegistry::new(Arc::clone(&repo));

        let sets = registry.collect_per_service().await;
        assert_eq!(sets.len(), 1);
        assert_eq!(sets.first().map(|(id, _)| id.as_str()), Some(SYSTEM_SERVICE_ID));
    }
}
