//! Background discovery: scan processes, register services, attach collectors and
//! evict services that stopped answering.

use super::{
    Repository, Service, ServiceType, patroni, pgbouncer, postgres,
    probe::Prober,
    process::{self, ProcessInfo, ProcessSource},
};
use crate::collectors::{Exporter, FAILURE_THRESHOLD};
use anyhow::Result;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, info, instrument, warn};

/// Pause between discovery cycles.
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Scan the process list. Without it only configured services are managed.
    pub autodiscovery: bool,
    pub postgres_defaults: BTreeMap<String, String>,
    pub pgbouncer_defaults: BTreeMap<String, String>,
    /// Value of the `host` label on every collector.
    pub host: String,
    pub disabled_collectors: Vec<String>,
    /// Services given on the command line, registered once before the first scan.
    pub services: Vec<Service>,
    pub interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            autodiscovery: true,
            postgres_defaults: BTreeMap::new(),
            pgbouncer_defaults: BTreeMap::new(),
            host: crate::collectors::hostname(),
            disabled_collectors: Vec::new(),
            services: Vec::new(),
            interval: DISCOVERY_INTERVAL,
        }
    }
}

pub struct Discovery {
    repository: Arc<Repository>,
    processes: Box<dyn ProcessSource>,
    prober: Arc<dyn Prober>,
    config: DiscoveryConfig,
}

impl Discovery {
    #[must_use]
    pub fn new(
        repository: Arc<Repository>,
        processes: Box<dyn ProcessSource>,
        prober: Arc<dyn Prober>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            repository,
            processes,
            prober,
            config,
        }
    }

    /// Route a process to its resolver. `None` means the process is not a service
    /// entry point.
    async fn resolve(
        &self,
        process: &ProcessInfo,
        names: &HashMap<u32, &str>,
    ) -> Option<Result<Service>> {
        let prober = self.prober.as_ref();

        if postgres::is_postgres_process(&process.name) {
            // Backends and auxiliary processes are children of the postmaster.
            let parent_is_postgres = process
                .ppid
                .and_then(|ppid| names.get(&ppid))
                .is_some_and(|name| postgres::is_postgres_process(name));
            if parent_is_postgres {
                return None;
            }
            return Some(postgres::discover(process, &self.config.postgres_defaults, prober).await);
        }

        if pgbouncer::is_pgbouncer_process(&process.name) {
            return Some(
                pgbouncer::discover(process, &self.config.pgbouncer_defaults, prober).await,
            );
        }

        if patroni::is_patroni_process(process) {
            return Some(patroni::discover(process, prober).await);
        }

        None
    }

    /// One scan of the process list. Returns the number of services added.
    #[instrument(skip_all, level = "info")]
    pub async fn lookup(&mut self) -> usize {
        let list = self.processes.processes();
        let names = process::names_by_pid(&list);
        let known: HashSet<u32> = self.repository.known_pids().into_iter().collect();

        let mut added = 0;
        for process in list.iter().filter(|p| !known.contains(&p.pid)) {
            match self.resolve(process, &names).await {
                None => {}
                Some(Ok(service)) => {
                    let id = service.service_id().to_string();
                    if self.repository.add_if_absent(service) {
                        info!(service_id = %id, pid = process.pid, "service discovered");
                        added += 1;
                    } else {
                        self.repository.set_pid(&id, process.pid);
                    }
                }
                Some(Err(e)) => {
                    debug!(pid = process.pid, name = %process.name, error = %format!("{e:#}"), "process skipped");
                }
            }
        }
        added
    }

    /// Attach a collector to every service that has none. Returns how many were
    /// attached.
    pub fn setup_collectors(&self) -> usize {
        let mut attached = 0;
        for service in self.repository.without_collector() {
            let exporter = Exporter::new(&service, &self.config.host, &self.config.disabled_collectors);
            if self
                .repository
                .attach_collector(service.service_id(), Arc::new(Mutex::new(exporter)))
            {
                info!(service_id = service.service_id(), "collector attached");
                attached += 1;
            }
        }
        attached
    }

    /// Probe every remote service. A service failing [`FAILURE_THRESHOLD`] checks
    /// in a row is removed; the ids of removed services are returned.
    #[instrument(skip_all, level = "info")]
    pub async fn healthcheck(&self) -> Vec<String> {
        let mut evicted = Vec::new();

        for service in self.repository.list() {
            let id = service.service_id();
            let result = match service.service_type {
                ServiceType::System => continue,
                ServiceType::Patroni => self.prober.probe_http(&service.conninfo).await,
                sql => self.prober.probe_sql(sql, &service.conninfo).await,
            };

            match result {
                Ok(()) => self.repository.mark_healthy(id),
                Err(e) => match self.repository.mark_failed(id) {
                    Some(failures) if failures >= FAILURE_THRESHOLD => {
                        warn!(service_id = id, failures, error = %format!("{e:#}"), "service unreachable, removing");
                        self.repository.remove(id);
                        evicted.push(id.to_string());
                    }
                    Some(failures) => {
                        warn!(service_id = id, failures, error = %format!("{e:#}"), "health check failed");
                    }
                    None => {}
                },
            }
        }
        evicted
    }

    /// Register the configured services. Returns how many were new.
    pub fn register_static(&self) -> usize {
        let mut added = 0;
        for service in &self.config.services {
            if self.repository.add_if_absent(service.clone()) {
                info!(service_id = service.service_id(), "configured service registered");
                added += 1;
            }
        }
        added
    }

    /// Scan (when enabled), attach collectors, then health-check.
    pub async fn cycle(&mut self) {
        self.repository.add_if_absent(Service::system());
        if self.config.autodiscovery {
            self.lookup().await;
        }
        self.setup_collectors();
        self.healthcheck().await;
        debug!(services = self.repository.count(), "discovery cycle finished");
    }

    /// Run until `shutdown` turns true or its sender goes away. `ready` fires after
    /// the first cycle.
    pub async fn run(mut self, ready: oneshot::Sender<()>, mut shutdown: watch::Receiver<bool>) {
        info!(
            autodiscovery = self.config.autodiscovery,
            interval_secs = self.config.interval.as_secs(),
            "service discovery started"
        );

        self.register_static();
        if !*shutdown.borrow() {
            self.cycle().await;
        }
        if ready.send(()).is_err() {
            debug!("nobody waits for discovery readiness");
        }

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => self.cycle().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("service discovery stopped");
    }
}
