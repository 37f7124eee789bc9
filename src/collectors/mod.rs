//! Collection engine: the stat catalog, the per-service [`Exporter`] and the
//! orchestrator that drives all of them for a scrape or a push.

use crate::service::{
    Service, ServiceType,
    conninfo::{self, POSTGRES_DEFAULT_DBNAME},
    probe,
};
use anyhow::{Context, Result, anyhow};
use catalog::{StatDescriptor, StatType, adjust_queries, global_catalog, help_for};
use metrics::{Emitter, MetricDesc, MetricSet};
use sqlx::{Connection, PgConnection};
use std::{collections::HashMap, time::Instant};
use tracing::{debug, instrument, warn};

pub mod catalog;
pub mod metrics;
pub mod mountpoint;
pub mod patroni;
pub mod registry;
pub mod schedule;
pub mod system;
pub mod walk;

pub use registry::CollectorRegistry;

/// Consecutive failed rounds after which a collector is dropped.
pub const FAILURE_THRESHOLD: u32 = 10;

const LIST_DATABASES: &str = "SELECT datname FROM pg_database \
    WHERE datallowconn AND NOT datistemplate AND has_database_privilege(datname, 'CONNECT') \
    ORDER BY datname";

/// Host name used for the `host` label.
#[must_use]
pub fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

/// Collector of one service. Owns its own copy of the catalog subset for the
/// service type, so schedules and version adjustments never leak between services.
pub struct Exporter {
    service_id: String,
    service_type: ServiceType,
    host: String,
    descriptors: Vec<StatDescriptor>,
    describe: HashMap<String, MetricDesc>,
    total_failures: u32,
    http: Option<reqwest::Client>,
}

impl Exporter {
    /// Build the collector for `service`. Descriptors named in `disabled` are left
    /// out.
    #[must_use]
    pub fn new(service: &Service, host: &str, disabled: &[String]) -> Self {
        let stat_type = StatType::from(service.service_type);
        let descriptors: Vec<StatDescriptor> = global_catalog()
            .into_iter()
            .filter(|d| d.stat_type == stat_type)
            .filter(|d| !disabled.iter().any(|name| name == d.name))
            .collect();

        let describe = descriptors
            .iter()
            .flat_map(|d| {
                d.metric_names().into_iter().map(move |metric| {
                    let desc = MetricDesc::new(&metric, &help_for(&metric), d.value_type, d.label_names);
                    (metric, desc)
                })
            })
            .collect();

        Self {
            service_id: service.service_id().to_string(),
            service_type: service.service_type,
            host: host.to_string(),
            descriptors,
            describe,
            total_failures: 0,
            http: None,
        }
    }

    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    #[must_use]
    pub const fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Full metric name → description, for every metric this collector can emit.
    #[must_use]
    pub const fn describe(&self) -> &HashMap<String, MetricDesc> {
        &self.describe
    }

    #[must_use]
    pub fn descriptors(&self) -> &[StatDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub const fn total_failures(&self) -> u32 {
        self.total_failures
    }

    /// Clear per-round state and activate gated descriptors whose interval elapsed.
    fn begin_round(&mut self, now: Instant) {
        for d in &mut self.descriptors {
            d.done = false;
            d.schedule.activate_if_expired(now);
        }
    }

    /// Stamp descriptors collected in this round and put gated ones back to sleep.
    fn end_round(&mut self, now: Instant) {
        for d in self.descriptors.iter_mut().filter(|d| d.done) {
            d.schedule.mark_fired(now);
            d.schedule.deactivate();
        }
    }

    /// Run one collection round for `service` into `set`. Returns the number of
    /// samples emitted; a round that cannot reach the service emits nothing and
    /// counts as a failure.
    #[instrument(skip_all, level = "info", fields(service_id = %self.service_id, otel.kind = "internal"))]
    pub async fn collect(&mut self, service: &Service, set: &mut MetricSet) -> usize {
        let started = Instant::now();
        self.begin_round(started);

        let Self {
            service_id,
            service_type,
            host,
            descriptors,
            describe,
            http,
            ..
        } = self;
        let mut emitter = Emitter::new(service_id, host, describe, set);

        let result = match service_type {
            ServiceType::System => Ok(system::collect(descriptors, &mut emitter)),
            ServiceType::Postgresql => {
                collect_postgres(&service.conninfo, descriptors, &mut emitter).await
            }
            ServiceType::Pgbouncer => {
                collect_pgbouncer(&service.conninfo, descriptors, &mut emitter).await
            }
            ServiceType::Patroni => {
                collect_patroni(http, &service.conninfo, descriptors, &mut emitter).await
            }
        };

        match result {
            Ok(emitted) => {
                self.total_failures = 0;
                self.end_round(Instant::now());
                debug!(
                    samples = emitted,
                    elapsed_ms = started.elapsed().as_millis(),
                    "collection round finished"
                );
                emitted
            }
            Err(e) => {
                self.total_failures = self.total_failures.saturating_add(1);
                warn!(
                    failures = self.total_failures,
                    error = %format!("{e:#}"),
                    "collection round failed"
                );
                0
            }
        }
    }
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "failed to close connection");
    }
}

/// `server_version_num` of the connected server.
///
/// # Errors
///
/// Returns an error if the setting cannot be read or is not a number.
pub async fn server_version(conn: &mut PgConnection) -> Result<i64> {
    let (_, rows) = walk::query_text(conn, "SHOW server_version_num")
        .await
        .context("failed to read server version")?;
    let raw = rows
        .first()
        .and_then(|row| row.first().cloned().flatten())
        .ok_or_else(|| anyhow!("empty server_version_num"))?;
    raw.trim()
        .parse::<i64>()
        .with_context(|| format!("invalid server_version_num '{raw}'"))
}

async fn list_databases(conn: &mut PgConnection) -> Result<Vec<String>> {
    let (_, rows) = walk::query_text(conn, LIST_DATABASES).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_iter().next().flatten())
        .collect())
}

async fn collect_postgres(
    conninfo: &str,
    descriptors: &mut [StatDescriptor],
    emitter: &mut Emitter<'_>,
) -> Result<usize> {
    let opts = conninfo::to_connect_options(ServiceType::Postgresql, conninfo)?;
    let mut conn = probe::connect_with(&opts).await?;
    let version = server_version(&mut conn).await?;
    adjust_queries(descriptors, version);

    let fallback = opts
        .get_database()
        .unwrap_or(POSTGRES_DEFAULT_DBNAME)
        .to_string();
    let databases = match list_databases(&mut conn).await {
        Ok(dbs) if !dbs.is_empty() => dbs,
        Ok(_) => vec![fallback],
        Err(e) => {
            debug!(error = %e, "failed to list databases, using the connection database");
            vec![fallback]
        }
    };
    close(conn).await;

    let mut emitted = 0;
    for database in databases {
        let db_opts = opts.clone().database(&database);
        match probe::connect_with(&db_opts).await {
            Ok(mut conn) => {
                emitted += walk::walk(&mut conn, descriptors, version, emitter).await;
                close(conn).await;
            }
            Err(e) => warn!(database = %database, error = %format!("{e:#}"), "skipping database"),
        }
    }
    Ok(emitted)
}

async fn collect_pgbouncer(
    conninfo: &str,
    descriptors: &mut [StatDescriptor],
    emitter: &mut Emitter<'_>,
) -> Result<usize> {
    let mut conn = probe::connect(ServiceType::Pgbouncer, conninfo).await?;
    let emitted = walk::walk(&mut conn, descriptors, 0, emitter).await;
    close(conn).await;
    Ok(emitted)
}

async fn collect_patroni(
    http: &mut Option<reqwest::Client>,
    base_url: &str,
    descriptors: &mut [StatDescriptor],
    emitter: &mut Emitter<'_>,
) -> Result<usize> {
    if http.is_none() {
        *http = Some(probe::http_client()?);
    }
    let client = http
        .as_ref()
        .ok_or_else(|| anyhow!("no HTTP client for patroni"))?;
    let status = patroni::fetch_status(client, base_url).await?;
    Ok(patroni::emit_status(descriptors, &status, emitter))
}
