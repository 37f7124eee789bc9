//! Connectivity probes used by discovery and the background health check.

use super::{ServiceType, conninfo};
use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use sqlx::{Connection, Executor, PgConnection, postgres::PgConnectOptions};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

/// Bound for a discovery or health-check SQL connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound for a Patroni REST request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(1);

pub trait Prober: Send + Sync {
    /// Open a connection with `conninfo` and run a trivial round-trip.
    fn probe_sql<'a>(
        &'a self,
        service_type: ServiceType,
        conninfo: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// `GET <base_url>/health` must answer 200.
    fn probe_http<'a>(&'a self, base_url: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Cheapest statement each SQL service answers; Pgbouncer's admin console only
/// understands its own commands over the simple query protocol.
#[must_use]
pub const fn ping_query(service_type: ServiceType) -> &'static str {
    match service_type {
        ServiceType::Pgbouncer => "SHOW VERSION",
        _ => "SELECT 1",
    }
}

/// Open a Postgres/Pgbouncer connection within [`CONNECT_TIMEOUT`].
///
/// # Errors
///
/// Returns an error when the connection string is invalid, the server refuses the
/// connection or the attempt times out.
pub async fn connect(service_type: ServiceType, conninfo: &str) -> Result<PgConnection> {
    connect_with(&conninfo::to_connect_options(service_type, conninfo)?).await
}

/// Same as [`connect`] for already parsed options.
///
/// # Errors
///
/// Returns an error when the server refuses the connection or the attempt times out.
pub async fn connect_with(opts: &PgConnectOptions) -> Result<PgConnection> {
    let span = info_span!(
        "db.connect",
        db.system = "postgresql",
        db.name = opts.get_database().unwrap_or_default(),
        otel.kind = "client"
    );
    match timeout(CONNECT_TIMEOUT, PgConnection::connect_with(opts).instrument(span)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(e).context("failed to connect"),
        Err(_) => Err(anyhow!(
            "failed to connect: timed out after {}s",
            CONNECT_TIMEOUT.as_secs()
        )),
    }
}

/// Client for Patroni REST calls; certificates of the local node are not verified.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .context("failed to build HTTP client")
}

/// Real network probes.
#[derive(Clone)]
pub struct NetworkProber {
    client: reqwest::Client,
}

impl NetworkProber {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }
}

impl Prober for NetworkProber {
    #[instrument(skip_all, level = "debug", err, fields(service_type = %service_type))]
    fn probe_sql<'a>(
        &'a self,
        service_type: ServiceType,
        conninfo: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut conn = connect(service_type, conninfo).await?;
            Executor::execute(&mut conn, sqlx::raw_sql(ping_query(service_type)))
                .await
                .context("ping query failed")?;
            if let Err(e) = conn.close().await {
                debug!(error = %e, "failed to close probe connection");
            }
            Ok(())
        })
    }

    #[instrument(skip_all, level = "debug", err)]
    fn probe_http<'a>(&'a self, base_url: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = url::Url::parse(base_url)
                .and_then(|u| u.join("health"))
                .with_context(|| format!("invalid base URL '{base_url}'"))?;

            let response = self
                .client
                .get(url)
                .send()
                .await
                .context("health request failed")?;

            if response.status() == reqwest::StatusCode::OK {
                Ok(())
            } else {
                Err(anyhow!("health endpoint answered {}", response.status()))
            }
        })
    }
}
