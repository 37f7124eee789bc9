use anyhow::{Result, anyhow};
use pgscv::{
    collectors::{Exporter, metrics::MetricSet},
    service::{
        Service, ServiceType,
        probe::{NetworkProber, Prober},
    },
};
use std::time::Duration;
use tokio::{io::AsyncReadExt, net::TcpListener, sync::oneshot};

mod common;

/// Key/value parameters of the first startup packet a client sends to a server
/// that hangs up right after reading it.
async fn startup_parameters(service_type: ServiceType) -> Result<Vec<String>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let Ok(len) = socket.read_u32().await else {
            return;
        };
        let mut body = vec![0u8; usize::try_from(len).unwrap_or(4).saturating_sub(4)];
        if socket.read_exact(&mut body).await.is_ok() {
            let _ = tx.send(body);
        }
    });

    let conninfo = format!("host=127.0.0.1 port={port} user=pgscv dbname=pgbouncer sslmode=disable");
    let prober = NetworkProber::new()?;
    // The server drops the connection, so the probe itself fails.
    assert!(prober.probe_sql(service_type, &conninfo).await.is_err());

    let body = tokio::time::timeout(Duration::from_secs(5), rx).await??;
    // Protocol version first, then NUL separated pairs.
    let params = body
        .get(4..)
        .ok_or_else(|| anyhow!("short startup packet"))?
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();
    Ok(params)
}

#[tokio::test]
async fn test_pgbouncer_startup_packet_has_no_extra_float_digits() -> Result<()> {
    let params = startup_parameters(ServiceType::Pgbouncer).await?;

    assert!(params.windows(2).any(|w| w == ["user", "pgscv"]));
    assert!(params.windows(2).any(|w| w == ["database", "pgbouncer"]));
    assert!(!params.iter().any(|p| p == "extra_float_digits"));
    Ok(())
}

#[tokio::test]
async fn test_postgres_startup_packet_keeps_extra_float_digits() -> Result<()> {
    let params = startup_parameters(ServiceType::Postgresql).await?;
    assert!(params.iter().any(|p| p == "extra_float_digits"));
    Ok(())
}

#[tokio::test]
async fn test_pgbouncer_admin_console_probe_and_collect() -> Result<()> {
    let Some(dsn) = common::reachable_pgbouncer_conninfo().await else {
        return Ok(());
    };

    NetworkProber::new()?
        .probe_sql(ServiceType::Pgbouncer, &dsn)
        .await?;

    let service = Service::new("pgbouncer:test", ServiceType::Pgbouncer, dsn);
    let mut exporter = Exporter::new(&service, "test", &[]);
    let mut set = MetricSet::new();

    let emitted = exporter.collect(&service, &mut set).await;
    assert!(emitted > 0);
    assert_eq!(exporter.total_failures(), 0);

    let families = set.family_names();
    assert!(families.iter().all(|name| name.starts_with("pgbouncer_")));
    // The admin console always lists its own pseudo database.
    assert!(families.iter().any(|name| name == "pgbouncer_pool_cl_active"));
    assert!(families.iter().any(|name| name.starts_with("pgbouncer_stats_")));
    Ok(())
}
