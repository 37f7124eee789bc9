#![allow(dead_code)]

use pgscv::{
    config::Config,
    service::{ServiceType, conninfo, probe},
};
use std::{env, net::IpAddr};

/// Connection string of the test PostgreSQL.
///
/// Tests only ever run against a local server. PGSCV_TEST_DSN may override the
/// default but must still point at localhost or a unix socket.
pub fn get_test_conninfo() -> String {
    let dsn = env::var("PGSCV_TEST_DSN").unwrap_or_else(|_| {
        "host=127.0.0.1 port=5432 user=postgres password=postgres dbname=postgres".to_string()
    });

    let host = conninfo::get(&dsn, "host").unwrap_or_default();
    assert!(
        host.is_empty() || host.starts_with('/') || ["localhost", "127.0.0.1", "::1"].contains(&host.as_str()),
        "Refusing to run tests against remote database {}. Use localhost.",
        conninfo::redact(&dsn)
    );

    dsn
}

/// The test conninfo when a server answers, otherwise `None` so the caller can
/// skip.
pub async fn reachable_conninfo() -> Option<String> {
    let dsn = get_test_conninfo();
    match probe::connect(ServiceType::Postgresql, &dsn).await {
        Ok(conn) => {
            drop(conn);
            Some(dsn)
        }
        Err(e) => {
            eprintln!("skipping: no PostgreSQL at {} ({e:#})", conninfo::redact(&dsn));
            None
        }
    }
}

/// Admin console of a local Pgbouncer from PGSCV_TEST_PGBOUNCER_DSN, or `None`
/// when unset or unreachable.
pub async fn reachable_pgbouncer_conninfo() -> Option<String> {
    let Ok(dsn) = env::var("PGSCV_TEST_PGBOUNCER_DSN") else {
        eprintln!("skipping: PGSCV_TEST_PGBOUNCER_DSN is not set");
        return None;
    };

    let host = conninfo::get(&dsn, "host").unwrap_or_default();
    assert!(
        host.is_empty() || host.starts_with('/') || ["localhost", "127.0.0.1", "::1"].contains(&host.as_str()),
        "Refusing to run tests against remote pgbouncer {}. Use localhost.",
        conninfo::redact(&dsn)
    );

    match probe::connect(ServiceType::Pgbouncer, &dsn).await {
        Ok(conn) => {
            drop(conn);
            Some(dsn)
        }
        Err(e) => {
            eprintln!("skipping: no Pgbouncer at {} ({e:#})", conninfo::redact(&dsn));
            None
        }
    }
}

/// Find an available port for testing
pub fn get_available_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .unwrap_or(19890)
}

/// Wait for server to be ready on the given port
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    use tokio::time::{Duration, sleep};

    for _ in 0..max_attempts {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }

    eprintln!("Failed to connect to server on port {port} after {max_attempts} attempts");
    false
}

pub fn get_test_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Agent config for tests: loopback only, no process scan.
pub fn test_config(port: u16) -> Config {
    Config {
        listen_address: Some(IpAddr::from([127, 0, 0, 1])),
        port,
        autodiscovery: false,
        ..Config::default()
    }
}
