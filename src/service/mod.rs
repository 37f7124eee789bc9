//! Monitored services: identity, discovery resolvers and the shared repository.

use crate::collectors::Exporter;
use std::{fmt, net::IpAddr, path::PathBuf, sync::Arc};
use tokio::sync::Mutex;

pub mod conninfo;
pub mod discovery;
pub mod patroni;
pub mod pgbouncer;
pub mod postgres;
pub mod probe;
pub mod process;
pub mod repository;

pub use repository::Repository;

/// Identifier of the always-present host pseudo-service.
pub const SYSTEM_SERVICE_ID: &str = "system:0";

/// Kind of a monitored service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceType {
    System,
    Postgresql,
    Pgbouncer,
    Patroni,
}

impl ServiceType {
    /// Prefix used in service identifiers, e.g. `postgres` in `postgres:5432`.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Postgresql => "postgres",
            Self::Pgbouncer => "pgbouncer",
            Self::Patroni => "patroni",
        }
    }

    /// Inverse of [`ServiceType::id_prefix`]; also accepts `postgresql`.
    #[must_use]
    pub fn from_id_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "system" => Some(Self::System),
            "postgres" | "postgresql" => Some(Self::Postgresql),
            "pgbouncer" => Some(Self::Pgbouncer),
            "patroni" => Some(Self::Patroni),
            _ => None,
        }
    }

    /// Services reached over the network and therefore health-checked.
    #[must_use]
    pub const fn is_remote(self) -> bool {
        !matches!(self, Self::System)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id_prefix())
    }
}

/// Build a service identifier in the `<type>:<port>` form.
#[must_use]
pub fn service_id(service_type: ServiceType, port: u16) -> String {
    format!("{}:{port}", service_type.id_prefix())
}

/// One monitored target.
#[derive(Clone)]
pub struct Service {
    service_id: String,
    pub service_type: ServiceType,
    /// libpq `key=value` string for SQL services, base URL for Patroni.
    pub conninfo: String,
    pub total_errors: u32,
    pub pid: Option<u32>,
    pub collector: Option<Arc<Mutex<Exporter>>>,
}

impl Service {
    #[must_use]
    pub fn new(service_id: impl Into<String>, service_type: ServiceType, conninfo: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            service_type,
            conninfo: conninfo.into(),
            total_errors: 0,
            pid: None,
            collector: None,
        }
    }

    /// The host pseudo-service, collected without any network connection.
    #[must_use]
    pub fn system() -> Self {
        Self::new(SYSTEM_SERVICE_ID, ServiceType::System, "")
    }

    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("service_id", &self.service_id)
            .field("service_type", &self.service_type)
            .field("conninfo", &conninfo::redact(&self.conninfo))
            .field("total_errors", &self.total_errors)
            .field("pid", &self.pid)
            .field("collector", &self.collector.is_some())
            .finish()
    }
}

/// Connection settings reconstructed from discovery artifacts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
    pub pid: u32,
    pub data_directory: PathBuf,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub unix_socket_dir: String,
    pub listen_addr: String,
    pub listen_port: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            pid: 0,
            data_directory: PathBuf::new(),
            start_time: None,
            unix_socket_dir: String::new(),
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 0,
        }
    }
}

/// Map wildcard listen addresses to the matching loopback address.
#[must_use]
pub fn normalize_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    match addr {
        "" | "*" | "0.0.0.0" => "127.0.0.1".to_string(),
        "::" | "[::]" => "::1".to_string(),
        other => other.to_string(),
    }
}

/// Wrap IPv6 literals in brackets so they can be joined with a port.
#[must_use]
pub fn bracket_host(host: &str) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{host}]"),
        _ => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_format() {
        assert_eq!(service_id(ServiceType::Postgresql, 5432), "postgres:5432");
        assert_eq!(service_id(ServiceType::Pgbouncer, 6432), "pgbouncer:6432");
        assert_eq!(Service::system().service_id(), SYSTEM_SERVICE_ID);
    }

    #[test]
    fn test_service_type_prefix_roundtrip() {
        for t in [
            ServiceType::System,
            ServiceType::Postgresql,
            ServiceType::Pgbouncer,
            ServiceType::Patroni,
        ] {
            assert_eq!(ServiceType::from_id_prefix(t.id_prefix()), Some(t));
        }
        assert_eq!(ServiceType::from_id_prefix("postgresql"), Some(ServiceType::Postgresql));
        assert_eq!(ServiceType::from_id_prefix("mysql"), None);
    }

    #[test]
    fn test_normalize_listen_addr() {
        assert_eq!(normalize_listen_addr("*"), "127.0.0.1");
        assert_eq!(normalize_listen_addr("0.0.0.0"), "127.0.0.1");
        assert_eq!(normalize_listen_addr("::"), "::1");
        assert_eq!(normalize_listen_addr("10.0.0.5"), "10.0.0.5");
    }

    #[test]
    fn test_bracket_host() {
        assert_eq!(bracket_host("::1"), "[::1]");
        assert_eq!(bracket_host("127.0.0.1"), "127.0.0.1");
        assert_eq!(bracket_host("db.local"), "db.local");
    }

    #[test]
    fn test_debug_redacts_password() {
        let s = Service::new(
            "postgres:5432",
            ServiceType::Postgresql,
            "host=127.0.0.1 port=5432 user=pgscv password=secret",
        );
        let out = format!("{s:?}");
        assert!(!out.contains("secret"));
        assert!(out.contains("postgres:5432"));
    }
}
