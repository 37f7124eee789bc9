//! Validated runtime configuration assembled by the CLI layer.

use crate::service::{Service, ServiceType, conninfo, discovery::DiscoveryConfig};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use std::{collections::BTreeMap, fmt, net::IpAddr, time::Duration};
use url::Url;

pub const DEFAULT_PORT: u16 = 9890;
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Credentials applied to every discovered service of one type.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub dbname: Option<String>,
}

impl Credentials {
    /// Connection string defaults (`user`, `password`, `dbname`).
    #[must_use]
    pub fn to_defaults(&self) -> BTreeMap<String, String> {
        let mut defaults = BTreeMap::new();
        if let Some(user) = &self.username {
            defaults.insert("user".to_string(), user.clone());
        }
        if let Some(password) = &self.password {
            defaults.insert("password".to_string(), password.expose_secret().to_string());
        }
        if let Some(dbname) = &self.dbname {
            defaults.insert("dbname".to_string(), dbname.clone());
        }
        defaults
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("dbname", &self.dbname)
            .finish()
    }
}

/// A service given on the command line as `ID=CONNINFO`.
#[derive(Clone)]
pub struct StaticService {
    pub service_id: String,
    pub service_type: ServiceType,
    pub conninfo: SecretString,
}

impl fmt::Debug for StaticService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticService")
            .field("service_id", &self.service_id)
            .field("service_type", &self.service_type)
            .field("conninfo", &conninfo::redact(self.conninfo.expose_secret()))
            .finish()
    }
}

impl StaticService {
    /// Parse `postgres:5432=host=127.0.0.1 port=5432 user=monitor`. The id prefix
    /// names the service type; Patroni takes a base URL instead of a conninfo.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is malformed, the type is unknown or the
    /// connection target does not parse.
    pub fn parse(arg: &str) -> Result<Self> {
        let (id, target) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("expected ID=CONNINFO, got '{}'", conninfo::redact(arg)))?;
        let id = id.trim();
        let target = target.trim();

        let (prefix, name) = id
            .split_once(':')
            .ok_or_else(|| anyhow!("service id '{id}' must look like <type>:<name>"))?;
        if name.is_empty() {
            return Err(anyhow!("service id '{id}' has an empty name"));
        }

        let service_type = match ServiceType::from_id_prefix(prefix) {
            Some(ServiceType::System) => {
                return Err(anyhow!("the system service is always present and cannot be configured"));
            }
            Some(service_type) => service_type,
            None => return Err(anyhow!("unknown service type '{prefix}' in '{id}'")),
        };

        if target.is_empty() {
            return Err(anyhow!("service '{id}' has an empty connection target"));
        }

        if service_type == ServiceType::Patroni {
            Url::parse(target).with_context(|| format!("service '{id}': invalid URL"))?;
        } else {
            conninfo::parse(target).with_context(|| format!("service '{id}': invalid conninfo"))?;
        }

        Ok(Self {
            service_id: format!("{}:{name}", service_type.id_prefix()),
            service_type,
            conninfo: SecretString::from(target.to_string()),
        })
    }

    #[must_use]
    pub fn to_service(&self) -> Service {
        Service::new(
            self.service_id.clone(),
            self.service_type,
            self.conninfo.expose_secret(),
        )
    }
}

#[derive(Clone)]
pub struct PushConfig {
    pub url: Url,
    pub interval: Duration,
    pub api_key: Option<SecretString>,
}

impl fmt::Debug for PushConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConfig")
            .field("url", &self.url.as_str())
            .field("interval", &self.interval)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl PushConfig {
    /// # Errors
    ///
    /// Returns an error if the URL does not parse, is not http(s) or the interval
    /// is zero.
    pub fn new(url: &str, interval: Duration, api_key: Option<SecretString>) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid push URL '{url}'"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("push URL must be http or https, got '{}'", url.scheme()));
        }
        if interval.is_zero() {
            return Err(anyhow!("push interval must be at least one second"));
        }
        Ok(Self {
            url,
            interval,
            api_key,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// `None` binds every interface, IPv6 first.
    pub listen_address: Option<IpAddr>,
    pub port: u16,
    pub autodiscovery: bool,
    pub services: Vec<StaticService>,
    pub postgres: Credentials,
    pub pgbouncer: Credentials,
    pub disabled_collectors: Vec<String>,
    pub push: Option<PushConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: None,
            port: DEFAULT_PORT,
            autodiscovery: true,
            services: Vec::new(),
            postgres: Credentials::default(),
            pgbouncer: Credentials::default(),
            disabled_collectors: Vec::new(),
            push: None,
        }
    }
}

impl Config {
    /// Reject combinations that cannot work together.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate service ids.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if !seen.insert(service.service_id.as_str()) {
                return Err(anyhow!("service '{}' configured twice", service.service_id));
            }
        }
        Ok(())
    }

    /// Settings for the discovery loop.
    #[must_use]
    pub fn discovery(&self, host: String) -> DiscoveryConfig {
        DiscoveryConfig {
            autodiscovery: self.autodiscovery,
            postgres_defaults: self.postgres.to_defaults(),
            pgbouncer_defaults: self.pgbouncer.to_defaults(),
            host,
            disabled_collectors: self.disabled_collectors.clone(),
            services: self.services.iter().map(StaticService::to_service).collect(),
            ..DiscoveryConfig::default()
        }
    }
}
