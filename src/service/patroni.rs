//! Patroni discovery: YAML config → REST API base URL.

use super::{
    Service, ServiceType, bracket_host, normalize_listen_addr, probe::Prober,
    process::ProcessInfo,
};
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::{
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

pub const DEFAULT_PORT: &str = "8008";

#[derive(Debug, Default, Deserialize)]
struct PatroniConfig {
    #[serde(default)]
    restapi: Option<RestApi>,
}

#[derive(Debug, Default, Deserialize)]
struct RestApi {
    #[serde(default)]
    listen: Option<String>,
    #[serde(default)]
    certfile: Option<String>,
}

/// What discovery needs from a Patroni config file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestApiSettings {
    pub host: String,
    pub port: String,
    pub tls: bool,
}

impl RestApiSettings {
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// A Patroni daemon runs under a Python interpreter, or as a frozen `patroni`
/// binary, and takes its YAML config as an argument.
#[must_use]
pub fn is_patroni_process(process: &ProcessInfo) -> bool {
    let interpreted = process.name.starts_with("python")
        && process.cmdline.iter().any(|a| a.contains("patroni"));
    (interpreted || process.name == "patroni") && config_path(&process.cmdline, &process.cwd).is_some()
}

/// First `.yml`/`.yaml` argument, resolved against `cwd`.
#[must_use]
pub fn config_path(cmdline: &[String], cwd: &Path) -> Option<PathBuf> {
    let arg = cmdline
        .iter()
        .skip(1)
        .find(|a| a.ends_with(".yml") || a.ends_with(".yaml"))?;
    let p = Path::new(arg);
    Some(if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    })
}

/// Split `restapi.listen` into a connectable host and a port.
///
/// Wildcard addresses become loopback, IPv6 hosts come back bracketed.
///
/// # Errors
///
/// Returns an error on an empty string or a non-numeric port.
pub fn parse_listen(listen: &str) -> Result<(String, String)> {
    let listen = listen.trim();
    if listen.is_empty() {
        return Err(anyhow!("empty restapi.listen"));
    }

    let (host, port) = if let Some(rest) = listen.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("unbalanced brackets in '{listen}'"))?;
        (host, tail.strip_prefix(':').unwrap_or(DEFAULT_PORT))
    } else if listen.parse::<IpAddr>().is_ok() {
        (listen, DEFAULT_PORT)
    } else if listen.matches(':').count() > 1 {
        // Bracket-less IPv6 with a port: the port follows the last colon.
        listen.rsplit_once(':').unwrap_or((listen, DEFAULT_PORT))
    } else {
        listen.split_once(':').unwrap_or((listen, DEFAULT_PORT))
    };

    let port = if port.is_empty() { DEFAULT_PORT } else { port };
    port.parse::<u16>()
        .with_context(|| format!("invalid port '{port}' in '{listen}'"))?;

    Ok((bracket_host(&normalize_listen_addr(host)), port.to_string()))
}

/// Parse Patroni YAML content.
///
/// # Errors
///
/// Returns an error on invalid YAML, a missing `restapi.listen` or an unusable
/// listen string.
pub fn parse_config(content: &str) -> Result<RestApiSettings> {
    let config: PatroniConfig = serde_yaml::from_str(content).context("invalid YAML")?;
    let restapi = config
        .restapi
        .ok_or_else(|| anyhow!("no restapi section"))?;
    let listen = restapi
        .listen
        .ok_or_else(|| anyhow!("no restapi.listen"))?;
    let (host, port) = parse_listen(&listen)?;

    Ok(RestApiSettings {
        host,
        port,
        tls: restapi.certfile.is_some_and(|c| !c.trim().is_empty()),
    })
}

/// Resolve a Patroni process to a service.
///
/// # Errors
///
/// Returns an error if the config cannot be read or parsed or the REST API does
/// not answer its health endpoint.
#[instrument(skip_all, level = "debug", err, fields(pid = process.pid))]
pub async fn discover(process: &ProcessInfo, prober: &dyn Prober) -> Result<Service> {
    let path = config_path(&process.cmdline, &process.cwd)
        .ok_or_else(|| anyhow!("no YAML config in patroni command line"))?;
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let settings =
        parse_config(&content).with_context(|| format!("failed to parse {}", path.display()))?;

    let base_url = settings.base_url();
    prober
        .probe_http(&base_url)
        .await
        .with_context(|| format!("patroni at {base_url} is not healthy"))?;

    debug!(%base_url, "patroni accepted");

    Ok(Service::new(
        format!("{}:{}", ServiceType::Patroni.id_prefix(), settings.port),
        ServiceType::Patroni,
        base_url,
    )
    .with_pid(process.pid))
}
