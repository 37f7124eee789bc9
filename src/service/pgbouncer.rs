//! Pgbouncer discovery: command line → ini file → connection string.

use super::{
    ConnectionParams, Service, ServiceType, conninfo, normalize_listen_addr,
    probe::Prober, process::ProcessInfo, service_id,
};
use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

pub const DEFAULT_UNIX_SOCKET_DIR: &str = "/tmp";
pub const DEFAULT_LISTEN_PORT: u16 = 6432;

#[allow(clippy::expect_used)]
static INI_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)\s*=\s*(.*?)$").expect("valid ini line regex")
});

#[must_use]
pub fn is_pgbouncer_process(name: &str) -> bool {
    name == "pgbouncer"
}

/// Options that consume the next argument.
const OPTIONS_WITH_VALUE: [&str; 2] = ["-u", "--user"];

/// Config file path: the last argument that is neither a flag nor a flag's
/// value, relative to `cwd`.
#[must_use]
pub fn config_path(cmdline: &[String], cwd: &Path) -> Option<PathBuf> {
    let mut arg = None;
    let mut args = cmdline.iter().skip(1);
    while let Some(a) = args.next() {
        if OPTIONS_WITH_VALUE.contains(&a.as_str()) {
            args.next();
        } else if !a.starts_with('-') {
            arg = Some(a);
        }
    }
    let arg = arg?;

    let p = Path::new(arg);
    Some(if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    })
}

/// Parse ini content into connection parameters, applying pgbouncer defaults.
///
/// # Errors
///
/// Returns an error if `listen_port` is present but not a port number.
pub fn parse_ini(content: &str) -> Result<ConnectionParams> {
    let mut listen_addr: Option<String> = None;
    let mut listen_port: Option<u16> = None;
    let mut unix_socket_dir: Option<String> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') || line.starts_with('[')
        {
            continue;
        }

        let Some(caps) = INI_LINE.captures(line) else {
            continue;
        };
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = value.as_str().trim();

        match key.as_str() {
            "listen_addr" => {
                let first = value.split(',').next().unwrap_or_default();
                listen_addr = Some(normalize_listen_addr(first));
            }
            "listen_port" => {
                listen_port = Some(
                    value
                        .parse::<u16>()
                        .with_context(|| format!("invalid listen_port '{value}'"))?,
                );
            }
            "unix_socket_dir" => unix_socket_dir = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(ConnectionParams {
        listen_addr: listen_addr.unwrap_or_else(|| "127.0.0.1".to_string()),
        listen_port: listen_port.unwrap_or(DEFAULT_LISTEN_PORT),
        unix_socket_dir: unix_socket_dir.unwrap_or_else(|| DEFAULT_UNIX_SOCKET_DIR.to_string()),
        ..ConnectionParams::default()
    })
}

/// Resolve a pgbouncer process to a service.
///
/// # Errors
///
/// Returns an error if the ini file cannot be found, read or parsed, or the
/// resulting connection string does not connect.
#[instrument(skip_all, level = "debug", err, fields(pid = process.pid))]
pub async fn discover(
    process: &ProcessInfo,
    defaults: &BTreeMap<String, String>,
    prober: &dyn Prober,
) -> Result<Service> {
    let path = config_path(&process.cmdline, &process.cwd)
        .ok_or_else(|| anyhow!("no config file in pgbouncer command line"))?;
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut params =
        parse_ini(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    params.pid = process.pid;

    // An empty unix_socket_dir disables the socket, go over TCP then.
    let unix = !params.unix_socket_dir.is_empty();
    let candidate = conninfo::new_pgbouncer_connection_string(&params, defaults, unix);

    prober
        .probe_sql(ServiceType::Pgbouncer, &candidate)
        .await
        .with_context(|| format!("pgbouncer from {} is not reachable", path.display()))?;

    debug!(conninfo = %conninfo::redact(&candidate), "pgbouncer accepted");

    Ok(Service::new(
        service_id(ServiceType::Pgbouncer, params.listen_port),
        ServiceType::Pgbouncer,
        candidate,
    )
    .with_pid(process.pid))
}
