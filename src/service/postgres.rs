//! Postgres discovery: data directory → `postmaster.pid` → connection string.

use super::{
    ConnectionParams, Service, ServiceType, conninfo, normalize_listen_addr,
    probe::Prober, process::ProcessInfo, service_id,
};
use anyhow::{Context, Result, anyhow};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

const PID_FILE: &str = "postmaster.pid";

/// Process names a postmaster may run under.
#[must_use]
pub fn is_postgres_process(name: &str) -> bool {
    matches!(name, "postgres" | "postmaster")
}

/// Data directory from the `-D` argument, otherwise the working directory.
#[must_use]
pub fn data_directory(cmdline: &[String], cwd: &Path) -> PathBuf {
    let mut args = cmdline.iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-D" {
            if let Some(dir) = args.next() {
                return resolve(cwd, dir);
            }
        } else if let Some(dir) = arg.strip_prefix("-D")
            && !dir.is_empty()
        {
            return resolve(cwd, dir);
        }
    }
    cwd.to_path_buf()
}

fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

/// Parse the content of a `postmaster.pid` file.
///
/// Lines: 0 pid, 1 data directory, 2 start epoch, 3 port, 4 unix socket directory,
/// 5 first listen address (optional).
///
/// # Errors
///
/// Returns an error if fewer than five lines are present or the pid/port are not
/// numbers.
pub fn parse_postmaster_pid(content: &str) -> Result<ConnectionParams> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    if lines.len() < 5 {
        return Err(anyhow!(
            "{PID_FILE} has {} lines, at least 5 expected",
            lines.len()
        ));
    }

    let line = |n: usize| lines.get(n).copied().unwrap_or_default();

    let pid = line(0)
        .parse::<u32>()
        .with_context(|| format!("invalid pid '{}' in {PID_FILE}", line(0)))?;
    let listen_port = line(3)
        .parse::<u16>()
        .with_context(|| format!("invalid port '{}' in {PID_FILE}", line(3)))?;
    let start_time = line(2)
        .parse::<i64>()
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));

    // listen_addresses may list several; the pid file keeps only the first one.
    let listen_addr = normalize_listen_addr(line(5).split(',').next().unwrap_or_default());

    Ok(ConnectionParams {
        pid,
        data_directory: PathBuf::from(line(1)),
        start_time,
        unix_socket_dir: line(4).to_string(),
        listen_addr,
        listen_port,
    })
}

/// Read and parse `<data_directory>/postmaster.pid`.
///
/// # Errors
///
/// Returns an error if the file is missing or malformed.
pub fn read_postmaster_pid(data_directory: &Path) -> Result<ConnectionParams> {
    let path = data_directory.join(PID_FILE);
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_postmaster_pid(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Connection string candidates: unix socket first, TCP second.
#[must_use]
pub fn candidates(params: &ConnectionParams, defaults: &BTreeMap<String, String>) -> Vec<String> {
    let mut list = Vec::with_capacity(2);
    if !params.unix_socket_dir.is_empty() {
        list.push(conninfo::new_postgres_connection_string(params, defaults, true));
    }
    list.push(conninfo::new_postgres_connection_string(params, defaults, false));
    list
}

/// Resolve a postmaster process to a service.
///
/// # Errors
///
/// Returns an error if the pid file cannot be used or no candidate connects.
#[instrument(skip_all, level = "debug", err, fields(pid = process.pid))]
pub async fn discover(
    process: &ProcessInfo,
    defaults: &BTreeMap<String, String>,
    prober: &dyn Prober,
) -> Result<Service> {
    let datadir = data_directory(&process.cmdline, &process.cwd);
    let params = read_postmaster_pid(&datadir)?;

    let mut last_error = anyhow!("no connection candidates");
    for candidate in candidates(&params, defaults) {
        match prober.probe_sql(ServiceType::Postgresql, &candidate).await {
            Ok(()) => {
                debug!(conninfo = %conninfo::redact(&candidate), "postgres candidate accepted");
                return Ok(Service::new(
                    service_id(ServiceType::Postgresql, params.listen_port),
                    ServiceType::Postgresql,
                    candidate,
                )
                .with_pid(process.pid));
            }
            Err(e) => {
                debug!(conninfo = %conninfo::redact(&candidate), error = %e, "postgres candidate rejected");
                last_error = e;
            }
        }
    }

    Err(last_error.context(format!(
        "no usable connection for postgres in {}",
        datadir.display()
    )))
}
