//! libpq style `key=value` connection strings.
//!
//! Discovery builds connection strings from [`ConnectionParams`] plus the configured
//! defaults; collectors turn them back into sqlx connect options.

use super::{ConnectionParams, ServiceType};
use anyhow::{Context, Result, anyhow};
use sqlx::postgres::PgConnectOptions;
use std::{collections::BTreeMap, str::FromStr};

/// Keys copied from the defaults map, in output order.
const DEFAULT_KEYS: [&str; 4] = ["user", "password", "dbname", "sslmode"];

/// Database Postgres connections land in unless the defaults say otherwise.
pub const POSTGRES_DEFAULT_DBNAME: &str = "postgres";

/// Pgbouncer admin console database.
pub const PGBOUNCER_DEFAULT_DBNAME: &str = "pgbouncer";

/// Build a Postgres connection string. `unix` selects the socket directory over the
/// TCP listen address.
#[must_use]
pub fn new_postgres_connection_string(
    params: &ConnectionParams,
    defaults: &BTreeMap<String, String>,
    unix: bool,
) -> String {
    build(params, defaults, unix, POSTGRES_DEFAULT_DBNAME)
}

/// Build a Pgbouncer connection string, same rules as Postgres but the admin
/// database is used when the defaults carry no `dbname`.
#[must_use]
pub fn new_pgbouncer_connection_string(
    params: &ConnectionParams,
    defaults: &BTreeMap<String, String>,
    unix: bool,
) -> String {
    build(params, defaults, unix, PGBOUNCER_DEFAULT_DBNAME)
}

fn build(
    params: &ConnectionParams,
    defaults: &BTreeMap<String, String>,
    unix: bool,
    fallback_dbname: &str,
) -> String {
    let host = if unix {
        params.unix_socket_dir.as_str()
    } else {
        params.listen_addr.as_str()
    };

    let mut parts = vec![
        format!("host={}", quote(host)),
        format!("port={}", params.listen_port),
    ];

    for key in DEFAULT_KEYS {
        if let Some(value) = defaults.get(key) {
            parts.push(format!("{key}={}", quote(value)));
        } else if key == "dbname" {
            parts.push(format!("dbname={}", quote(fallback_dbname)));
        }
    }

    parts.join(" ")
}

fn quote(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Split a `key=value` string into pairs. Values may be single-quoted.
///
/// # Errors
///
/// Returns an error on a missing `=` or an unterminated quote.
pub fn parse(conninfo: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = conninfo.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(anyhow!("missing '=' after key '{key}' in connection string"));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '\'' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(anyhow!("unterminated quoted value for key '{key}'"));
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}

/// Turn a connection string (libpq `key=value` or a `postgres://` URL) into sqlx
/// connect options.
///
/// # Errors
///
/// Returns an error if the string cannot be parsed or carries an invalid port.
pub fn to_connect_options(service_type: ServiceType, conninfo: &str) -> Result<PgConnectOptions> {
    let opts = if conninfo.starts_with("postgres://") || conninfo.starts_with("postgresql://") {
        PgConnectOptions::from_str(conninfo).context("invalid connection URL")?
    } else {
        from_pairs(conninfo)?
    };

    // Pgbouncer rejects unknown startup parameters unless they are listed in
    // ignore_startup_parameters.
    Ok(match service_type {
        ServiceType::Pgbouncer => opts.extra_float_digits(None::<i8>),
        _ => opts,
    })
}

fn from_pairs(conninfo: &str) -> Result<PgConnectOptions> {
    let mut opts = PgConnectOptions::new_without_pgpass();
    for (key, value) in parse(conninfo)? {
        opts = match key.as_str() {
            "host" => opts.host(&value),
            "port" => opts.port(
                value
                    .parse::<u16>()
                    .with_context(|| format!("invalid port '{value}'"))?,
            ),
            "user" => opts.username(&value),
            "password" => opts.password(&value),
            "dbname" => opts.database(&value),
            "application_name" => opts.application_name(&value),
            "sslmode" => opts.ssl_mode(
                value
                    .parse()
                    .with_context(|| format!("invalid sslmode '{value}'"))?,
            ),
            _ => opts,
        };
    }

    Ok(opts)
}

/// Value of `key` in a `key=value` connection string, if present.
#[must_use]
pub fn get(conninfo: &str, key: &str) -> Option<String> {
    parse(conninfo)
        .ok()?
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

/// Connection string with the password masked, for logs.
#[must_use]
pub fn redact(conninfo: &str) -> String {
    match parse(conninfo) {
        Ok(pairs) => pairs
            .into_iter()
            .map(|(k, v)| {
                if k == "password" {
                    format!("{k}=******")
                } else {
                    format!("{k}={}", quote(&v))
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => match url::Url::parse(conninfo) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("******"));
                url.to_string()
            }
            Ok(url) => url.to_string(),
            Err(_) => "<unparsable>".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams {
            unix_socket_dir: "/var/run/postgresql".to_string(),
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 5432,
            ..ConnectionParams::default()
        }
    }

    fn defaults(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_postgres_connection_string_unix_and_tcp() {
        let d = defaults(&[("user", "pgscv")]);
        assert_eq!(
            new_postgres_connection_string(&params(), &d, true),
            "host=/var/run/postgresql port=5432 user=pgscv dbname=postgres"
        );
        assert_eq!(
            new_postgres_connection_string(&params(), &d, false),
            "host=127.0.0.1 port=5432 user=pgscv dbname=postgres"
        );
    }

    #[test]
    fn test_connection_string_is_deterministic() {
        let d = defaults(&[("password", "p w"), ("user", "u"), ("dbname", "db")]);
        let a = new_pgbouncer_connection_string(&params(), &d, false);
        let b = new_pgbouncer_connection_string(&params(), &d, false);
        assert_eq!(a, b);
        assert_eq!(a, "host=127.0.0.1 port=5432 user=u password='p w' dbname=db");
    }

    #[test]
    fn test_pgbouncer_fallback_dbname_only_when_absent() {
        let empty = BTreeMap::new();
        assert!(new_pgbouncer_connection_string(&params(), &empty, true).ends_with("dbname=pgbouncer"));

        let d = defaults(&[("dbname", "stats")]);
        let s = new_pgbouncer_connection_string(&params(), &d, true);
        assert!(s.ends_with("dbname=stats"));
        assert!(!s.contains("pgbouncer"));
    }

    #[test]
    fn test_parse_quoted_values() {
        let pairs = parse("host=/tmp password='a b\\'c' dbname = x").unwrap_or_default();
        assert_eq!(
            pairs,
            vec![
                ("host".to_string(), "/tmp".to_string()),
                ("password".to_string(), "a b'c".to_string()),
                ("dbname".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("host").is_err());
        assert!(parse("password='open").is_err());
    }

    #[test]
    fn test_get_and_redact() {
        let s = "host=127.0.0.1 port=5432 user=u password=secret dbname=postgres";
        assert_eq!(get(s, "dbname").as_deref(), Some("postgres"));
        assert_eq!(get(s, "sslmode"), None);
        let r = redact(s);
        assert!(!r.contains("secret"));
        assert!(r.contains("password=******"));
    }

    #[test]
    fn test_to_connect_options() {
        let opts = to_connect_options(ServiceType::Pgbouncer, "host=/tmp port=6432 user=u dbname=pgbouncer");
        assert!(opts.is_ok_and(|o| o.get_database() == Some("pgbouncer")));
        assert!(to_connect_options(ServiceType::Postgresql, "port=notaport").is_err());
        assert!(to_connect_options(ServiceType::Postgresql, "postgresql://u@localhost:5432/postgres").is_ok());
    }
}
