use crate::{
    cli::actions::Action,
    config::{Config, Credentials, PushConfig, StaticService},
};
use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use secrecy::SecretString;
use std::{net::IpAddr, time::Duration};
use tracing::info;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    // Get the port or return an error
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    let services = matches
        .get_many::<String>("service")
        .map(|vals| {
            vals.map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(StaticService::parse)
                .collect::<Result<Vec<_>>>()
        })
        .transpose()
        .context("invalid --service value")?
        .unwrap_or_default();

    let config = Config {
        listen_address: matches.get_one::<IpAddr>("listen-address").copied(),
        port,
        autodiscovery: !matches.get_flag("no-autodiscovery"),
        services,
        postgres: credentials(matches, "postgres"),
        pgbouncer: credentials(matches, "pgbouncer"),
        disabled_collectors: get_disabled_collectors(matches),
        push: push_config(matches)?,
    };

    config.validate()?;

    info!(
        autodiscovery = config.autodiscovery,
        services = config.services.len(),
        disabled = ?config.disabled_collectors,
        "configuration loaded"
    );

    Ok(Action::Run {
        config: Box::new(config),
    })
}

fn credentials(matches: &ArgMatches, prefix: &str) -> Credentials {
    let value = |name: &str| {
        matches
            .get_one::<String>(&format!("{prefix}-{name}"))
            .filter(|s| !s.is_empty())
            .cloned()
    };

    Credentials {
        username: value("username"),
        password: value("password").map(SecretString::from),
        dbname: value("dbname"),
    }
}

pub fn get_disabled_collectors(matches: &ArgMatches) -> Vec<String> {
    let mut disabled: Vec<String> = matches
        .get_many::<String>("disable-collectors")
        .map(|vals| {
            vals.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    disabled.sort();
    disabled.dedup();
    disabled
}

fn push_config(matches: &ArgMatches) -> Result<Option<PushConfig>> {
    let Some(url) = matches
        .get_one::<String>("send-metrics-url")
        .filter(|s| !s.trim().is_empty())
    else {
        return Ok(None);
    };

    let interval = matches
        .get_one::<u64>("send-metrics-interval")
        .copied()
        .map_or(crate::config::DEFAULT_PUSH_INTERVAL, Duration::from_secs);

    let api_key = matches
        .get_one::<String>("api-key")
        .filter(|s| !s.is_empty())
        .map(|s| SecretString::from(s.clone()));

    PushConfig::new(url.trim(), interval, api_key).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    fn action(args: &[&str]) -> Result<Config> {
        let matches = commands::new().try_get_matches_from(args)?;
        match handler(&matches)? {
            Action::Run { config } => Ok(*config),
        }
    }

    #[test]
    fn test_get_disabled_collectors_dedup() {
        let matches = commands::new().get_matches_from(vec![
            "pgscv",
            "--disable-collectors",
            "pg_settings, node_network,",
            "--disable-collectors",
            "pg_settings",
        ]);
        assert_eq!(
            get_disabled_collectors(&matches),
            vec!["node_network".to_string(), "pg_settings".to_string()]
        );
    }

    #[test]
    fn test_handler_builds_config() -> Result<()> {
        temp_env::with_vars(
            [
                ("PGSCV_SERVICES", None::<&str>),
                ("PGSCV_SEND_METRICS_URL", None),
                ("PGSCV_POSTGRES_PASSWORD", None),
            ],
            || {
                let config = action(&[
                    "pgscv",
                    "--no-autodiscovery",
                    "--service",
                    "postgres:5432=host=127.0.0.1 port=5432 user=monitor",
                    "--postgres-username",
                    "monitor",
                    "--postgres-password",
                    "secret",
                    "--send-metrics-url",
                    "https://push.example.org",
                    "--api-key",
                    "key",
                ])?;

                assert!(!config.autodiscovery);
                assert_eq!(config.services.len(), 1);
                assert_eq!(config.postgres.username.as_deref(), Some("monitor"));
                assert_eq!(
                    config.postgres.password.as_ref().map(|p| p.expose_secret().to_string()),
                    Some("secret".to_string())
                );
                assert!(config.pgbouncer.username.is_none());

                let push = config.push.ok_or_else(|| anyhow!("push config missing"))?;
                assert_eq!(push.url.as_str(), "https://push.example.org/");
                assert_eq!(push.interval, Duration::from_secs(60));
                assert!(push.api_key.is_some());
                Ok(())
            },
        )
    }

    #[test]
    fn test_handler_rejects_bad_service() {
        temp_env::with_var("PGSCV_SERVICES", None::<&str>, || {
            assert!(action(&["pgscv", "--service", "nonsense"]).is_err());
            assert!(
                action(&[
                    "pgscv",
                    "--service",
                    "postgres:1=host=a",
                    "--service",
                    "postgres:1=host=b"
                ])
                .is_err()
            );
        });
    }

    #[test]
    fn test_handler_rejects_bad_push_url() {
        temp_env::with_var("PGSCV_SEND_METRICS_URL", None::<&str>, || {
            assert!(action(&["pgscv", "--send-metrics-url", "not a url"]).is_err());
        });
    }
}
