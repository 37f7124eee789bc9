use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("pgscv")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(built_info::GIT_COMMIT_HASH.to_owned())
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("listen-address")
                .short('l')
                .long("listen-address")
                .help("IP address to listen on, IPv6 then IPv4 on all interfaces when unset")
                .env("PGSCV_LISTEN_ADDRESS")
                .value_name("IP")
                .value_parser(clap::value_parser!(std::net::IpAddr)),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("9890")
                .env("PGSCV_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("no-autodiscovery")
                .long("no-autodiscovery")
                .help("Do not scan the process list, monitor configured services only")
                .env("PGSCV_NO_AUTODISCOVERY")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("service")
                .short('s')
                .long("service")
                .help("Service to monitor, e.g. postgres:5432='host=127.0.0.1 port=5432 user=monitor'")
                .env("PGSCV_SERVICES")
                .value_name("ID=CONNINFO")
                .value_delimiter(';')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("postgres-username")
                .long("postgres-username")
                .help("User for discovered PostgreSQL services")
                .env("PGSCV_POSTGRES_USERNAME")
                .value_name("USER"),
        )
        .arg(
            Arg::new("postgres-password")
                .long("postgres-password")
                .help("Password for discovered PostgreSQL services")
                .env("PGSCV_POSTGRES_PASSWORD")
                .hide_env_values(true)
                .value_name("PASSWORD"),
        )
        .arg(
            Arg::new("postgres-dbname")
                .long("postgres-dbname")
                .help("Database for discovered PostgreSQL services")
                .env("PGSCV_POSTGRES_DBNAME")
                .value_name("DBNAME"),
        )
        .arg(
            Arg::new("pgbouncer-username")
                .long("pgbouncer-username")
                .help("User for discovered Pgbouncer services")
                .env("PGSCV_PGBOUNCER_USERNAME")
                .value_name("USER"),
        )
        .arg(
            Arg::new("pgbouncer-password")
                .long("pgbouncer-password")
                .help("Password for discovered Pgbouncer services")
                .env("PGSCV_PGBOUNCER_PASSWORD")
                .hide_env_values(true)
                .value_name("PASSWORD"),
        )
        .arg(
            Arg::new("pgbouncer-dbname")
                .long("pgbouncer-dbname")
                .help("Database for discovered Pgbouncer services")
                .env("PGSCV_PGBOUNCER_DBNAME")
                .value_name("DBNAME"),
        )
        .arg(
            Arg::new("disable-collectors")
                .long("disable-collectors")
                .help("Comma-separated list of stat names to skip, e.g. pg_settings,node_network")
                .env("PGSCV_DISABLE_COLLECTORS")
                .value_name("pg_settings,node_network,...")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("send-metrics-url")
                .long("send-metrics-url")
                .help("Push gateway URL, metrics are pushed per service when set")
                .env("PGSCV_SEND_METRICS_URL")
                .value_name("URL"),
        )
        .arg(
            Arg::new("send-metrics-interval")
                .long("send-metrics-interval")
                .help("Seconds between pushes")
                .default_value("60")
                .env("PGSCV_SEND_METRICS_INTERVAL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .help("Key sent with every push")
                .env("PGSCV_API_KEY")
                .hide_env_values(true)
                .value_name("KEY"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity, -vv for debug")
                .action(ArgAction::Count),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PORT;

    const ENV: [&str; 5] = [
        "PGSCV_PORT",
        "PGSCV_LISTEN_ADDRESS",
        "PGSCV_SERVICES",
        "PGSCV_DISABLE_COLLECTORS",
        "PGSCV_NO_AUTODISCOVERY",
    ];

    fn clean_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(ENV.map(|k| (k, None::<&str>)), f);
    }

    #[test]
    fn test_defaults() {
        clean_env(|| {
            let matches = new().get_matches_from(vec!["pgscv"]);

            assert_eq!(matches.get_one::<u16>("port").copied(), Some(DEFAULT_PORT));
            assert_eq!(matches.get_one::<u64>("send-metrics-interval").copied(), Some(60));
            assert!(!matches.get_flag("no-autodiscovery"));
            assert!(matches.get_one::<std::net::IpAddr>("listen-address").is_none());
            assert!(matches.get_many::<String>("service").is_none());
        });
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "pgscv");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_services_and_disabled_collectors() {
        clean_env(|| {
            let matches = new().get_matches_from(vec![
                "pgscv",
                "--service",
                "postgres:5432=host=127.0.0.1 port=5432",
                "-s",
                "pgbouncer:6432=host=127.0.0.1 port=6432",
                "--disable-collectors",
                "pg_settings,node_network",
                "--disable-collectors",
                "pg_stat_statements",
            ]);

            let services: Vec<&String> = matches
                .get_many::<String>("service")
                .map(Iterator::collect)
                .unwrap_or_default();
            assert_eq!(services.len(), 2);

            let disabled: Vec<&String> = matches
                .get_many::<String>("disable-collectors")
                .map(Iterator::collect)
                .unwrap_or_default();
            assert_eq!(disabled, vec!["pg_settings", "node_network", "pg_stat_statements"]);
        });
    }

    #[test]
    fn test_env() {
        clean_env(|| {
            temp_env::with_vars(
                [
                    ("PGSCV_PORT", Some("9999")),
                    ("PGSCV_LISTEN_ADDRESS", Some("::1")),
                    (
                        "PGSCV_SERVICES",
                        Some("postgres:1=host=a port=1;postgres:2=host=b port=2"),
                    ),
                ],
                || {
                    let matches = new().get_matches_from(vec!["pgscv"]);
                    assert_eq!(matches.get_one::<u16>("port").copied(), Some(9999));
                    assert_eq!(
                        matches
                            .get_one::<std::net::IpAddr>("listen-address")
                            .map(ToString::to_string),
                        Some("::1".to_string())
                    );
                    assert_eq!(
                        matches.get_many::<String>("service").map(Iterator::count),
                        Some(2)
                    );
                },
            );
        });
    }

    #[test]
    fn test_invalid_values() {
        clean_env(|| {
            assert!(new().try_get_matches_from(vec!["pgscv", "--port", "70000"]).is_err());
            assert!(
                new()
                    .try_get_matches_from(vec!["pgscv", "--listen-address", "localhost"])
                    .is_err()
            );
            assert!(
                new()
                    .try_get_matches_from(vec!["pgscv", "--send-metrics-interval", "0"])
                    .is_err()
            );
        });
    }
}
