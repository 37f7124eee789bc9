use anyhow::Result;
use pgscv::{
    collectors::{Exporter, metrics::MetricSet, walk},
    service::{Service, ServiceType, probe},
};
use std::{collections::BTreeSet, time::Duration};

mod common;

/// Families that only appear with optional features: extensions, replicas,
/// running vacuums, user functions or a log collector.
const OPTIONAL: [&str; 7] = [
    "pg_stat_statements_",
    "pg_stat_replication_",
    "pg_replication_slots_",
    "pg_stat_progress_vacuum_",
    "pg_stat_user_functions_",
    "pg_stat_activity_autovacuum_",
    "pg_log_directory",
];

async fn prepare(dsn: &str) -> Result<()> {
    let mut conn = probe::connect(ServiceType::Postgresql, dsn).await?;
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS pgscv_fixture (id int PRIMARY KEY, payload text);
         INSERT INTO pgscv_fixture SELECT g, md5(g::text) FROM generate_series(1, 100) g
             ON CONFLICT (id) DO NOTHING;
         ANALYZE pgscv_fixture;
         SELECT count(*) FROM pgscv_fixture WHERE id < 50;",
    )
    .execute(&mut conn)
    .await?;

    // Before 15 there is no explicit flush; the stats collector catches up shortly.
    if sqlx::raw_sql("SELECT pg_stat_force_next_flush()")
        .execute(&mut conn)
        .await
        .is_err()
    {
        tokio::time::sleep(Duration::from_millis(700)).await;
    }
    Ok(())
}

#[tokio::test]
async fn test_postgres_family_coverage() -> Result<()> {
    let Some(dsn) = common::reachable_conninfo().await else {
        return Ok(());
    };
    prepare(&dsn).await?;

    let service = Service::new("postgres:test", ServiceType::Postgresql, dsn);
    let mut exporter = Exporter::new(&service, "test", &[]);
    let mut set = MetricSet::new();

    let emitted = exporter.collect(&service, &mut set).await;
    assert!(emitted > 0);
    assert_eq!(exporter.total_failures(), 0);

    let expected: BTreeSet<&String> = exporter
        .describe()
        .keys()
        .filter(|name| name.starts_with("pg_"))
        .filter(|name| !OPTIONAL.iter().any(|prefix| name.starts_with(prefix)))
        .collect();
    let present: BTreeSet<String> = set.family_names().into_iter().collect();
    let absent: Vec<&&String> = expected.iter().filter(|name| !present.contains(name.as_str())).collect();

    assert!(
        absent.len() * 10 < expected.len(),
        "{} of {} families absent: {absent:?}",
        absent.len(),
        expected.len()
    );
    Ok(())
}

#[tokio::test]
async fn test_gated_descriptors_wait_for_their_interval() -> Result<()> {
    let Some(dsn) = common::reachable_conninfo().await else {
        return Ok(());
    };

    let service = Service::new("postgres:test", ServiceType::Postgresql, dsn);
    let mut exporter = Exporter::new(&service, "test", &[]);

    let mut first = MetricSet::new();
    exporter.collect(&service, &mut first).await;
    assert!(first.family_names().iter().any(|n| n == "pg_settings_setting"));

    // pg_settings is collected every five minutes.
    let mut second = MetricSet::new();
    exporter.collect(&service, &mut second).await;
    assert!(!second.family_names().iter().any(|n| n == "pg_settings_setting"));
    assert!(second.family_names().iter().any(|n| n.starts_with("pg_stat_database_")));
    Ok(())
}

#[tokio::test]
async fn test_statements_availability_matches_the_view() -> Result<()> {
    let Some(dsn) = common::reachable_conninfo().await else {
        return Ok(());
    };
    let mut conn = probe::connect(ServiceType::Postgresql, &dsn).await?;

    let (_, exists) = walk::query_text(&mut conn, walk::STATEMENTS_VIEW_EXISTS).await?;
    let readable = walk::query_text(&mut conn, "SELECT 1 FROM pg_stat_statements LIMIT 1")
        .await
        .is_ok();

    assert_eq!(
        walk::pg_stat_statements_available(&mut conn).await,
        !exists.is_empty() && readable
    );
    Ok(())
}

#[tokio::test]
async fn test_unreachable_service_counts_failures() {
    let service = Service::new(
        "postgres:1",
        ServiceType::Postgresql,
        "host=127.0.0.1 port=1 user=postgres dbname=postgres",
    );
    let mut exporter = Exporter::new(&service, "test", &[]);

    for round in 1..=3 {
        let mut set = MetricSet::new();
        assert_eq!(exporter.collect(&service, &mut set).await, 0);
        assert_eq!(set.samples(), 0);
        assert_eq!(exporter.total_failures(), round);
    }
}
