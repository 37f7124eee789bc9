//! Descriptor walk over one database connection.

use super::{
    catalog::{StatDescriptor, StatType},
    metrics::Emitter,
    mountpoint,
};
use anyhow::{Context, Result};
use sqlx::{Column, Executor, PgConnection, Row};
use tracing::{debug, info_span, warn};
use tracing_futures::Instrument as _;

/// Rows as read over the simple query protocol: every value is nullable text.
pub type TextRows = Vec<Vec<Option<String>>>;

/// One value extracted from a result row.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub metric: String,
    pub labels: Vec<String>,
    pub value: f64,
}

/// Numeric value of a text cell; empty and non-numeric cells yield `None`.
#[must_use]
pub fn parse_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Turn a result set into samples. Label columns are matched by name and emitted
/// in the descriptor's label order; a label column absent from the result gets an
/// empty value.
#[must_use]
pub fn samples_from_rows(desc: &StatDescriptor, columns: &[String], rows: &TextRows) -> Vec<Sample> {
    let label_index: Vec<Option<usize>> = desc
        .label_names
        .iter()
        .map(|label| columns.iter().position(|c| c == label))
        .collect();

    let value_columns: Vec<(usize, String)> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| !desc.label_names.contains(&c.as_str()))
        .filter_map(|(i, c)| desc.metric_name_for(c).map(|metric| (i, metric)))
        .collect();

    let mut samples = Vec::new();
    for row in rows {
        let labels: Vec<String> = label_index
            .iter()
            .map(|i| {
                i.and_then(|i| row.get(i).cloned().flatten())
                    .unwrap_or_default()
            })
            .collect();

        for (i, metric) in &value_columns {
            let Some(Some(raw)) = row.get(*i) else {
                debug!(metric = %metric, "NULL value skipped");
                continue;
            };
            match parse_value(raw) {
                Some(value) => samples.push(Sample {
                    metric: metric.clone(),
                    labels: labels.clone(),
                    value,
                }),
                None => debug!(metric = %metric, value = %raw, "non-numeric value skipped"),
            }
        }
    }
    samples
}

/// Run `query` and read every column back as text.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn query_text(conn: &mut PgConnection, query: &str) -> Result<(Vec<String>, TextRows)> {
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = query.split_whitespace().next().unwrap_or_default(),
        db.statement = query,
        otel.kind = "client"
    );
    let rows = Executor::fetch_all(&mut *conn, sqlx::raw_sql(query))
        .instrument(span)
        .await?;

    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let values = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| row.try_get_unchecked::<Option<String>, _>(i).ok().flatten())
                .collect()
        })
        .collect();

    Ok((columns, values))
}

/// The `pg_stat_statements` view is visible in the connected database.
pub const STATEMENTS_VIEW_EXISTS: &str = "SELECT 1 FROM information_schema.views \
    WHERE table_name = 'pg_stat_statements'";

/// `pg_stat_statements` is usable in the connected database: the view exists
/// there and answers (it fails when the library is not preloaded).
pub async fn pg_stat_statements_available(conn: &mut PgConnection) -> bool {
    let installed = query_text(conn, STATEMENTS_VIEW_EXISTS)
        .await
        .is_ok_and(|(_, rows)| !rows.is_empty());

    installed
        && query_text(conn, "SELECT 1 FROM pg_stat_statements LIMIT 1")
            .await
            .is_ok()
}

fn mark_done(desc: &mut StatDescriptor) {
    desc.done = true;
    if desc.oneshot {
        desc.schedule.deactivate();
    }
}

/// Walk all descriptors that are due over one connection. `version` is the
/// server's `server_version_num`, zero for Pgbouncer.
///
/// Returns the number of samples emitted.
pub async fn walk(
    conn: &mut PgConnection,
    descriptors: &mut [StatDescriptor],
    version: i64,
    emitter: &mut Emitter<'_>,
) -> usize {
    let before = emitter.emitted();
    let mut statements: Option<bool> = None;

    for desc in descriptors.iter_mut() {
        if desc.stat_type == StatType::Disabled
            || !desc.schedule.is_active()
            || (desc.oneshot && desc.done)
        {
            continue;
        }

        if desc.query.is_empty() {
            match mountpoint::collect(conn, desc.name, version, emitter).await {
                Ok(_) => mark_done(desc),
                Err(e) => debug!(descriptor = desc.name, error = %e, "directory lookup failed"),
            }
            continue;
        }

        if desc.needs_pg_stat_statements() {
            let available = match statements {
                Some(available) => available,
                None => {
                    let available = pg_stat_statements_available(conn).await;
                    statements = Some(available);
                    available
                }
            };
            if !available {
                debug!(descriptor = desc.name, "pg_stat_statements not available here");
                continue;
            }
        }

        let result = query_text(conn, &desc.query)
            .await
            .with_context(|| format!("{} query failed", desc.name));
        match result {
            Ok((columns, rows)) => {
                for sample in samples_from_rows(desc, &columns, &rows) {
                    let labels: Vec<&str> = sample.labels.iter().map(String::as_str).collect();
                    emitter.emit(&sample.metric, &labels, sample.value);
                }
                mark_done(desc);
            }
            Err(e) => warn!(descriptor = desc.name, error = %format!("{e:#}"), "skipping descriptor"),
        }
    }

    emitter.emitted() - before
}
