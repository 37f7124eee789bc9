//! Declarative catalog of statistics the agent knows how to collect.
//!
//! Every collector takes its own copy through [`global_catalog`], so schedule state
//! is never shared between service instances.

use super::schedule::Schedule;
use crate::service::ServiceType;
use once_cell::sync::Lazy;
use std::{collections::HashMap, time::Duration};

/// Interval of expensive or rarely changing statistics.
const SLOW: Duration = Duration::from_secs(5 * 60);

/// Which service type a descriptor belongs to. `Disabled` takes a descriptor out
/// of every walk, e.g. when the server version lacks the underlying view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatType {
    System,
    Postgresql,
    Pgbouncer,
    Patroni,
    Disabled,
}

impl From<ServiceType> for StatType {
    fn from(t: ServiceType) -> Self {
        match t {
            ServiceType::System => Self::System,
            ServiceType::Postgresql => Self::Postgresql,
            ServiceType::Pgbouncer => Self::Pgbouncer,
            ServiceType::Patroni => Self::Patroni,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Counter,
    Gauge,
}

/// One named statistic source.
#[derive(Clone, Debug)]
pub struct StatDescriptor {
    pub name: &'static str,
    pub stat_type: StatType,
    /// SQL text; empty selects a special routine (directory lookup, local reader).
    pub query: String,
    /// Column suffixes forming `name_suffix` metrics. Empty: `name` is the metric.
    pub value_names: &'static [&'static str],
    /// Result columns used as labels, in label order.
    pub label_names: &'static [&'static str],
    pub value_type: ValueType,
    pub schedule: Schedule,
    /// Collect at most once per round, not once per database.
    pub oneshot: bool,
    pub(crate) done: bool,
}

impl StatDescriptor {
    fn new(
        name: &'static str,
        stat_type: StatType,
        query: &str,
        value_names: &'static [&'static str],
        label_names: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            stat_type,
            query: query.to_string(),
            value_names,
            label_names,
            value_type: ValueType::Counter,
            schedule: Schedule::always(),
            oneshot: false,
            done: false,
        }
    }

    const fn gauge(mut self) -> Self {
        self.value_type = ValueType::Gauge;
        self
    }

    const fn oneshot(mut self) -> Self {
        self.oneshot = true;
        self
    }

    const fn every(mut self, interval: Duration) -> Self {
        self.schedule = Schedule::every(interval);
        self
    }

    /// Fully qualified metric names produced by this descriptor.
    #[must_use]
    pub fn metric_names(&self) -> Vec<String> {
        if self.value_names.is_empty() {
            vec![self.name.to_string()]
        } else {
            self.value_names
                .iter()
                .map(|v| format!("{}_{v}", self.name))
                .collect()
        }
    }

    /// Metric name for a result column, if the column is a value of this descriptor.
    #[must_use]
    pub fn metric_name_for(&self, column: &str) -> Option<String> {
        if self.value_names.is_empty() {
            Some(self.name.to_string())
        } else if self.value_names.contains(&column) {
            Some(format!("{}_{column}", self.name))
        } else {
            None
        }
    }

    /// Statistics read from the `pg_stat_statements` extension.
    #[must_use]
    pub fn needs_pg_stat_statements(&self) -> bool {
        self.name.starts_with("pg_stat_statements")
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }
}

const PG_STAT_DATABASE: &str = "SELECT coalesce(datname, '__shared__') AS datname, \
    xact_commit, xact_rollback, blks_read, blks_hit, tup_returned, tup_fetched, \
    tup_inserted, tup_updated, tup_deleted, conflicts, temp_files, temp_bytes, \
    deadlocks, blk_read_time, blk_write_time FROM pg_stat_database";

const PG_DATABASE: &str = "SELECT datname, pg_database_size(datname) AS size_bytes \
    FROM pg_database WHERE datallowconn AND has_database_privilege(datname, 'CONNECT')";

const PG_STAT_BGWRITER: &str = "SELECT checkpoints_timed, checkpoints_req, \
    checkpoint_write_time, checkpoint_sync_time, buffers_checkpoint, buffers_clean, \
    maxwritten_clean, buffers_backend, buffers_backend_fsync, buffers_alloc \
    FROM pg_stat_bgwriter";

const PG_STAT_BGWRITER_17: &str = "SELECT c.num_timed AS checkpoints_timed, \
    c.num_requested AS checkpoints_req, c.write_time AS checkpoint_write_time, \
    c.sync_time AS checkpoint_sync_time, c.buffers_written AS buffers_checkpoint, \
    b.buffers_clean, b.maxwritten_clean, NULL AS buffers_backend, \
    NULL AS buffers_backend_fsync, b.buffers_alloc \
    FROM pg_stat_bgwriter b, pg_stat_checkpointer c";

const PG_STAT_ACTIVITY: &str = "SELECT coalesce(state, 'background') AS state, \
    count(*) AS connections, \
    coalesce(max(extract(epoch FROM clock_timestamp() - xact_start)), 0) AS max_tx_seconds \
    FROM pg_stat_activity GROUP BY 1";

const PG_STAT_ACTIVITY_AUTOVAC: &str = "SELECT count(*) AS workers FROM pg_stat_activity \
    WHERE query ~* '^autovacuum:'";

const PG_STAT_USER_TABLES: &str = "SELECT current_database() AS datname, schemaname, relname, \
    seq_scan, seq_tup_read, coalesce(idx_scan, 0) AS idx_scan, \
    coalesce(idx_tup_fetch, 0) AS idx_tup_fetch, n_tup_ins, n_tup_upd, n_tup_del, \
    n_tup_hot_upd, n_live_tup, n_dead_tup, vacuum_count, autovacuum_count, analyze_count, \
    autoanalyze_count FROM pg_stat_user_tables";

const PG_STATIO_USER_TABLES: &str = "SELECT current_database() AS datname, schemaname, relname, \
    heap_blks_read, heap_blks_hit, idx_blks_read, idx_blks_hit, toast_blks_read, \
    toast_blks_hit, tidx_blks_read, tidx_blks_hit FROM pg_statio_user_tables";

const PG_STAT_USER_INDEXES: &str = "SELECT current_database() AS datname, schemaname, relname, \
    indexrelname, idx_scan, idx_tup_read, idx_tup_fetch FROM pg_stat_user_indexes";

const PG_STATIO_USER_INDEXES: &str = "SELECT current_database() AS datname, schemaname, relname, \
    indexrelname, idx_blks_read, idx_blks_hit FROM pg_statio_user_indexes";

const PG_STAT_USER_FUNCTIONS: &str = "SELECT current_database() AS datname, schemaname, funcname, \
    calls, total_time, self_time FROM pg_stat_user_functions";

const PG_STAT_REPLICATION: &str = "SELECT coalesce(host(client_addr), 'local') AS client_addr, \
    application_name, state, \
    pg_wal_lsn_diff(CASE WHEN pg_is_in_recovery() THEN pg_last_wal_receive_lsn() \
        ELSE pg_current_wal_lsn() END, sent_lsn) AS pending_lag_bytes, \
    pg_wal_lsn_diff(sent_lsn, write_lsn) AS write_lag_bytes, \
    pg_wal_lsn_diff(write_lsn, flush_lsn) AS flush_lag_bytes, \
    pg_wal_lsn_diff(flush_lsn, replay_lsn) AS replay_lag_bytes, \
    pg_wal_lsn_diff(CASE WHEN pg_is_in_recovery() THEN pg_last_wal_receive_lsn() \
        ELSE pg_current_wal_lsn() END, replay_lsn) AS total_lag_bytes \
    FROM pg_stat_replication";

const PG_STAT_REPLICATION_96: &str = "SELECT coalesce(host(client_addr), 'local') AS client_addr, \
    application_name, state, \
    pg_xlog_location_diff(CASE WHEN pg_is_in_recovery() THEN pg_last_xlog_receive_location() \
        ELSE pg_current_xlog_location() END, sent_location) AS pending_lag_bytes, \
    pg_xlog_location_diff(sent_location, write_location) AS write_lag_bytes, \
    pg_xlog_location_diff(write_location, flush_location) AS flush_lag_bytes, \
    pg_xlog_location_diff(flush_location, replay_location) AS replay_lag_bytes, \
    pg_xlog_location_diff(CASE WHEN pg_is_in_recovery() THEN pg_last_xlog_receive_location() \
        ELSE pg_current_xlog_location() END, replay_location) AS total_lag_bytes \
    FROM pg_stat_replication";

const PG_REPLICATION_SLOTS: &str = "SELECT slot_name, slot_type, active::text AS active, \
    pg_wal_lsn_diff(CASE WHEN pg_is_in_recovery() THEN pg_last_wal_receive_lsn() \
        ELSE pg_current_wal_lsn() END, restart_lsn) AS retained_bytes \
    FROM pg_replication_slots";

const PG_REPLICATION_SLOTS_96: &str = "SELECT slot_name, slot_type, active::text AS active, \
    pg_xlog_location_diff(CASE WHEN pg_is_in_recovery() THEN pg_last_xlog_receive_location() \
        ELSE pg_current_xlog_location() END, restart_lsn) AS retained_bytes \
    FROM pg_replication_slots";

const PG_STAT_DATABASE_CONFLICTS: &str = "SELECT datname, confl_tablespace, confl_lock, \
    confl_snapshot, confl_bufferpin, confl_deadlock FROM pg_stat_database_conflicts";

const PG_STAT_ARCHIVER: &str = "SELECT archived_count, failed_count, \
    coalesce(extract(epoch FROM now() - last_archived_time), 0) AS since_last_archive_seconds \
    FROM pg_stat_archiver";

const PG_STAT_PROGRESS_VACUUM: &str = "SELECT datname, relid::regclass::text AS relname, phase, \
    heap_blks_total, heap_blks_scanned, heap_blks_vacuumed FROM pg_stat_progress_vacuum";

const PG_STAT_STATEMENTS: &str = "SELECT d.datname, pg_get_userbyid(s.userid) AS usename, \
    s.queryid::text AS queryid, sum(s.calls) AS calls, sum(s.rows) AS rows, \
    sum(s.total_exec_time) AS total_time, sum(s.blk_read_time) AS blk_read_time, \
    sum(s.blk_write_time) AS blk_write_time, sum(s.shared_blks_hit) AS shared_blks_hit, \
    sum(s.shared_blks_read) AS shared_blks_read, sum(s.shared_blks_dirtied) AS shared_blks_dirtied, \
    sum(s.shared_blks_written) AS shared_blks_written, sum(s.temp_blks_read) AS temp_blks_read, \
    sum(s.temp_blks_written) AS temp_blks_written \
    FROM pg_stat_statements s JOIN pg_database d ON d.oid = s.dbid \
    GROUP BY d.datname, s.userid, s.queryid";

const PG_STAT_STATEMENTS_12: &str = "SELECT d.datname, pg_get_userbyid(s.userid) AS usename, \
    s.queryid::text AS queryid, sum(s.calls) AS calls, sum(s.rows) AS rows, \
    sum(s.total_time) AS total_time, sum(s.blk_read_time) AS blk_read_time, \
    sum(s.blk_write_time) AS blk_write_time, sum(s.shared_blks_hit) AS shared_blks_hit, \
    sum(s.shared_blks_read) AS shared_blks_read, sum(s.shared_blks_dirtied) AS shared_blks_dirtied, \
    sum(s.shared_blks_written) AS shared_blks_written, sum(s.temp_blks_read) AS temp_blks_read, \
    sum(s.temp_blks_written) AS temp_blks_written \
    FROM pg_stat_statements s JOIN pg_database d ON d.oid = s.dbid \
    GROUP BY d.datname, s.userid, s.queryid";

const PG_STAT_STATEMENTS_17: &str = "SELECT d.datname, pg_get_userbyid(s.userid) AS usename, \
    s.queryid::text AS queryid, sum(s.calls) AS calls, sum(s.rows) AS rows, \
    sum(s.total_exec_time) AS total_time, sum(s.shared_blk_read_time) AS blk_read_time, \
    sum(s.shared_blk_write_time) AS blk_write_time, sum(s.shared_blks_hit) AS shared_blks_hit, \
    sum(s.shared_blks_read) AS shared_blks_read, sum(s.shared_blks_dirtied) AS shared_blks_dirtied, \
    sum(s.shared_blks_written) AS shared_blks_written, sum(s.temp_blks_read) AS temp_blks_read, \
    sum(s.temp_blks_written) AS temp_blks_written \
    FROM pg_stat_statements s JOIN pg_database d ON d.oid = s.dbid \
    GROUP BY d.datname, s.userid, s.queryid";

const PG_SETTINGS: &str = "SELECT name, coalesce(unit, '') AS unit, \
    CASE WHEN vartype = 'bool' THEN (setting::bool)::int::text ELSE setting END AS setting \
    FROM pg_settings WHERE vartype IN ('bool', 'integer', 'real')";

const PG_WAL: &str = "SELECT count(*) AS files_total, coalesce(sum(size), 0) AS bytes \
    FROM pg_ls_waldir()";

const PG_POSTMASTER: &str = "SELECT extract(epoch FROM clock_timestamp() - pg_postmaster_start_time()) \
    AS uptime_seconds";

const PG_RECOVERY: &str = "SELECT pg_is_in_recovery()::int AS status";

const PG_SCHEMA_SYSTEM_CATALOG: &str = "SELECT current_database() AS datname, \
    sum(pg_total_relation_size(c.oid)) AS size_bytes FROM pg_class c \
    JOIN pg_namespace n ON n.oid = c.relnamespace \
    WHERE n.nspname = 'pg_catalog' AND c.relkind = 'r'";

const PGBOUNCER_POOLS: &str = "SHOW POOLS";
const PGBOUNCER_STATS: &str = "SHOW STATS";

/// Fresh, independently owned copy of the whole catalog.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn global_catalog() -> Vec<StatDescriptor> {
    use StatType::{Patroni, Pgbouncer, Postgresql, System};

    vec![
        // Postgres, cluster-wide views: once per round.
        StatDescriptor::new(
            "pg_stat_database",
            Postgresql,
            PG_STAT_DATABASE,
            &[
                "xact_commit", "xact_rollback", "blks_read", "blks_hit", "tup_returned",
                "tup_fetched", "tup_inserted", "tup_updated", "tup_deleted", "conflicts",
                "temp_files", "temp_bytes", "deadlocks", "blk_read_time", "blk_write_time",
            ],
            &["datname"],
        )
        .oneshot(),
        StatDescriptor::new("pg_database", Postgresql, PG_DATABASE, &["size_bytes"], &["datname"])
            .gauge()
            .oneshot(),
        StatDescriptor::new(
            "pg_stat_bgwriter",
            Postgresql,
            PG_STAT_BGWRITER,
            &[
                "checkpoints_timed", "checkpoints_req", "checkpoint_write_time",
                "checkpoint_sync_time", "buffers_checkpoint", "buffers_clean",
                "maxwritten_clean", "buffers_backend", "buffers_backend_fsync", "buffers_alloc",
            ],
            &[],
        )
        .oneshot(),
        StatDescriptor::new(
            "pg_stat_activity",
            Postgresql,
            PG_STAT_ACTIVITY,
            &["connections", "max_tx_seconds"],
            &["state"],
        )
        .gauge()
        .oneshot(),
        StatDescriptor::new(
            "pg_stat_activity_autovacuum",
            Postgresql,
            PG_STAT_ACTIVITY_AUTOVAC,
            &["workers"],
            &[],
        )
        .gauge()
        .oneshot(),
        StatDescriptor::new(
            "pg_stat_replication",
            Postgresql,
            PG_STAT_REPLICATION,
            &[
                "pending_lag_bytes", "write_lag_bytes", "flush_lag_bytes", "replay_lag_bytes",
                "total_lag_bytes",
            ],
            &["client_addr", "application_name", "state"],
        )
        .gauge()
        .oneshot(),
        StatDescriptor::new(
            "pg_replication_slots",
            Postgresql,
            PG_REPLICATION_SLOTS,
            &["retained_bytes"],
            &["slot_name", "slot_type", "active"],
        )
        .gauge()
        .oneshot(),
        StatDescriptor::new(
            "pg_stat_database_conflicts",
            Postgresql,
            PG_STAT_DATABASE_CONFLICTS,
            &["confl_tablespace", "confl_lock", "confl_snapshot", "confl_bufferpin", "confl_deadlock"],
            &["datname"],
        )
        .oneshot(),
        StatDescriptor::new(
            "pg_stat_archiver",
            Postgresql,
            PG_STAT_ARCHIVER,
            &["archived_count", "failed_count", "since_last_archive_seconds"],
            &[],
        )
        .oneshot(),
        StatDescriptor::new(
            "pg_stat_progress_vacuum",
            Postgresql,
            PG_STAT_PROGRESS_VACUUM,
            &["heap_blks_total", "heap_blks_scanned", "heap_blks_vacuumed"],
            &["datname", "relname", "phase"],
        )
        .gauge()
        .oneshot(),
        StatDescriptor::new(
            "pg_stat_statements",
            Postgresql,
            PG_STAT_STATEMENTS,
            &[
                "calls", "rows", "total_time", "blk_read_time", "blk_write_time",
                "shared_blks_hit", "shared_blks_read", "shared_blks_dirtied",
                "shared_blks_written", "temp_blks_read", "temp_blks_written",
            ],
            &["datname", "usename", "queryid"],
        )
        .oneshot(),
        StatDescriptor::new("pg_postmaster", Postgresql, PG_POSTMASTER, &["uptime_seconds"], &[])
            .gauge()
            .oneshot(),
        StatDescriptor::new("pg_recovery", Postgresql, PG_RECOVERY, &["status"], &[])
            .gauge()
            .oneshot(),
        StatDescriptor::new("pg_settings", Postgresql, PG_SETTINGS, &["setting"], &["name", "unit"])
            .gauge()
            .oneshot()
            .every(SLOW),
        StatDescriptor::new("pg_wal", Postgresql, PG_WAL, &["files_total", "bytes"], &[])
            .gauge()
            .oneshot()
            .every(SLOW),
        // Directory lookups: empty query selects the mountpoint routine.
        StatDescriptor::new("pg_data_directory", Postgresql, "", &[], &["device", "mountpoint", "path"])
            .gauge()
            .oneshot()
            .every(SLOW),
        StatDescriptor::new("pg_wal_directory", Postgresql, "", &[], &["device", "mountpoint", "path"])
            .gauge()
            .oneshot()
            .every(SLOW),
        StatDescriptor::new("pg_log_directory", Postgresql, "", &[], &["device", "mountpoint", "path"])
            .gauge()
            .oneshot()
            .every(SLOW),
        // Postgres, per-database views.
        StatDescriptor::new(
            "pg_stat_user_tables",
            Postgresql,
            PG_STAT_USER_TABLES,
            &[
                "seq_scan", "seq_tup_read", "idx_scan", "idx_tup_fetch", "n_tup_ins", "n_tup_upd",
                "n_tup_del", "n_tup_hot_upd", "n_live_tup", "n_dead_tup", "vacuum_count",
                "autovacuum_count", "analyze_count", "autoanalyze_count",
            ],
            &["datname", "schemaname", "relname"],
        ),
        StatDescriptor::new(
            "pg_statio_user_tables",
            Postgresql,
            PG_STATIO_USER_TABLES,
            &[
                "heap_blks_read", "heap_blks_hit", "idx_blks_read", "idx_blks_hit",
                "toast_blks_read", "toast_blks_hit", "tidx_blks_read", "tidx_blks_hit",
            ],
            &["datname", "schemaname", "relname"],
        ),
        StatDescriptor::new(
            "pg_stat_user_indexes",
            Postgresql,
            PG_STAT_USER_INDEXES,
            &["idx_scan", "idx_tup_read", "idx_tup_fetch"],
            &["datname", "schemaname", "relname", "indexrelname"],
        ),
        StatDescriptor::new(
            "pg_statio_user_indexes",
            Postgresql,
            PG_STATIO_USER_INDEXES,
            &["idx_blks_read", "idx_blks_hit"],
            &["datname", "schemaname", "relname", "indexrelname"],
        ),
        StatDescriptor::new(
            "pg_stat_user_functions",
            Postgresql,
            PG_STAT_USER_FUNCTIONS,
            &["calls", "total_time", "self_time"],
            &["datname", "schemaname", "funcname"],
        ),
        StatDescriptor::new(
            "pg_schema_system_catalog",
            Postgresql,
            PG_SCHEMA_SYSTEM_CATALOG,
            &["size_bytes"],
            &["datname"],
        )
        .gauge()
        .every(SLOW),
        // Pgbouncer admin console.
        StatDescriptor::new(
            "pgbouncer_pool",
            Pgbouncer,
            PGBOUNCER_POOLS,
            &[
                "cl_active", "cl_waiting", "sv_active", "sv_idle", "sv_used", "sv_tested",
                "sv_login", "maxwait",
            ],
            &["database", "user", "pool_mode"],
        )
        .gauge()
        .oneshot(),
        StatDescriptor::new(
            "pgbouncer_stats",
            Pgbouncer,
            PGBOUNCER_STATS,
            &[
                "total_xact_count", "total_query_count", "total_received", "total_sent",
                "total_xact_time", "total_query_time", "total_wait_time",
            ],
            &["database"],
        )
        .oneshot(),
        // Host statistics, read locally.
        StatDescriptor::new("node_cpu", System, "", &["seconds_total"], &["mode"]),
        StatDescriptor::new(
            "node_memory",
            System,
            "",
            &["mem_total_bytes", "mem_available_bytes", "mem_used_bytes", "swap_total_bytes", "swap_used_bytes"],
            &[],
        )
        .gauge(),
        StatDescriptor::new(
            "node_disk",
            System,
            "",
            &[
                "reads_completed_total", "writes_completed_total", "read_bytes_total",
                "written_bytes_total", "io_time_seconds_total",
            ],
            &["device"],
        ),
        StatDescriptor::new(
            "node_network",
            System,
            "",
            &[
                "receive_bytes_total", "transmit_bytes_total", "receive_packets_total",
                "transmit_packets_total", "receive_errors_total", "transmit_errors_total",
            ],
            &["interface"],
        ),
        StatDescriptor::new(
            "node_filesystem",
            System,
            "",
            &["size_bytes", "avail_bytes"],
            &["device", "mountpoint", "fstype"],
        )
        .gauge(),
        StatDescriptor::new("node_settings_sysctl", System, "", &[], &["sysctl"])
            .gauge()
            .every(SLOW),
        StatDescriptor::new("node_hardware_cores", System, "", &[], &["kind"])
            .gauge()
            .every(SLOW),
        StatDescriptor::new("node_hardware_scaling_governors", System, "", &[], &["governor"])
            .gauge()
            .every(SLOW),
        StatDescriptor::new("node_hardware_numa", System, "", &["nodes"], &[])
            .gauge()
            .every(SLOW),
        StatDescriptor::new(
            "node_hardware_storage_rotational",
            System,
            "",
            &[],
            &["device", "scheduler"],
        )
        .gauge()
        .every(SLOW),
        StatDescriptor::new("node_uptime", System, "", &["seconds"], &[]).gauge(),
        // Patroni REST API.
        StatDescriptor::new("patroni_node", Patroni, "", &[], &["scope", "role", "state", "version"])
            .gauge(),
        StatDescriptor::new("patroni_timeline", Patroni, "", &[], &[]).gauge(),
        StatDescriptor::new(
            "patroni_xlog",
            Patroni,
            "",
            &["location", "received_location", "replayed_location"],
            &[],
        )
        .gauge(),
        StatDescriptor::new("patroni_pending_restart", Patroni, "", &[], &[]).gauge(),
    ]
}

/// Rewrite version-dependent queries for a server reporting `version`
/// (`server_version_num`). Safe to call every round: each decision is taken from
/// the version alone.
pub fn adjust_queries(descriptors: &mut [StatDescriptor], version: i64) {
    for d in descriptors.iter_mut() {
        match d.name {
            "pg_stat_replication" => {
                d.query = pick(version < 100_000, PG_STAT_REPLICATION_96, PG_STAT_REPLICATION);
            }
            "pg_replication_slots" => {
                d.query = pick(version < 100_000, PG_REPLICATION_SLOTS_96, PG_REPLICATION_SLOTS);
            }
            "pg_stat_bgwriter" => {
                d.query = pick(version >= 170_000, PG_STAT_BGWRITER_17, PG_STAT_BGWRITER);
            }
            "pg_stat_statements" => {
                d.query = if version < 130_000 {
                    PG_STAT_STATEMENTS_12
                } else if version < 170_000 {
                    PG_STAT_STATEMENTS
                } else {
                    PG_STAT_STATEMENTS_17
                }
                .to_string();
            }
            "pg_wal" => enable_if(d, version >= 100_000),
            "pg_stat_progress_vacuum" => enable_if(d, version >= 90_600),
            "pg_stat_archiver" => enable_if(d, version >= 90_400),
            _ => {}
        }
    }
}

fn pick(condition: bool, yes: &str, no: &str) -> String {
    if condition { yes } else { no }.to_string()
}

fn enable_if(d: &mut StatDescriptor, supported: bool) {
    d.stat_type = if supported {
        StatType::Postgresql
    } else {
        StatType::Disabled
    };
}

static HELP: &[(&str, &str)] = &[
    ("pg_stat_database_xact_commit", "Number of transactions committed in the database."),
    ("pg_stat_database_xact_rollback", "Number of transactions rolled back in the database."),
    ("pg_stat_database_blks_read", "Number of disk blocks read in the database."),
    ("pg_stat_database_blks_hit", "Number of disk blocks found in the buffer cache."),
    ("pg_stat_database_tup_returned", "Number of rows returned by queries in the database."),
    ("pg_stat_database_tup_fetched", "Number of rows fetched by queries in the database."),
    ("pg_stat_database_tup_inserted", "Number of rows inserted by queries in the database."),
    ("pg_stat_database_tup_updated", "Number of rows updated by queries in the database."),
    ("pg_stat_database_tup_deleted", "Number of rows deleted by queries in the database."),
    ("pg_stat_database_conflicts", "Number of queries canceled due to conflicts with recovery."),
    ("pg_stat_database_temp_files", "Number of temporary files created by queries."),
    ("pg_stat_database_temp_bytes", "Total amount of data written to temporary files by queries."),
    ("pg_stat_database_deadlocks", "Number of deadlocks detected in the database."),
    ("pg_stat_database_blk_read_time", "Time spent reading data file blocks, in milliseconds."),
    ("pg_stat_database_blk_write_time", "Time spent writing data file blocks, in milliseconds."),
    ("pg_database_size_bytes", "Disk space used by the database, in bytes."),
    ("pg_stat_bgwriter_checkpoints_timed", "Number of scheduled checkpoints performed."),
    ("pg_stat_bgwriter_checkpoints_req", "Number of requested checkpoints performed."),
    ("pg_stat_bgwriter_checkpoint_write_time", "Time spent writing checkpoint files to disk, in milliseconds."),
    ("pg_stat_bgwriter_checkpoint_sync_time", "Time spent synchronizing checkpoint files to disk, in milliseconds."),
    ("pg_stat_bgwriter_buffers_checkpoint", "Number of buffers written during checkpoints."),
    ("pg_stat_bgwriter_buffers_clean", "Number of buffers written by the background writer."),
    ("pg_stat_bgwriter_maxwritten_clean", "Number of times the background writer stopped a cleaning scan."),
    ("pg_stat_bgwriter_buffers_backend", "Number of buffers written directly by backends."),
    ("pg_stat_bgwriter_buffers_backend_fsync", "Number of times a backend had to execute its own fsync."),
    ("pg_stat_bgwriter_buffers_alloc", "Number of buffers allocated."),
    ("pg_stat_activity_connections", "Number of connections in each state."),
    ("pg_stat_activity_max_tx_seconds", "Age of the oldest transaction in each state, in seconds."),
    ("pg_stat_activity_autovacuum_workers", "Number of running autovacuum workers."),
    ("pg_stat_replication_pending_lag_bytes", "WAL not yet sent to the standby, in bytes."),
    ("pg_stat_replication_write_lag_bytes", "WAL sent but not yet written by the standby, in bytes."),
    ("pg_stat_replication_flush_lag_bytes", "WAL written but not yet flushed by the standby, in bytes."),
    ("pg_stat_replication_replay_lag_bytes", "WAL flushed but not yet replayed by the standby, in bytes."),
    ("pg_stat_replication_total_lag_bytes", "Total replication lag of the standby, in bytes."),
    ("pg_replication_slots_retained_bytes", "WAL retained by the replication slot, in bytes."),
    ("pg_stat_database_conflicts_confl_tablespace", "Queries canceled due to dropped tablespaces."),
    ("pg_stat_database_conflicts_confl_lock", "Queries canceled due to lock timeouts."),
    ("pg_stat_database_conflicts_confl_snapshot", "Queries canceled due to old snapshots."),
    ("pg_stat_database_conflicts_confl_bufferpin", "Queries canceled due to pinned buffers."),
    ("pg_stat_database_conflicts_confl_deadlock", "Queries canceled due to deadlocks."),
    ("pg_stat_archiver_archived_count", "Number of WAL files successfully archived."),
    ("pg_stat_archiver_failed_count", "Number of failed attempts to archive WAL files."),
    ("pg_stat_archiver_since_last_archive_seconds", "Seconds since the last WAL file was archived."),
    ("pg_stat_progress_vacuum_heap_blks_total", "Total heap blocks of the table being vacuumed."),
    ("pg_stat_progress_vacuum_heap_blks_scanned", "Heap blocks scanned by the running vacuum."),
    ("pg_stat_progress_vacuum_heap_blks_vacuumed", "Heap blocks vacuumed by the running vacuum."),
    ("pg_stat_statements_calls", "Number of times the statement was executed."),
    ("pg_stat_statements_rows", "Number of rows retrieved or affected by the statement."),
    ("pg_stat_statements_total_time", "Time spent executing the statement, in milliseconds."),
    ("pg_stat_statements_blk_read_time", "Time the statement spent reading blocks, in milliseconds."),
    ("pg_stat_statements_blk_write_time", "Time the statement spent writing blocks, in milliseconds."),
    ("pg_stat_statements_shared_blks_hit", "Shared block cache hits by the statement."),
    ("pg_stat_statements_shared_blks_read", "Shared blocks read by the statement."),
    ("pg_stat_statements_shared_blks_dirtied", "Shared blocks dirtied by the statement."),
    ("pg_stat_statements_shared_blks_written", "Shared blocks written by the statement."),
    ("pg_stat_statements_temp_blks_read", "Temporary blocks read by the statement."),
    ("pg_stat_statements_temp_blks_written", "Temporary blocks written by the statement."),
    ("pg_postmaster_uptime_seconds", "Time since the postmaster started, in seconds."),
    ("pg_recovery_status", "Whether the server is in recovery (1) or not (0)."),
    ("pg_settings_setting", "Value of a numeric or boolean server setting."),
    ("pg_wal_files_total", "Number of files in the WAL directory."),
    ("pg_wal_bytes", "Total size of the WAL directory, in bytes."),
    ("pg_data_directory", "Filesystem backing the data directory."),
    ("pg_wal_directory", "Filesystem backing the WAL directory."),
    ("pg_log_directory", "Filesystem backing the log directory."),
    ("pg_stat_user_tables_seq_scan", "Number of sequential scans initiated on the table."),
    ("pg_stat_user_tables_seq_tup_read", "Number of rows fetched by sequential scans."),
    ("pg_stat_user_tables_idx_scan", "Number of index scans initiated on the table."),
    ("pg_stat_user_tables_idx_tup_fetch", "Number of rows fetched by index scans."),
    ("pg_stat_user_tables_n_tup_ins", "Number of rows inserted."),
    ("pg_stat_user_tables_n_tup_upd", "Number of rows updated."),
    ("pg_stat_user_tables_n_tup_del", "Number of rows deleted."),
    ("pg_stat_user_tables_n_tup_hot_upd", "Number of rows HOT updated."),
    ("pg_stat_user_tables_n_live_tup", "Estimated number of live rows."),
    ("pg_stat_user_tables_n_dead_tup", "Estimated number of dead rows."),
    ("pg_stat_user_tables_vacuum_count", "Number of times the table was manually vacuumed."),
    ("pg_stat_user_tables_autovacuum_count", "Number of times the table was vacuumed by autovacuum."),
    ("pg_stat_user_tables_analyze_count", "Number of times the table was manually analyzed."),
    ("pg_stat_user_tables_autoanalyze_count", "Number of times the table was analyzed by autovacuum."),
    ("pg_statio_user_tables_heap_blks_read", "Number of disk blocks read from the table."),
    ("pg_statio_user_tables_heap_blks_hit", "Number of buffer hits in the table."),
    ("pg_statio_user_tables_idx_blks_read", "Number of disk blocks read from the table's indexes."),
    ("pg_statio_user_tables_idx_blks_hit", "Number of buffer hits in the table's indexes."),
    ("pg_statio_user_tables_toast_blks_read", "Number of disk blocks read from the TOAST table."),
    ("pg_statio_user_tables_toast_blks_hit", "Number of buffer hits in the TOAST table."),
    ("pg_statio_user_tables_tidx_blks_read", "Number of disk blocks read from the TOAST indexes."),
    ("pg_statio_user_tables_tidx_blks_hit", "Number of buffer hits in the TOAST indexes."),
    ("pg_stat_user_indexes_idx_scan", "Number of index scans initiated on the index."),
    ("pg_stat_user_indexes_idx_tup_read", "Number of index entries returned by scans."),
    ("pg_stat_user_indexes_idx_tup_fetch", "Number of live rows fetched by simple index scans."),
    ("pg_statio_user_indexes_idx_blks_read", "Number of disk blocks read from the index."),
    ("pg_statio_user_indexes_idx_blks_hit", "Number of buffer hits in the index."),
    ("pg_stat_user_functions_calls", "Number of times the function was called."),
    ("pg_stat_user_functions_total_time", "Time spent in the function and its callees, in milliseconds."),
    ("pg_stat_user_functions_self_time", "Time spent in the function itself, in milliseconds."),
    ("pg_schema_system_catalog_size_bytes", "Size of the system catalog tables, in bytes."),
    ("pgbouncer_pool_cl_active", "Client connections linked to a server connection."),
    ("pgbouncer_pool_cl_waiting", "Client connections waiting for a server connection."),
    ("pgbouncer_pool_sv_active", "Server connections linked to a client."),
    ("pgbouncer_pool_sv_idle", "Server connections idle and ready for use."),
    ("pgbouncer_pool_sv_used", "Server connections idle for more than server_check_delay."),
    ("pgbouncer_pool_sv_tested", "Server connections running a reset or check query."),
    ("pgbouncer_pool_sv_login", "Server connections currently logging in."),
    ("pgbouncer_pool_maxwait", "Age of the oldest waiting client, in seconds."),
    ("pgbouncer_stats_total_xact_count", "Number of transactions pooled."),
    ("pgbouncer_stats_total_query_count", "Number of queries pooled."),
    ("pgbouncer_stats_total_received", "Network traffic received from clients, in bytes."),
    ("pgbouncer_stats_total_sent", "Network traffic sent to clients, in bytes."),
    ("pgbouncer_stats_total_xact_time", "Time spent in transactions, in microseconds."),
    ("pgbouncer_stats_total_query_time", "Time spent in queries, in microseconds."),
    ("pgbouncer_stats_total_wait_time", "Time clients spent waiting for a server, in microseconds."),
    ("node_cpu_seconds_total", "Seconds the CPUs spent in each mode."),
    ("node_memory_mem_total_bytes", "Total amount of memory, in bytes."),
    ("node_memory_mem_available_bytes", "Memory available for new workloads, in bytes."),
    ("node_memory_mem_used_bytes", "Memory in use, in bytes."),
    ("node_memory_swap_total_bytes", "Total amount of swap, in bytes."),
    ("node_memory_swap_used_bytes", "Swap in use, in bytes."),
    ("node_disk_reads_completed_total", "Number of reads completed by the device."),
    ("node_disk_writes_completed_total", "Number of writes completed by the device."),
    ("node_disk_read_bytes_total", "Bytes read from the device."),
    ("node_disk_written_bytes_total", "Bytes written to the device."),
    ("node_disk_io_time_seconds_total", "Seconds the device spent doing I/O."),
    ("node_network_receive_bytes_total", "Bytes received by the interface."),
    ("node_network_transmit_bytes_total", "Bytes transmitted by the interface."),
    ("node_network_receive_packets_total", "Packets received by the interface."),
    ("node_network_transmit_packets_total", "Packets transmitted by the interface."),
    ("node_network_receive_errors_total", "Receive errors on the interface."),
    ("node_network_transmit_errors_total", "Transmit errors on the interface."),
    ("node_filesystem_size_bytes", "Filesystem size, in bytes."),
    ("node_filesystem_avail_bytes", "Filesystem space available, in bytes."),
    ("node_settings_sysctl", "Value of a kernel setting."),
    ("node_hardware_cores", "Number of CPU cores by kind."),
    ("node_hardware_scaling_governors", "Number of CPUs using each frequency scaling governor."),
    ("node_hardware_numa_nodes", "Number of NUMA nodes."),
    ("node_hardware_storage_rotational", "Whether the block device is rotational (1) or not (0)."),
    ("node_uptime_seconds", "Time since the host booted, in seconds."),
    ("patroni_node", "Patroni node information."),
    ("patroni_timeline", "Current timeline of the Patroni node."),
    ("patroni_xlog_location", "Current WAL location on the primary."),
    ("patroni_xlog_received_location", "Last WAL location received by the replica."),
    ("patroni_xlog_replayed_location", "Last WAL location replayed by the replica."),
    ("patroni_pending_restart", "Whether the node needs a restart to apply settings (1) or not (0)."),
];

static HELP_CATALOG: Lazy<HashMap<String, String>> = Lazy::new(|| {
    HELP.iter()
        .map(|(name, help)| ((*name).to_string(), (*help).to_string()))
        .collect()
});

/// Full metric name → help text.
#[must_use]
pub fn global_help_catalog() -> &'static HashMap<String, String> {
    &HELP_CATALOG
}

/// Help text for a metric, never empty.
#[must_use]
pub fn help_for(metric: &str) -> String {
    global_help_catalog()
        .get(metric)
        .cloned()
        .unwrap_or_else(|| format!("{metric} statistic."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_copies_are_independent() {
        let mut a = global_catalog();
        let b = global_catalog();
        if let Some(first) = a.first_mut() {
            first.schedule.activate();
            first.done = true;
            first.query.clear();
        }
        assert!(b.first().is_some_and(|d| !d.done && !d.query.is_empty()));
    }

    #[test]
    fn test_descriptor_names_are_unique() {
        let catalog = global_catalog();
        let names: HashSet<&str> = catalog.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), catalog.len());
    }

    #[test]
    fn test_every_metric_has_help() {
        for d in global_catalog() {
            for metric in d.metric_names() {
                assert!(
                    global_help_catalog().contains_key(&metric),
                    "missing help for {metric}"
                );
            }
        }
    }

    #[test]
    fn test_help_catalog_has_no_orphans() {
        let produced: HashSet<String> = global_catalog()
            .iter()
            .flat_map(StatDescriptor::metric_names)
            .collect();
        for name in global_help_catalog().keys() {
            assert!(produced.contains(name), "help for unknown metric {name}");
        }
    }

    #[test]
    fn test_metric_name_for() {
        let catalog = global_catalog();
        let bgwriter = catalog.iter().find(|d| d.name == "pg_stat_bgwriter");
        assert_eq!(
            bgwriter.and_then(|d| d.metric_name_for("buffers_alloc")).as_deref(),
            Some("pg_stat_bgwriter_buffers_alloc")
        );
        assert!(bgwriter.and_then(|d| d.metric_name_for("unknown")).is_none());

        let data_dir = catalog.iter().find(|d| d.name == "pg_data_directory");
        assert_eq!(
            data_dir.and_then(|d| d.metric_name_for("anything")).as_deref(),
            Some("pg_data_directory")
        );
    }

    #[test]
    fn test_adjust_queries_by_version() {
        let mut catalog = global_catalog();
        let find = |c: &[StatDescriptor], name: &str| c.iter().find(|d| d.name == name).cloned();

        adjust_queries(&mut catalog, 90_600);
        assert!(find(&catalog, "pg_stat_replication").is_some_and(|d| d.query.contains("pg_xlog_location_diff")));
        assert!(find(&catalog, "pg_wal").is_some_and(|d| d.stat_type == StatType::Disabled));
        assert!(find(&catalog, "pg_stat_statements").is_some_and(|d| d.query.contains("s.total_time")));

        adjust_queries(&mut catalog, 160_002);
        assert!(find(&catalog, "pg_stat_replication").is_some_and(|d| d.query.contains("pg_wal_lsn_diff")));
        assert!(find(&catalog, "pg_wal").is_some_and(|d| d.stat_type == StatType::Postgresql));
        assert!(find(&catalog, "pg_stat_statements").is_some_and(|d| d.query.contains("total_exec_time")));
        assert!(find(&catalog, "pg_stat_bgwriter").is_some_and(|d| !d.query.contains("pg_stat_checkpointer")));

        adjust_queries(&mut catalog, 170_000);
        assert!(find(&catalog, "pg_stat_bgwriter").is_some_and(|d| d.query.contains("pg_stat_checkpointer")));
        assert!(find(&catalog, "pg_stat_statements").is_some_and(|d| d.query.contains("shared_blk_read_time")));
    }

    #[test]
    fn test_stat_statements_detection() {
        let catalog = global_catalog();
        let statements: Vec<&str> = catalog
            .iter()
            .filter(|d| d.needs_pg_stat_statements())
            .map(|d| d.name)
            .collect();
        assert_eq!(statements, vec!["pg_stat_statements"]);
    }
}
