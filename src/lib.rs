//! Metrics agent for PostgreSQL, Pgbouncer, Patroni and the host they run on.

pub mod cli;
pub mod collectors;
pub mod config;
pub mod exporter;
pub mod service;
