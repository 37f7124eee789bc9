//! Patroni node status from `GET <base>/patroni`.

use super::{
    catalog::{StatDescriptor, StatType},
    metrics::Emitter,
};
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{info_span, instrument};
use tracing_futures::Instrument as _;

#[derive(Debug, Default, Deserialize)]
pub struct PatroniStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub timeline: Option<u64>,
    #[serde(default)]
    pub xlog: Option<Xlog>,
    #[serde(default)]
    pub pending_restart: bool,
    #[serde(default)]
    pub patroni: Option<PatroniInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Xlog {
    pub location: Option<u64>,
    pub received_location: Option<u64>,
    pub replayed_location: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatroniInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub scope: String,
}

#[allow(clippy::cast_precision_loss)]
const fn to_f64(v: u64) -> f64 {
    v as f64
}

/// Emit the samples of descriptor `name` from a status document.
fn emit_descriptor(name: &str, status: &PatroniStatus, emitter: &mut Emitter<'_>) -> usize {
    match name {
        "patroni_node" => {
            let (scope, version) = status
                .patroni
                .as_ref()
                .map_or(("", ""), |p| (p.scope.as_str(), p.version.as_str()));
            usize::from(emitter.emit(
                "patroni_node",
                &[scope, status.role.as_str(), status.state.as_str(), version],
                1.0,
            ))
        }
        "patroni_timeline" => status
            .timeline
            .map_or(0, |t| usize::from(emitter.emit("patroni_timeline", &[], to_f64(t)))),
        "patroni_xlog" => {
            let Some(xlog) = &status.xlog else {
                return 0;
            };
            [
                ("patroni_xlog_location", xlog.location),
                ("patroni_xlog_received_location", xlog.received_location),
                ("patroni_xlog_replayed_location", xlog.replayed_location),
            ]
            .into_iter()
            .filter_map(|(metric, v)| v.map(|v| (metric, v)))
            .filter(|(metric, v)| emitter.emit(metric, &[], to_f64(*v)))
            .count()
        }
        "patroni_pending_restart" => usize::from(emitter.emit(
            "patroni_pending_restart",
            &[],
            if status.pending_restart { 1.0 } else { 0.0 },
        )),
        _ => 0,
    }
}

/// Emit every due Patroni descriptor from an already fetched status.
pub fn emit_status(
    descriptors: &mut [StatDescriptor],
    status: &PatroniStatus,
    emitter: &mut Emitter<'_>,
) -> usize {
    let mut emitted = 0;
    for desc in descriptors.iter_mut() {
        if desc.stat_type != StatType::Patroni || !desc.schedule.is_active() {
            continue;
        }
        emitted += emit_descriptor(desc.name, status, emitter);
        desc.done = true;
    }
    emitted
}

/// Fetch the node status from the REST API.
///
/// # Errors
///
/// Returns an error if the request fails, the API answers a non-success status or
/// the body is not a status document.
#[instrument(skip(client), level = "debug", err)]
pub async fn fetch_status(client: &reqwest::Client, base_url: &str) -> Result<PatroniStatus> {
    let url = url::Url::parse(base_url)
        .and_then(|u| u.join("patroni"))
        .with_context(|| format!("invalid base URL '{base_url}'"))?;

    let span = info_span!("http.request", http.method = "GET", url = %url, otel.kind = "client");
    let response = client
        .get(url)
        .send()
        .instrument(span)
        .await
        .context("patroni request failed")?;

    if !response.status().is_success() {
        return Err(anyhow!("patroni answered {}", response.status()));
    }

    response
        .json::<PatroniStatus>()
        .await
        .context("invalid patroni status document")
}
