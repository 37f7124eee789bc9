//! Periodic push of per-service metric sets to a remote gateway.

use crate::{
    collectors::CollectorRegistry,
    config::PushConfig,
    exporter::handlers::CONTENT_TYPE,
};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use std::{fs, path::Path};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument as _;
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

pub const API_KEY_HEADER: &str = "X-Weaponry-Api-Key";

const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Machine id from `/etc/machine-id`, or a hash of the hostname when it is missing.
#[must_use]
pub fn machine_id(hostname: &str) -> String {
    machine_id_from(fs::read_to_string(Path::new(MACHINE_ID_PATH)).ok().as_deref(), hostname)
}

fn machine_id_from(content: Option<&str>, hostname: &str) -> String {
    content
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| format!("{:016x}", xxh3_64(hostname.as_bytes())), ToString::to_string)
}

#[must_use]
pub fn job_name(machine_id: &str, service_id: &str) -> String {
    format!("{machine_id}_{service_id}")
}

/// `<base>/metrics/job/<job>`, keeping any path prefix of the base URL.
///
/// # Errors
///
/// Returns an error if the base URL cannot carry a path.
pub fn job_url(base: &Url, job: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| anyhow!("push URL '{base}' cannot be a base"))?
        .pop_if_empty()
        .extend(["metrics", "job", job]);
    Ok(url)
}

/// POST one encoded metric set.
///
/// # Errors
///
/// Returns an error if the request fails or the gateway does not answer 2xx.
pub async fn push_once(
    client: &reqwest::Client,
    url: Url,
    api_key: Option<&SecretString>,
    body: String,
) -> Result<()> {
    let span = info_span!("http.request", http.method = "POST", url = %url, otel.kind = "client");

    let mut request = client
        .post(url.clone())
        .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
        .body(body);
    if let Some(key) = api_key {
        request = request.header(API_KEY_HEADER, key.expose_secret());
    }

    let response = request
        .send()
        .instrument(span)
        .await
        .with_context(|| format!("push to {url} failed"))?;

    if !response.status().is_success() {
        return Err(anyhow!("push to {url} answered {}", response.status()));
    }
    Ok(())
}

/// Collect every service and push each set under its own job. Returns the
/// number of successful pushes.
pub async fn push_all(
    client: &reqwest::Client,
    registry: &CollectorRegistry,
    config: &PushConfig,
    machine_id: &str,
) -> usize {
    let mut pushed = 0;

    for (service_id, set) in registry.collect_per_service().await {
        if set.samples() == 0 {
            debug!(service_id = %service_id, "nothing to push");
            continue;
        }

        let job = job_name(machine_id, &service_id);
        let result = match (set.encode(), job_url(&config.url, &job)) {
            (Ok(body), Ok(url)) => push_once(client, url, config.api_key.as_ref(), body).await,
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        match result {
            Ok(()) => pushed += 1,
            Err(e) => warn!(service_id = %service_id, job = %job, error = %format!("{e:#}"), "push failed"),
        }
    }

    pushed
}

/// Push on every interval tick until `shutdown` turns true.
pub async fn run(
    registry: CollectorRegistry,
    config: PushConfig,
    machine_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = match reqwest::Client::builder().timeout(config.interval).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "failed to build push client, pushing disabled");
            return;
        }
    };

    info!(url = %config.url, interval_secs = config.interval.as_secs(), "metrics push started");

    loop {
        tokio::select! {
            () = tokio::time::sleep(config.interval) => {
                let pushed = push_all(&client, &registry, &config, &machine_id).await;
                debug!(pushed, "push round finished");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("metrics push stopped");
}
