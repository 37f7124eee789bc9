use crate::{collectors::CollectorRegistry, exporter::GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    services: Vec<String>,
}

fn create_health_response(registry: &CollectorRegistry) -> Health {
    Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: registry.repository().list_ids(),
    }
}

// OPTIONS gets the headers only
fn create_response_body(method: &Method, health: &Health) -> Body {
    if method == Method::GET {
        Json(health).into_response().into_body()
    } else {
        Body::empty()
    }
}

// X-App: name:version:short-hash
fn create_app_headers(health: &Health) -> HeaderMap {
    let short_hash = health.commit.get(..7).unwrap_or("");

    let header_value = format!("{}:{}:{}", health.name, health.version, short_hash);

    let mut headers = HeaderMap::new();
    match header_value.parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => debug!("Failed to parse X-App header: {}", err),
    }
    headers
}

pub async fn health(
    method: Method,
    Extension(registry): Extension<CollectorRegistry>,
) -> impl IntoResponse {
    let health = create_health_response(&registry);
    let body = create_response_body(&method, &health);
    let headers = create_app_headers(&health);

    debug!(services = health.services.len(), "health requested");

    (StatusCode::OK, headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(commit: &str) -> Health {
        Health {
            commit: commit.to_string(),
            name: "pgscv".to_string(),
            version: "0.5.0".to_string(),
            services: vec!["system:0".to_string()],
        }
    }

    #[test]
    fn test_app_header_short_hash() {
        let headers = create_app_headers(&sample("0123456789abcdef"));
        assert_eq!(
            headers.get("X-App").and_then(|v| v.to_str().ok()),
            Some("pgscv:0.5.0:0123456")
        );
    }

    #[test]
    fn test_app_header_without_hash() {
        let headers = create_app_headers(&sample(":-("));
        assert_eq!(
            headers.get("X-App").and_then(|v| v.to_str().ok()),
            Some("pgscv:0.5.0:")
        );
    }

    #[tokio::test]
    async fn test_body_by_method() -> anyhow::Result<()> {
        let health = sample(":-(");

        let options = create_response_body(&Method::OPTIONS, &health);
        assert!(axum::body::to_bytes(options, usize::MAX).await?.is_empty());

        let get = create_response_body(&Method::GET, &health);
        let parsed: Health = serde_json::from_slice(&axum::body::to_bytes(get, usize::MAX).await?)?;
        assert_eq!(parsed.services, vec!["system:0".to_string()]);
        Ok(())
    }
}
