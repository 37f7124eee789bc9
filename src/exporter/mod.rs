use crate::{
    cli::telemetry::shutdown_tracer,
    collectors::{CollectorRegistry, hostname},
    config::Config,
    service::{
        Repository,
        discovery::Discovery,
        probe::{NetworkProber, Prober},
        process::{ProcessSource, SysinfoProcesses},
    },
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::{Next, from_fn},
    response::Response,
    routing::get,
};
use opentelemetry::global;
use opentelemetry::trace::{TraceContextExt, TraceId};
use opentelemetry_http::HeaderExtractor;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::TcpListener,
    sync::{oneshot, watch},
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use ulid::Ulid;

mod handlers;
pub mod push;
mod shutdown;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = if let Some(hash) = built_info::GIT_COMMIT_HASH {
    hash
} else {
    ":-("
};

/// Build the HTTP application on top of a collector registry.
pub fn router(registry: CollectorRegistry) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(make_span)
        .on_response(on_response);

    Router::new()
        .route("/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(trace_layer)
                .layer(from_fn(add_trace_headers))
                .layer(Extension(registry)),
        )
}

/// Bind the listener. Without an address IPv6 any is tried first, then IPv4.
async fn bind(listen: Option<IpAddr>, port: u16) -> Result<(TcpListener, SocketAddr)> {
    let listener = if let Some(ip) = listen {
        let addr = SocketAddr::new(ip, port);
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {addr}"))?
    } else {
        match TcpListener::bind(format!("[::]:{port}")).await {
            Ok(l) => l,
            Err(_) => TcpListener::bind(format!("0.0.0.0:{port}"))
                .await
                .with_context(|| format!("Failed to bind to 0.0.0.0:{port}"))?,
        }
    };

    let local = listener.local_addr().context("Failed to read bound address")?;
    Ok((listener, local))
}

/// Run the agent until SIGINT/SIGTERM: discovery, optional push loop and the
/// HTTP server.
pub async fn new(config: Config) -> Result<()> {
    let host = hostname();
    let repository = Arc::new(Repository::new());
    let prober: Arc<dyn Prober> = Arc::new(NetworkProber::new()?);
    let processes: Box<dyn ProcessSource> = Box::new(SysinfoProcesses::new());

    let discovery = Discovery::new(
        Arc::clone(&repository),
        processes,
        prober,
        config.discovery(host.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = oneshot::channel();

    let discovery_task = tokio::spawn(discovery.run(ready_tx, shutdown_rx.clone()));

    // Nothing is served before the first discovery pass registered the system service.
    ready_rx
        .await
        .context("service discovery stopped before its first pass")?;

    let registry = CollectorRegistry::new(Arc::clone(&repository));

    let push_task = config.push.clone().map(|push| {
        let machine_id = push::machine_id(&host);
        tokio::spawn(push::run(
            registry.clone(),
            push,
            machine_id,
            shutdown_rx.clone(),
        ))
    });

    let (listener, bind_addr) = bind(config.listen_address, config.port).await?;

    println!(
        "{} {} - Listening on {bind_addr}\n\nServices:\n{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        format_list(&repository.list_ids()),
    );

    if !config.disabled_collectors.is_empty() {
        println!("\nDisabled collectors:\n{}", format_list(&config.disabled_collectors));
    }

    if let Some(push) = &config.push {
        println!("\nPushing to {} every {}s", push.url, push.interval.as_secs());
    }

    if let Err(e) = axum::serve(listener, router(registry).into_make_service())
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
    {
        error!(error=%e, "server error");
    }

    info!("shutting down");

    let _ = shutdown_tx.send(true);

    if let Err(e) = discovery_task.await {
        warn!(error = %e, "discovery task ended abnormally");
    }

    if let Some(task) = push_task
        && let Err(e) = task.await
    {
        warn!(error = %e, "push task ended abnormally");
    }

    shutdown_tracer();

    Ok(())
}

// Helper to format a list of items with a leading dash and indentation for the
// start up message
fn format_list<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("  - {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn make_span(request: &Request<Body>) -> Span {
    let parent_cx =
        global::get_text_map_propagator(|prop| prop.extract(&HeaderExtractor(request.headers())));

    let header = |name: &str, fallback: &'static str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(fallback)
            .to_string()
    };

    let span = info_span!(
        "http.server.request",
        otel.kind = "server",
        otel.status_code = tracing::field::Empty,
        http.method = request.method().as_str(),
        http.route = request.uri().path(),
        http.target = %request.uri(),
        http.scheme = request.uri().scheme_str().unwrap_or("http"),
        http.user_agent = %header("user-agent", "unknown"),
        request_id = %header("x-request-id", "none"),
    );

    let _ = span.set_parent(parent_cx);

    span
}

fn on_response<B>(response: &axum::http::Response<B>, latency: Duration, span: &Span) {
    if response.status().is_server_error() {
        span.record("otel.status_code", "ERROR");
    } else {
        span.record("otel.status_code", "OK");
    }

    let elapsed_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
    let trace_id = span.context().span().span_context().trace_id();

    if trace_id == TraceId::INVALID {
        info!(
            parent: span,
            status = response.status().as_u16(),
            elapsed_ms,
            "request completed"
        );
    } else {
        info!(
            parent: span,
            status = response.status().as_u16(),
            elapsed_ms,
            trace_id = %trace_id,
            "request completed"
        );
    }
}

async fn add_trace_headers(req: Request<Body>, next: Next) -> Response {
    let mut res = next.run(req).await;

    let span_context = Span::current().context().span().span_context().clone();

    if span_context.is_valid()
        && let Ok(val) = HeaderValue::from_str(&span_context.trace_id().to_string())
    {
        res.headers_mut()
            .insert(HeaderName::from_static("x-trace-id"), val);
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_exists() {
        let is_hex = GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit());
        assert!(is_hex || GIT_COMMIT_HASH == ":-(");
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list::<String>(&[]), "");
        assert_eq!(
            format_list(&["system:0", "postgres:5432"]),
            "  - system:0\n  - postgres:5432"
        );
    }

    #[tokio::test]
    async fn test_bind_explicit_address() -> Result<()> {
        let (_listener, addr) = bind(Some(IpAddr::from([127, 0, 0, 1])), 0).await?;
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        Ok(())
    }

    #[test]
    fn test_make_span_without_optional_headers() -> Result<()> {
        let request = Request::builder().method("GET").uri("/").body(Body::empty())?;
        let span = make_span(&request);
        assert_eq!(
            span.metadata().map(|m| m.name()),
            Some("http.server.request")
        );
        Ok(())
    }

    #[test]
    fn test_on_response_status_codes() -> Result<()> {
        use axum::http::StatusCode;

        let span = info_span!("test");
        let ok = axum::http::Response::builder().status(StatusCode::OK).body(())?;
        on_response(&ok, Duration::from_millis(5), &span);
        let err = axum::http::Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(())?;
        on_response(&err, Duration::from_millis(5), &span);
        Ok(())
    }
}
