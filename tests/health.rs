use anyhow::Result;
use serde_json::Value;

mod common;

#[tokio::test]
async fn test_health_endpoint_lists_services() -> Result<()> {
    let port = common::get_available_port();
    let config = common::test_config(port);

    let handle = tokio::spawn(async move { pgscv::exporter::new(config).await });

    assert!(
        common::wait_for_server(port, 50).await,
        "Server failed to start"
    );

    let response = reqwest::Client::new()
        .get(format!("{}/health", common::get_test_url(port)))
        .send()
        .await?;

    assert_eq!(response.status(), 200);

    let x_app = response
        .headers()
        .get("x-app")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .unwrap_or_default();
    assert!(x_app.starts_with(&format!(
        "{}:{}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )));

    let body: Value = response.json().await?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["commit"].is_string());
    assert_eq!(body["services"], serde_json::json!(["system:0"]));

    handle.abort();

    Ok(())
}

#[tokio::test]
async fn test_health_endpoint_options_request() -> Result<()> {
    let port = common::get_available_port();
    let config = common::test_config(port);

    let handle = tokio::spawn(async move { pgscv::exporter::new(config).await });

    assert!(common::wait_for_server(port, 50).await);

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/health", common::get_test_url(port)),
        )
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.text().await?.is_empty());

    handle.abort();

    Ok(())
}

#[tokio::test]
async fn test_request_id_is_propagated() -> Result<()> {
    let port = common::get_available_port();
    let config = common::test_config(port);

    let handle = tokio::spawn(async move { pgscv::exporter::new(config).await });

    assert!(common::wait_for_server(port, 50).await);

    let response = reqwest::Client::new()
        .get(format!("{}/health", common::get_test_url(port)))
        .header("x-request-id", "test-id-12345")
        .send()
        .await?;

    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("test-id-12345")
    );

    handle.abort();

    Ok(())
}
