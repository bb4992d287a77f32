mod common;

use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use common::{Origin, sample_mp4};
use mediapeek::api::delegate::default_engines;
use mediapeek::api::{AppState, LocalDelegate, analyzer_router, gateway_router};
use mediapeek::config::Config;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const RPC_KEY: &str = "rpc-key";

fn analyzer_app() -> Router {
    let mut config = Config::default();
    config.secrets.analyzer_api_key = Some(RPC_KEY.to_string());
    let delegate = Arc::new(LocalDelegate::new(&config, default_engines()).unwrap());
    analyzer_router(AppState::new(config, delegate).unwrap())
}

fn rpc_gateway(endpoint: SocketAddr, api_key: Option<&str>) -> Router {
    let mut config: Config = toml::from_str(&format!(
        "[delegation]\nmode = \"rpc\"\nendpoint = \"http://{endpoint}\"\ntimeout_ms = 500\n"
    ))
    .unwrap();
    config.secrets.analyzer_api_key = api_key.map(str::to_string);
    gateway_router(AppState::from_config(config).unwrap())
}

fn analyze(url: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/resource/analyze")
        .header(header::CONTENT_TYPE, "application/json")
        .header("cf-ray", "ray-42")
        .body(Body::from(json!({ "url": url, "format": ["json", "text"] }).to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Analyzer stand-in that answers every call with `reply`
async fn fake_analyzer<R>(reply: R) -> SocketAddr
where
    R: Fn() -> axum::response::Response + Clone + Send + Sync + 'static,
{
    let app = Router::new().route(
        "/analyze",
        post(move || {
            let reply = reply.clone();
            async move { reply() }
        }),
    );
    common::serve(app).await
}

#[tokio::test]
async fn test_gateway_delegates_to_analyzer_service() {
    let origin = Origin::start(sample_mp4(300_000)).await;
    let analyzer = common::serve(analyzer_app()).await;
    let app = rpc_gateway(analyzer, Some(RPC_KEY));

    let response = app.oneshot(analyze(&origin.url("/video.mp4"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["requestId"], "ray-42");
    assert!(body["results"]["json"].as_str().unwrap().contains("MPEG-4"));
    assert!(body["results"]["text"].as_str().is_some());
    assert_eq!(body["diagnostics"]["fetch"]["wasTruncated"], false);
    assert_eq!(body["diagnostics"]["analysis"]["engine"], "probe");
}

#[tokio::test]
async fn test_analyzer_requires_rpc_key() {
    let response = analyzer_app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/analyze")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"url":"https://example.com/a.mp4"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "AUTH_REQUIRED");
}

#[tokio::test]
async fn test_gateway_relays_analyzer_auth_failure() {
    let analyzer = common::serve(analyzer_app()).await;
    let app = rpc_gateway(analyzer, Some("stale-key"));

    let response = app.oneshot(analyze("https://example.com/a.mp4")).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"]["code"], "AUTH_INVALID");
}

#[tokio::test]
async fn test_remote_failure_keeps_code_and_status() {
    let analyzer = fake_analyzer(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": {
                    "code": "CPU_BUDGET_EXCEEDED",
                    "message": "Analysis exceeded its budget.",
                    "retryable": true,
                },
            })),
        )
            .into_response()
    })
    .await;
    let app = rpc_gateway(analyzer, None);

    let response = app.oneshot(analyze("https://example.com/a.mp4")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "CPU_BUDGET_EXCEEDED");
    assert_eq!(body["error"]["retryable"], true);
}

#[tokio::test]
async fn test_non_json_analyzer_reply_is_bad_gateway() {
    let analyzer = fake_analyzer(|| {
        (
            [(header::CONTENT_TYPE, "text/html")],
            "<html>502 upstream</html>",
        )
            .into_response()
    })
    .await;
    let app = rpc_gateway(analyzer, None);

    let response = app.oneshot(analyze("https://example.com/a.mp4")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"]["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_incomplete_analyzer_reply_is_bad_gateway() {
    let analyzer = fake_analyzer(|| Json(json!({ "success": true })).into_response()).await;
    let app = rpc_gateway(analyzer, None);

    let response = app.oneshot(analyze("https://example.com/a.mp4")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"]["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_slow_analyzer_times_out() {
    let app = Router::new().route(
        "/analyze",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "success": true }))
        }),
    );
    let analyzer = common::serve(app).await;
    let app = rpc_gateway(analyzer, None);

    let response = app.oneshot(analyze("https://example.com/a.mp4")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "UPSTREAM_FETCH_FAILED");
    assert_eq!(body["error"]["retryable"], true);
}

#[tokio::test]
async fn test_unreachable_analyzer_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let app = rpc_gateway(addr, None);

    let response = app.oneshot(analyze("https://example.com/a.mp4")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_rpc_gateway_health_reports_mode() {
    let analyzer = common::serve(analyzer_app()).await;
    let app = rpc_gateway(analyzer, None);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(json_body(response).await["delegation"], "rpc");
}
