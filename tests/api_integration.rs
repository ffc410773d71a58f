//! API integration tests
//!
//! Full round trips through the axum router with a live pipeline worker and
//! a scripted edge-bridge peer: activate a zone over HTTP, watch the sync
//! state change, deactivate, and verify validation failures stay off the
//! wire.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use egs_control::api::{create_app, ApiState};
use egs_control::config::{ChangeoverConfig, GatewayConfig};
use egs_control::gateway::{pipeline, SyncState, ZoneOrchestrator, ZoneRegistry};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn fast_gateway_config(port: u16) -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_string(),
        port,
        connect_timeout_secs: 1,
        ack_timeout_ms: 300,
        retries: 1,
        retry_pause_ms: 5,
        inter_frame_gap_ms: 1,
        rate_limit_ms: 1,
        require_ack: true,
        queue_capacity: 64,
        reconnect_initial_ms: 10,
        reconnect_max_ms: 50,
        request_guard_secs: 3,
    }
}

fn fast_changeover_config() -> ChangeoverConfig {
    ChangeoverConfig {
        off_wait_timeout_secs: 5,
        off_wait_rounds: 3,
        off_wait_round_gap_ms: 10,
        settle_ms: 10,
        deactivation_rounds: 3,
        deactivation_round_delay_secs: 1,
    }
}

/// Peer that ACKs every frame; returns the frames it observed.
fn spawn_ack_peer(listener: TcpListener) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 16];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(frame) = std::str::from_utf8(&buf[..n]) {
                            sink.lock().unwrap().push(frame.to_string());
                        }
                        let _ = stream.write_all(b"K").await;
                    }
                }
            }
        }
    });
    log
}

async fn live_app() -> (Router, Arc<Mutex<Vec<String>>>, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let wire = spawn_ack_peer(listener);

    let (handle, worker) = pipeline::channel(fast_gateway_config(port));
    let cancel = CancellationToken::new();
    tokio::spawn(worker.run(cancel.clone()));

    let orchestrator = Arc::new(ZoneOrchestrator::new(
        handle,
        Arc::new(ZoneRegistry::default()),
        Arc::new(SyncState::default()),
        None,
        None,
        fast_changeover_config(),
    ));
    let app = create_app(ApiState {
        orchestrator,
        weather_store: None,
        weather_cache: Arc::new(Mutex::new(None)),
    });
    (app, wire, cancel)
}

async fn post_json(app: &Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn activate_and_deactivate_over_http() {
    let (app, wire, cancel) = live_app().await;

    let (status, body) = post_json(
        &app,
        "/api/zones/activate",
        r#"{"zone_name": "Zone B", "wind_direction": "N-S"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["zone"], "Zone B");
    assert_eq!(body["wind_direction"], "N-S");

    let (status, sync) = get_json(&app, "/api/sync/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sync["isActivated"], true);
    assert_eq!(sync["zoneName"], "Zone B");

    let (status, body) = post_json(&app, "/api/zones/deactivate", "{}").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["zone"], "Zone B");

    let (_, sync) = get_json(&app, "/api/sync/state").await;
    assert_eq!(sync["isActivated"], false);
    assert_eq!(sync["deactivationInProgress"], false);

    // Wire saw the ONs then the OFFs for zone B N-S {6, 104}.
    let frames = wire.lock().unwrap().clone();
    assert_eq!(frames, vec!["Al", "Lj#", "Ak", "Li"]);
    cancel.cancel();
}

#[tokio::test]
async fn manual_device_commands_over_http() {
    let (app, wire, cancel) = live_app().await;

    let (status, body) = post_json(&app, "/api/all", r#"{"device": "C", "state": "off"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["ack"], true);

    let (status, body) = post_json(&app, "/api/route", r#"{"device": "A", "route": 7}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = post_json(&app, "/api/mask", r#"{"device": "A", "mask": "1FF"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let frames = wire.lock().unwrap().clone();
    assert_eq!(frames, vec!["C!", "AR7", "AM1FF"]);
    cancel.cancel();
}

#[tokio::test]
async fn validation_failures_never_reach_the_wire() {
    let (app, wire, cancel) = live_app().await;

    let (status, _) = post_json(&app, "/api/mask", r#"{"device": "A", "mask": "200"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(&app, "/api/route", r#"{"device": "A", "route": 10}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(&app, "/api/all", r#"{"device": "O", "state": "on"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &app,
        "/api/zones/activate",
        r#"{"zone_name": "Zone A", "wind_direction": "NW"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Give any stray frame a moment to land, then verify silence.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(wire.lock().unwrap().is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn health_endpoint_reports_the_link() {
    let (app, _wire, cancel) = live_app().await;

    // Drive one frame so the worker has connected.
    let (status, body) = post_json(&app, "/api/all", r#"{"device": "A", "state": "off"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, health) = get_json(&app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["gateway_connected"], true);
    assert_eq!(health["connection_status"], "connected");
    assert_eq!(health["device_status"]["A"]["total_commands"], 1);
    assert!(health["last_heartbeat"].is_string());
    cancel.cancel();
}
