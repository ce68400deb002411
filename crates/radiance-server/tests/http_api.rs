//! End-to-end tests for the HTTP API against a temporary SQLite file.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use radiance_server::{router, AppState, MetricStore};

// ─────────────────────── helpers ───────────────────────

/// Router over a fresh database in `dir`.
fn app(dir: &tempfile::TempDir) -> Router {
    let store = MetricStore::open(&dir.path().join("radiance.db")).unwrap();
    router(Arc::new(AppState::new(store)))
}

/// Send a request and return the status with the parsed JSON body.
async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Ingest body for `code` with one value per day ending today.
fn series(code: &str, region: &str, values: &[f64]) -> Value {
    let today = Utc::now().date_naive();
    let n = values.len() as i64;
    let metrics: Vec<Value> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            json!({
                "code": code,
                "date": (today - Duration::days(n - 1 - i as i64)).to_string(),
                "value": v,
            })
        })
        .collect();
    json!({
        "entities": [{ "code": code, "name": format!("{code} district"), "region": region }],
        "metrics": metrics,
    })
}

const SPIKE: [f64; 8] = [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 40.0];

// ─────────────────────── Reason ───────────────────────

#[tokio::test]
async fn test_ingest_then_score_raises_critical_alert() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let ingest = series("E1", "west", &SPIKE);
    let (status, body) = send(&app, "POST", "/sense/ingest", Some(ingest)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metrics"], 8);

    let (status, body) = send(&app, "POST", "/reason/score", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "alertsRaised": 1 }));

    let (_, body) = send(&app, "GET", "/alerts", None).await;
    let alert = &body["alerts"][0];
    assert_eq!(alert["code"], "E1");
    assert_eq!(alert["severity"], 3);
    assert_eq!(alert["message"], "Critical anomaly");
    assert!(alert["acknowledgedAt"].is_null());
}

#[tokio::test]
async fn test_consecutive_runs_duplicate_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);
    send(&app, "POST", "/sense/ingest", Some(series("E1", "west", &SPIKE))).await;

    send(&app, "POST", "/reason/score", None).await;
    send(&app, "POST", "/reason/score", None).await;

    let (_, body) = send(&app, "GET", "/alerts", None).await;
    assert_eq!(body["alerts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_score_with_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = send(&app, "POST", "/reason/score", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alertsRaised"], 0);
}

// ─────────────────────── Sense ───────────────────────

#[tokio::test]
async fn test_future_metric_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);
    let tomorrow = (Utc::now().date_naive() + Duration::days(1)).to_string();
    let body = json!({
        "entities": [{ "code": "E1", "name": "E1", "region": "west" }],
        "metrics": [{ "code": "E1", "date": tomorrow, "value": 1.0 }],
    });

    let (status, body) = send(&app, "POST", "/sense/ingest", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "E_VALIDATION");

    let (_, loop_state) = send(&app, "GET", "/loop", None).await;
    assert!(loop_state["lastSense"].is_null());
}

#[tokio::test]
async fn test_malformed_ingest_body() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let bad = json!({ "metrics": "nope" });
    let (status, body) = send(&app, "POST", "/sense/ingest", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "E_VALIDATION");
}

// ─────────────────────── Trending ───────────────────────

#[tokio::test]
async fn test_trending_sorted_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);
    let rising: Vec<f64> = [10.0; 7].into_iter().chain([20.0; 7]).collect();
    let easing: Vec<f64> = [10.0; 7].into_iter().chain([12.0; 7]).collect();
    send(&app, "POST", "/sense/ingest", Some(series("UP", "north", &rising))).await;
    send(&app, "POST", "/sense/ingest", Some(series("MILD", "south", &easing))).await;
    send(&app, "POST", "/sense/ingest", Some(series("FLAT", "east", &[5.0; 14]))).await;

    let (status, body) = send(&app, "GET", "/entities/trending?range=30d&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["topItems"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["code"], "UP");
    assert_eq!(items[0]["region"], "north");
    assert_eq!(items[1]["code"], "MILD");
    let first = items[0]["score"].as_f64().unwrap();
    let second = items[1]["score"].as_f64().unwrap();
    assert!(first >= second);
    assert_eq!(items[0]["radiance"], 20.0);
    assert_eq!(items[0]["spark"].as_array().unwrap().len(), 14);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_trending_alert_weight_dominates() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);
    send(&app, "POST", "/sense/ingest", Some(series("E1", "west", &SPIKE))).await;
    send(&app, "POST", "/sense/ingest", Some(series("QUIET", "west", &[5.0; 8]))).await;
    send(&app, "POST", "/reason/score", None).await;

    let (_, body) = send(&app, "GET", "/entities/trending", None).await;
    let items = body["topItems"].as_array().unwrap();
    assert_eq!(items[0]["code"], "E1");
    assert_eq!(items[0]["severity"], "medium");
}

#[tokio::test]
async fn test_trending_rejects_malformed_query() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    for uri in [
        "/entities/trending?range=7",
        "/entities/trending?range=0d",
        "/entities/trending?range=366d",
        "/entities/trending?range=abc",
        "/entities/trending?limit=ten",
    ] {
        let (status, body) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "E_VALIDATION", "{uri}");
    }

    let (status, _) = send(&app, "GET", "/entities/trending?limit=500", None).await;
    assert_eq!(status, StatusCode::OK);
}

// ─────────────────────── Act / Learn ───────────────────────

#[tokio::test]
async fn test_dispatch_and_acknowledge() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);
    send(&app, "POST", "/sense/ingest", Some(series("E1", "west", &SPIKE))).await;
    send(&app, "POST", "/reason/score", None).await;

    let (status, body) = send(&app, "POST", "/act/dispatch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alertsSent"], 1);

    let (_, body) = send(&app, "POST", "/act/dispatch", None).await;
    assert_eq!(body["alertsSent"], 0);

    let (_, alerts) = send(&app, "GET", "/alerts", None).await;
    let id = alerts["alerts"][0]["id"].as_i64().unwrap();
    assert!(alerts["alerts"][0]["sentAt"].is_string());

    let (status, first) = send(&app, "POST", &format!("/alerts/{id}/ack"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["ok"], true);
    assert!(first["acknowledgedAt"].is_string());

    let (_, second) = send(&app, "POST", &format!("/alerts/{id}/ack"), None).await;
    assert_eq!(second["acknowledgedAt"], first["acknowledgedAt"]);

    let (_, open) = send(&app, "GET", "/alerts?unacknowledged=true", None).await;
    assert!(open["alerts"].as_array().unwrap().is_empty());

    let (_, events) = send(&app, "GET", "/events?limit=1", None).await;
    assert_eq!(events["events"][0]["phase"], "LEARN");
    assert_eq!(events["events"][0]["metadata"]["alertId"], id);
}

#[tokio::test]
async fn test_ack_unknown_alert() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = send(&app, "POST", "/alerts/9999/ack", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "E_NOT_FOUND");

    let (status, _) = send(&app, "POST", "/alerts/abc/ack", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─────────────────────── Loop ───────────────────────

#[tokio::test]
async fn test_loop_snapshot_shape() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = send(&app, "GET", "/loop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "lastSense": null, "lastReason": null, "lastAct": null, "lastLearn": null })
    );

    let (_, status_body) = send(&app, "GET", "/loop/status", None).await;
    assert_eq!(status_body["status"], "idle");
    assert_eq!(status_body["latencyMinutes"], 0);

    send(&app, "POST", "/sense/ingest", Some(series("E1", "west", &SPIKE))).await;
    send(&app, "POST", "/reason/score", None).await;
    send(&app, "POST", "/act/dispatch", None).await;

    let (_, body) = send(&app, "GET", "/loop", None).await;
    assert!(body["lastSense"].is_string());
    assert!(body["lastReason"].is_string());
    assert!(body["lastAct"].is_string());
    assert!(body["lastLearn"].is_null());

    let (_, status_body) = send(&app, "GET", "/loop/status", None).await;
    assert_eq!(status_body["status"], "active");
    assert_eq!(status_body["latencyMinutes"], 0);
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let app = app(&dir);
        send(&app, "POST", "/sense/ingest", Some(series("E1", "west", &SPIKE))).await;
        send(&app, "POST", "/reason/score", None).await;
    }

    let app = app(&dir);
    let (_, body) = send(&app, "GET", "/alerts", None).await;
    assert_eq!(body["alerts"].as_array().unwrap().len(), 1);
    // Tracker state is per process.
    let (_, body) = send(&app, "GET", "/loop", None).await;
    assert!(body["lastReason"].is_null());
}
