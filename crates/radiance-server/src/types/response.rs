//! Response bodies returned by the HTTP API. Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::Serialize;

use radiance::{Alert, Event, LoopSnapshot, LoopStatus, SeverityBucket};

/// `POST /reason/score`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResponse {
    pub ok: bool,
    pub alerts_raised: usize,
}

/// One row of the trending list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendingItem {
    pub code: String,
    pub name: String,
    pub region: String,
    pub score: f64,
    pub spark: Vec<f64>,
    pub radiance: f64,
    pub severity: SeverityBucket,
}

/// `GET /entities/trending`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingResponse {
    pub top_items: Vec<TrendingItem>,
    pub timestamp: DateTime<Utc>,
}

/// `POST /sense/ingest`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub entities: usize,
    pub metrics: usize,
}

/// `POST /act/dispatch`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub ok: bool,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
}

/// `POST /alerts/{id}/ack`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub ok: bool,
    pub id: i64,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// `GET /loop/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStatusResponse {
    pub status: LoopStatus,
    pub latency_minutes: i64,
    #[serde(flatten)]
    pub phases: LoopSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub events: Vec<Event>,
}
