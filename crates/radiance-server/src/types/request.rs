//! Request bodies and query strings accepted by the HTTP API.

use chrono::NaiveDate;
use serde::Deserialize;

/// Body of `POST /sense/ingest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub entities: Vec<EntityInput>,
    #[serde(default)]
    pub metrics: Vec<MetricInput>,
}

/// An entity to create, or to rename if its code already exists.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityInput {
    pub code: String,
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub source: String,
}

/// One observation keyed by entity code.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricInput {
    pub code: String,
    pub date: NaiveDate,
    pub value: f64,
}

/// Query string of `GET /entities/trending`.
///
/// Kept as raw strings so malformed values surface as validation errors with
/// a useful message instead of a generic extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrendingQuery {
    pub range: Option<String>,
    pub limit: Option<String>,
}

/// Query string of the `GET /alerts` and `GET /events` listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<String>,
    pub unacknowledged: Option<bool>,
}
