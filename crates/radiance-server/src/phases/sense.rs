//! Sense phase: validate and persist a batch of entities and observations.

use chrono::{DateTime, Utc};
use serde_json::json;

use radiance::{LoopTracker, NewEvent, Phase};

use crate::store::MetricStore;
use crate::types::{ApiError, ApiResult, IngestRequest, IngestResponse};

fn validate(req: &IngestRequest, now: DateTime<Utc>) -> ApiResult<()> {
    for e in &req.entities {
        if e.code.trim().is_empty() {
            return Err(ApiError::Validation("entity code must not be empty".into()));
        }
    }
    let today = now.date_naive();
    for m in &req.metrics {
        if !m.value.is_finite() {
            return Err(ApiError::Validation(format!(
                "metric for '{}' on {} is not a finite number",
                m.code, m.date
            )));
        }
        if m.date > today {
            return Err(ApiError::Validation(format!(
                "metric for '{}' is dated {} which is in the future",
                m.code, m.date
            )));
        }
    }
    Ok(())
}

/// Ingest one batch. Either every row and the SENSE event land, or none do.
pub fn run(
    store: &mut MetricStore,
    tracker: &LoopTracker,
    req: &IngestRequest,
    now: DateTime<Utc>,
) -> ApiResult<IngestResponse> {
    validate(req, now)?;

    let event = NewEvent {
        phase: Phase::Sense,
        message: format!(
            "Ingested {} entities and {} metrics",
            req.entities.len(),
            req.metrics.len()
        ),
        metadata: json!({
            "entities": req.entities.len(),
            "metrics": req.metrics.len(),
        }),
    };
    store.ingest(&req.entities, &req.metrics, &event, now)?;
    tracker.mark_at(Phase::Sense, now);

    tracing::info!(
        entities = req.entities.len(),
        metrics = req.metrics.len(),
        "ingest complete"
    );

    Ok(IngestResponse {
        ok: true,
        entities: req.entities.len(),
        metrics: req.metrics.len(),
    })
}
