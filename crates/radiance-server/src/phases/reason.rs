//! Reason phase: score every entity over the trailing window and record alerts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use radiance::scorer::{self, window_start, window_start_utc, SCORING_WINDOW_DAYS};
use radiance::{DedupPolicy, LoopTracker, NewEvent, Phase};

use crate::store::MetricStore;
use crate::types::ApiResult;

/// Result of one scoring run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreOutcome {
    pub alerts_raised: usize,
    pub entities_scored: usize,
    pub suppressed: usize,
    pub alert_ids: Vec<i64>,
}

/// Run the scorer once. Alerts and the REASON event are committed together;
/// on any storage failure nothing is written and the tracker is untouched.
pub fn run(
    store: &mut MetricStore,
    tracker: &LoopTracker,
    dedup: &dyn DedupPolicy,
    now: DateTime<Utc>,
) -> ApiResult<ScoreOutcome> {
    let today = now.date_naive();
    let metrics = store.metrics_since(window_start(today, SCORING_WINDOW_DAYS))?;
    let prior = store.alert_marks_since(window_start_utc(today, SCORING_WINDOW_DAYS))?;
    let codes: HashMap<i64, String> = store
        .entity_map()?
        .into_iter()
        .map(|(id, e)| (id, e.code))
        .collect();

    let plan = scorer::plan(&metrics, &codes, &prior, dedup, now);
    let alerts_raised = plan.alerts.len();

    let event = NewEvent {
        phase: Phase::Reason,
        message: format!(
            "Scored {} entities, raised {alerts_raised} alerts",
            plan.entities_scored
        ),
        metadata: json!({
            "alertsRaised": alerts_raised,
            "entitiesScored": plan.entities_scored,
            "suppressed": plan.suppressed,
            "windowDays": SCORING_WINDOW_DAYS,
        }),
    };
    let alert_ids = store.record_scoring(&plan.alerts, &event, now)?;
    tracker.mark_at(Phase::Reason, now);

    tracing::info!(
        alerts_raised,
        entities_scored = plan.entities_scored,
        metrics = metrics.len(),
        "scoring run complete"
    );

    Ok(ScoreOutcome {
        alerts_raised,
        entities_scored: plan.entities_scored,
        suppressed: plan.suppressed,
        alert_ids,
    })
}
