//! Learn phase: operator acknowledgement of an alert.

use chrono::{DateTime, Utc};
use serde_json::json;

use radiance::{Alert, LoopTracker, NewEvent, Phase};

use crate::store::MetricStore;
use crate::types::{ApiError, ApiResult};

/// Acknowledge alert `id`. Repeating the call is a no-op that returns the
/// original acknowledgement time and leaves the loop untouched.
pub fn acknowledge(
    store: &mut MetricStore,
    tracker: &LoopTracker,
    id: i64,
    now: DateTime<Utc>,
) -> ApiResult<Alert> {
    let event = NewEvent {
        phase: Phase::Learn,
        message: format!("Alert {id} acknowledged"),
        metadata: json!({ "alertId": id }),
    };
    let (alert, changed) = store
        .acknowledge(id, &event, now)?
        .ok_or_else(|| ApiError::NotFound(format!("alert {id}")))?;

    if changed {
        tracker.mark_at(Phase::Learn, now);
        tracing::info!(alert_id = id, code = %alert.code, "alert acknowledged");
    } else {
        tracing::debug!(alert_id = id, "alert already acknowledged");
    }
    Ok(alert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityInput;
    use chrono::Duration;
    use radiance::{NewAlert, Severity};

    fn store_with_alert() -> (MetricStore, i64) {
        let mut store = MetricStore::open_in_memory().unwrap();
        let now = Utc::now();
        let seed = NewEvent {
            phase: Phase::Sense,
            message: "seed".into(),
            metadata: json!({}),
        };
        let entity = EntityInput {
            code: "E1".into(),
            name: "E1".into(),
            region: "east".into(),
            source: String::new(),
        };
        store.ingest(&[entity], &[], &seed, now).unwrap();
        let entity_id = store.entities().unwrap()[0].id;
        let alert = NewAlert {
            entity_id,
            code: "E1".into(),
            severity: Severity::High,
            message: Severity::High.message().into(),
            detected_at: now,
        };
        let reason = NewEvent {
            phase: Phase::Reason,
            message: "seed".into(),
            metadata: json!({}),
        };
        let ids = store.record_scoring(&[alert], &reason, now).unwrap();
        (store, ids[0])
    }

    #[test]
    fn test_acknowledge_once() {
        let (mut store, id) = store_with_alert();
        let tracker = LoopTracker::new();
        let first = Utc::now();

        let alert = acknowledge(&mut store, &tracker, id, first).unwrap();
        assert!(alert.acknowledged_at.is_some());
        assert_eq!(tracker.snapshot().last_learn, Some(first));
        assert_eq!(store.count_events(Phase::Learn).unwrap(), 1);

        let later = first + Duration::minutes(5);
        let again = acknowledge(&mut store, &tracker, id, later).unwrap();
        assert_eq!(again.acknowledged_at, alert.acknowledged_at);
        assert_eq!(tracker.snapshot().last_learn, Some(first));
        assert_eq!(store.count_events(Phase::Learn).unwrap(), 1);
    }

    #[test]
    fn test_unknown_alert() {
        let (mut store, id) = store_with_alert();
        let tracker = LoopTracker::new();

        let err = acknowledge(&mut store, &tracker, id + 100, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(tracker.snapshot().last_learn.is_none());
        assert_eq!(store.count_events(Phase::Learn).unwrap(), 0);
    }
}
