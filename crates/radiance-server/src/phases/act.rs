//! Act phase: hand unsent alerts to a notifier and stamp the ones delivered.

use chrono::{DateTime, Utc};
use serde_json::json;

use radiance::{Alert, LoopTracker, NewEvent, Phase};

use crate::store::MetricStore;
use crate::types::{ApiResult, DispatchResponse};

/// Upper bound on alerts handled per dispatch.
pub const DISPATCH_BATCH: usize = 500;

/// Delivery channel for alerts.
pub trait Notifier: Send + Sync {
    fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Writes each alert to the log. The default channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        tracing::warn!(
            alert_id = alert.id,
            code = %alert.code,
            severity = alert.severity.level(),
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// Deliver pending alerts. A failed delivery leaves that alert unsent so the
/// next dispatch retries it.
pub fn run(
    store: &mut MetricStore,
    tracker: &LoopTracker,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> ApiResult<DispatchResponse> {
    let pending = store.unsent_alerts(DISPATCH_BATCH)?;

    let mut delivered = Vec::with_capacity(pending.len());
    let mut failed = 0;
    for alert in &pending {
        match notifier.deliver(alert) {
            Ok(()) => delivered.push(alert.id),
            Err(e) => {
                failed += 1;
                tracing::warn!(alert_id = alert.id, error = %e, "alert delivery failed");
            }
        }
    }

    let event = NewEvent {
        phase: Phase::Act,
        message: format!("Dispatched {} alerts", delivered.len()),
        metadata: json!({
            "alertsSent": delivered.len(),
            "alertsFailed": failed,
        }),
    };
    let sent = store.mark_sent(&delivered, &event, now)?;
    tracker.mark_at(Phase::Act, now);

    tracing::info!(sent, failed, "dispatch complete");

    Ok(DispatchResponse {
        ok: true,
        alerts_sent: sent,
        alerts_failed: failed,
    })
}
