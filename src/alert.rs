use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::Sample;

/// Minimal alerting state: when the last alert notification went out.
/// In-memory only; a restart resets it, which is acceptable because the
/// restart itself produces an exit notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertState {
    pub last_alert_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Alert,
    NoAlert,
}

/// Decide whether a sample warrants a notification. Pure function of its
/// inputs.
///
/// An absent latency never alerts, and the trigger is strictly greater-than:
/// a sample exactly at the threshold stays quiet. Without a cooldown every
/// qualifying sample re-alerts, so a sustained breach produces one
/// notification per tick. Operators who want throttling opt in via
/// `realert_cooldown`.
pub fn evaluate(
    sample: &Sample,
    threshold_ms: f64,
    cooldown: Option<Duration>,
    state: &AlertState,
    now: DateTime<Utc>,
) -> Verdict {
    let Some(latency) = sample.latency_ms else {
        return Verdict::NoAlert;
    };

    if latency <= threshold_ms {
        return Verdict::NoAlert;
    }

    if let (Some(cooldown), Some(last)) = (cooldown, state.last_alert_sent_at) {
        let elapsed = now.signed_duration_since(last);
        let min_gap =
            chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::MAX);
        if elapsed < min_gap {
            return Verdict::NoAlert;
        }
    }

    Verdict::Alert
}
