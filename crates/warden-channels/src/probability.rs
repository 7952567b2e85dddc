//! Burst / cooldown intervention probability model.

use chrono::{DateTime, Utc};
use warden_memory::types::{InterventionHistory, InterventionKind};

pub const BURST_FLOOR: usize = 3;
pub const BURST_CEILING: usize = 7;
pub const BURST_GAP_MINUTES: i64 = 5;
pub const BURST_WINDOW_THRESHOLD: f64 = 0.35;
pub const DEFAULT_INTERVENTION_THRESHOLD: f64 = 0.3;

/// Count of intervention events in the last `minutes` from `history`,
/// pruned to the last 2 hours by the caller before this is invoked.
fn count_recent(history: &InterventionHistory, now: DateTime<Utc>, minutes: i64) -> usize {
    history
        .events
        .iter()
        .filter(|e| now.signed_duration_since(e.at).num_minutes() < minutes)
        .count()
}

fn minutes_since_last(history: &InterventionHistory, now: DateTime<Utc>) -> Option<i64> {
    history
        .events
        .iter()
        .map(|e| now.signed_duration_since(e.at).num_minutes())
        .min()
}

/// Compute the raw intervention probability for an item of the given
/// `importance` (1-10), given the channel's pruned history.
pub fn compute_probability(history: &InterventionHistory, importance: u8, now: DateTime<Utc>) -> f64 {
    let recent_5min = count_recent(history, now, 5);

    if recent_5min < BURST_FLOOR {
        return 0.75_f64.max(0.75);
    }
    if recent_5min >= BURST_CEILING {
        return 0.0;
    }

    let elapsed = minutes_since_last(history, now).unwrap_or(120) as f64;
    let importance_factor = importance as f64 / 10.0;
    // Sigmoid on (elapsed - recency penalty), scaled by importance: more
    // recent activity (smaller elapsed) pulls the argument negative and
    // suppresses the probability; longer elapsed and higher importance
    // push it toward 1.
    let recency_penalty = (recent_5min as f64) * 2.0;
    let x = (elapsed - recency_penalty) / 10.0 + importance_factor * 2.0 - 1.0;
    let sigmoid = 1.0 / (1.0 + (-x).exp());
    sigmoid.clamp(0.0, 1.0)
}

/// Decide whether to fire an intervene action, per the mode-selection rule:
/// inside a 5-minute burst window the probability itself is the judgment
/// (threshold 0.35); outside it, `(importance/10) * probability` is
/// compared against `intervention_threshold` (default 0.3).
pub fn should_intervene(
    history: &InterventionHistory,
    importance: u8,
    now: DateTime<Utc>,
    intervention_threshold: f64,
) -> bool {
    let probability = compute_probability(history, importance, now);
    match minutes_since_last(history, now) {
        Some(mins) if mins <= BURST_GAP_MINUTES => probability >= BURST_WINDOW_THRESHOLD,
        _ => (importance as f64 / 10.0) * probability >= intervention_threshold,
    }
}

pub fn record_intervention(history: &mut InterventionHistory, at: DateTime<Utc>, kind: InterventionKind) {
    history.events.push(warden_memory::types::InterventionEvent { at, kind });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_history() -> InterventionHistory {
        InterventionHistory::default()
    }

    #[test]
    fn burst_guarantee_zone_allows_with_high_baseline() {
        let history = empty_history();
        let p = compute_probability(&history, 5, Utc::now());
        assert!(p >= 0.75);
    }

    #[test]
    fn hard_ceiling_blocks_after_seven_recent() {
        let now = Utc::now();
        let mut history = empty_history();
        for _ in 0..7 {
            record_intervention(&mut history, now, InterventionKind::React);
        }
        assert_eq!(compute_probability(&history, 10, now), 0.0);
    }

    #[test]
    fn higher_importance_never_lowers_probability() {
        let now = Utc::now();
        let mut history = empty_history();
        for _ in 0..4 {
            record_intervention(&mut history, now - chrono::Duration::minutes(1), InterventionKind::React);
        }
        let low = compute_probability(&history, 2, now);
        let high = compute_probability(&history, 9, now);
        assert!(high >= low);
    }
}
