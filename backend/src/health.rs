//! Attention classification and status aggregation.
//!
//! Both functions are pure over read-only projections; the scheduler and the
//! status upsert feed them what they need.

use std::time::Duration;

use crate::models::{
    Condition, ConditionStatus, ClusterStatus, ControllerStatus, HealthView, phase,
};

/// New clusters stay on the short interval for this long after creation.
pub const NEW_CLUSTER_WINDOW_MS: i64 = 2 * 60 * 60 * 1000;

/// Condition type that drives phase derivation.
pub const READY_CONDITION: &str = "Ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionClass {
    NeedsAttention,
    Stable,
}

/// Reconcile intervals per attention class, configuration-overridable.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileIntervals {
    pub attention: Duration,
    pub stable: Duration,
}

impl Default for ReconcileIntervals {
    fn default() -> Self {
        Self {
            attention: Duration::from_secs(30),
            stable: Duration::from_secs(300),
        }
    }
}

/// Classify a cluster. NeedsAttention when it is new, unhealthy, unobserved,
/// or ahead of what any controller has seen; Stable otherwise.
pub fn classify(now_ms: i64, view: &HealthView) -> AttentionClass {
    if now_ms - view.created_at < NEW_CLUSTER_WINDOW_MS {
        return AttentionClass::NeedsAttention;
    }
    if let Some(ref p) = view.phase
        && matches!(p.as_str(), phase::ERROR | phase::FAILED | phase::UNKNOWN)
    {
        return AttentionClass::NeedsAttention;
    }
    match view.max_observed_generation {
        None => AttentionClass::NeedsAttention,
        Some(observed) if view.generation > observed => AttentionClass::NeedsAttention,
        Some(_) => AttentionClass::Stable,
    }
}

pub fn interval_for(class: AttentionClass, intervals: &ReconcileIntervals) -> Duration {
    match class {
        AttentionClass::NeedsAttention => intervals.attention,
        AttentionClass::Stable => intervals.stable,
    }
}

/// Derive a cluster's aggregate status from its controllers' latest reports.
///
/// Phase: Failed when any controller reports Ready=False, Running when every
/// controller reports Ready=True, Unknown otherwise (a controller without a
/// Ready condition counts as indeterminate). No reports at all means the
/// cluster is still Pending.
///
/// Conditions: for each condition type, the report from the most recently
/// updated controller wins.
pub fn aggregate_status(reports: &[ControllerStatus]) -> ClusterStatus {
    if reports.is_empty() {
        return ClusterStatus {
            phase: phase::PENDING.to_string(),
            conditions: vec![],
        };
    }

    let mut any_false = false;
    let mut all_true = true;
    for report in reports {
        match ready_status(&report.conditions) {
            Some(ConditionStatus::True) => {}
            Some(ConditionStatus::False) => {
                any_false = true;
                all_true = false;
            }
            Some(ConditionStatus::Unknown) | None => {
                all_true = false;
            }
        }
    }
    let phase = if any_false {
        phase::FAILED
    } else if all_true {
        phase::RUNNING
    } else {
        phase::UNKNOWN
    };

    // Latest-writer-wins per condition type across controllers.
    let mut merged: Vec<(i64, Condition)> = Vec::new();
    for report in reports {
        for condition in &report.conditions {
            match merged
                .iter_mut()
                .find(|(_, c)| c.condition_type == condition.condition_type)
            {
                Some(entry) if entry.0 < report.updated_at => {
                    *entry = (report.updated_at, condition.clone());
                }
                Some(_) => {}
                None => merged.push((report.updated_at, condition.clone())),
            }
        }
    }
    let mut conditions: Vec<Condition> = merged.into_iter().map(|(_, c)| c).collect();
    conditions.sort_by(|a, b| a.condition_type.cmp(&b.condition_type));

    ClusterStatus {
        phase: phase.to_string(),
        conditions,
    }
}

fn ready_status(conditions: &[Condition]) -> Option<ConditionStatus> {
    conditions
        .iter()
        .find(|c| c.condition_type == READY_CONDITION)
        .map(|c| c.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn view(age_ms: i64, phase: Option<&str>, generation: i64, observed: Option<i64>) -> HealthView {
        let now = 10 * NEW_CLUSTER_WINDOW_MS;
        HealthView {
            created_at: now - age_ms,
            generation,
            phase: phase.map(|s| s.to_string()),
            max_observed_generation: observed,
        }
    }

    fn classify_at(view: &HealthView) -> AttentionClass {
        classify(10 * NEW_CLUSTER_WINDOW_MS, view)
    }

    #[test]
    fn young_cluster_needs_attention() {
        let v = view(NEW_CLUSTER_WINDOW_MS - 1, Some(phase::RUNNING), 1, Some(1));
        assert_eq!(classify_at(&v), AttentionClass::NeedsAttention);
    }

    #[test]
    fn settled_running_cluster_is_stable() {
        // Older than the window, healthy phase, controllers caught up.
        let v = view(NEW_CLUSTER_WINDOW_MS + 1, Some(phase::RUNNING), 3, Some(3));
        assert_eq!(classify_at(&v), AttentionClass::Stable);
    }

    #[test]
    fn unhealthy_phases_need_attention() {
        for p in [phase::ERROR, phase::FAILED, phase::UNKNOWN] {
            let v = view(NEW_CLUSTER_WINDOW_MS + 1, Some(p), 3, Some(3));
            assert_eq!(classify_at(&v), AttentionClass::NeedsAttention, "{p}");
        }
    }

    #[test]
    fn unobserved_cluster_needs_attention() {
        let v = view(NEW_CLUSTER_WINDOW_MS + 1, Some(phase::RUNNING), 1, None);
        assert_eq!(classify_at(&v), AttentionClass::NeedsAttention);
    }

    #[test]
    fn generation_ahead_of_controllers_needs_attention() {
        let v = view(NEW_CLUSTER_WINDOW_MS + 1, Some(phase::RUNNING), 3, Some(2));
        assert_eq!(classify_at(&v), AttentionClass::NeedsAttention);
    }

    #[test]
    fn intervals_follow_class() {
        let intervals = ReconcileIntervals::default();
        assert_eq!(
            interval_for(AttentionClass::NeedsAttention, &intervals),
            Duration::from_secs(30)
        );
        assert_eq!(
            interval_for(AttentionClass::Stable, &intervals),
            Duration::from_secs(300)
        );
    }

    fn report(name: &str, ready: Option<ConditionStatus>, updated_at: i64) -> ControllerStatus {
        let conditions = match ready {
            Some(status) => vec![Condition {
                condition_type: READY_CONDITION.into(),
                status,
                reason: None,
                message: None,
                last_transition_time: Some(updated_at),
            }],
            None => vec![],
        };
        ControllerStatus {
            cluster_id: Uuid::nil(),
            controller_name: name.into(),
            observed_generation: 1,
            conditions,
            metadata: None,
            updated_at,
        }
    }

    #[test]
    fn no_reports_means_pending() {
        let agg = aggregate_status(&[]);
        assert_eq!(agg.phase, phase::PENDING);
        assert!(agg.conditions.is_empty());
    }

    #[test]
    fn all_ready_means_running() {
        let agg = aggregate_status(&[
            report("a", Some(ConditionStatus::True), 10),
            report("b", Some(ConditionStatus::True), 20),
        ]);
        assert_eq!(agg.phase, phase::RUNNING);
    }

    #[test]
    fn any_not_ready_means_failed() {
        let agg = aggregate_status(&[
            report("a", Some(ConditionStatus::True), 10),
            report("b", Some(ConditionStatus::False), 20),
        ]);
        assert_eq!(agg.phase, phase::FAILED);
    }

    #[test]
    fn missing_ready_means_unknown() {
        let agg = aggregate_status(&[
            report("a", Some(ConditionStatus::True), 10),
            report("b", None, 20),
        ]);
        assert_eq!(agg.phase, phase::UNKNOWN);
    }

    #[test]
    fn latest_controller_wins_per_condition_type() {
        let agg = aggregate_status(&[
            report("a", Some(ConditionStatus::False), 30),
            report("b", Some(ConditionStatus::True), 20),
        ]);
        assert_eq!(agg.conditions.len(), 1);
        assert_eq!(agg.conditions[0].status, ConditionStatus::False);
    }
}
