//! Reconciliation planner.
//!
//! Computes the sorted change list between a stack's desired instances and
//! the containers observed on the runtime, plus the freshness token an
//! apply must present. The planner never mutates state.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// A change action; variant order defines plan ordering
/// (`remove` < `modify` < `add`)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Container exists on the runtime but no desired instance matches
    Remove,
    /// Desired instance is disabled but its container is running
    Modify,
    /// Desired instance is enabled but no container exists
    Add,
}

/// A single field delta on a `modify` change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    /// Previous value
    pub old: serde_json::Value,
    /// Desired value
    pub new: serde_json::Value,
    /// Where the change came from
    pub source: String,
}

/// One planned change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// What to do
    pub action: ChangeAction,
    /// Instance id, when the change maps to a desired instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Container name the change targets
    pub container_name: String,
    /// Field deltas, present on `modify`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldDelta>>,
}

/// Desired state of one instance, as the planner sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredInstance {
    /// Instance id within the stack
    pub instance_id: String,
    /// Backing template name
    pub template_name: String,
    /// Derived container name
    pub container_name: String,
    /// Whether the instance should be running
    pub enabled: bool,
}

/// A complete plan for one stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackPlan {
    /// Sorted changes
    pub changes: Vec<Change>,
    /// Freshness token to present on apply
    pub token: String,
    /// When the plan was generated
    pub generated_at: DateTime<Utc>,
    /// Non-fatal notes (unreachable runtime, dropped dependencies)
    pub warnings: Vec<String>,
}

/// Diff desired instances against observed container names.
///
/// The result is sorted by action (`remove` < `modify` < `add`), then by
/// container name.
#[must_use]
pub fn plan(desired: &[DesiredInstance], observed: &[String]) -> Vec<Change> {
    let observed_set: BTreeSet<&str> = observed.iter().map(String::as_str).collect();
    let desired_names: BTreeSet<&str> =
        desired.iter().map(|d| d.container_name.as_str()).collect();

    let mut changes = Vec::new();

    for inst in desired {
        let running = observed_set.contains(inst.container_name.as_str());
        match (inst.enabled, running) {
            (true, false) => changes.push(Change {
                action: ChangeAction::Add,
                instance_id: Some(inst.instance_id.clone()),
                container_name: inst.container_name.clone(),
                fields: None,
            }),
            (false, true) => {
                let mut fields = BTreeMap::new();
                fields.insert(
                    "enabled".to_string(),
                    FieldDelta {
                        old: serde_json::Value::Bool(true),
                        new: serde_json::Value::Bool(false),
                        source: "user".to_string(),
                    },
                );
                changes.push(Change {
                    action: ChangeAction::Modify,
                    instance_id: Some(inst.instance_id.clone()),
                    container_name: inst.container_name.clone(),
                    fields: Some(fields),
                });
            }
            _ => {}
        }
    }

    for name in &observed_set {
        if !desired_names.contains(name) {
            changes.push(Change {
                action: ChangeAction::Remove,
                instance_id: None,
                container_name: (*name).to_string(),
                fields: None,
            });
        }
    }

    changes.sort_by(|a, b| {
        a.action
            .cmp(&b.action)
            .then_with(|| a.container_name.cmp(&b.container_name))
    });
    changes
}

/// Compute the plan token: a SHA-256 fingerprint over the stack's
/// `updated_at` followed by every instance's `updated_at`, sorted by
/// instance id, all rendered as RFC 3339 with nanoseconds.
#[must_use]
pub fn plan_token(
    stack_updated_at: DateTime<Utc>,
    instance_timestamps: &[(String, DateTime<Utc>)],
) -> String {
    let mut sorted: Vec<&(String, DateTime<Utc>)> = instance_timestamps.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    hasher.update(stack_updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true));
    for (_, ts) in sorted {
        hasher.update(ts.to_rfc3339_opts(SecondsFormat::Nanos, true));
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn desired(instance_id: &str, enabled: bool) -> DesiredInstance {
        DesiredInstance {
            instance_id: instance_id.to_string(),
            template_name: "nginx".to_string(),
            container_name: format!("web-{instance_id}"),
            enabled,
        }
    }

    #[test]
    fn test_enabled_unobserved_is_add() {
        let changes = plan(&[desired("app1", true)], &[]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Add);
        assert_eq!(changes[0].instance_id.as_deref(), Some("app1"));
        assert_eq!(changes[0].container_name, "web-app1");
        assert!(changes[0].fields.is_none());
    }

    #[test]
    fn test_disabled_observed_is_modify() {
        let changes = plan(&[desired("app1", false)], &["web-app1".to_string()]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Modify);
        let fields = changes[0].fields.as_ref().unwrap();
        let delta = fields.get("enabled").unwrap();
        assert_eq!(delta.old, serde_json::Value::Bool(true));
        assert_eq!(delta.new, serde_json::Value::Bool(false));
        assert_eq!(delta.source, "user");
    }

    #[test]
    fn test_enabled_observed_is_noop() {
        assert!(plan(&[desired("app1", true)], &["web-app1".to_string()]).is_empty());
    }

    #[test]
    fn test_disabled_unobserved_is_noop() {
        assert!(plan(&[desired("app1", false)], &[]).is_empty());
    }

    #[test]
    fn test_orphan_container_is_remove() {
        let changes = plan(&[desired("app1", true)], &["web-ghost".to_string()]);
        // app1 is an add; ghost is a remove; removes sort first
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].action, ChangeAction::Remove);
        assert_eq!(changes[0].container_name, "web-ghost");
        assert!(changes[0].instance_id.is_none());
        assert_eq!(changes[1].action, ChangeAction::Add);
    }

    #[test]
    fn test_sort_order_action_then_name() {
        let desired_set = vec![
            desired("bbb", true),
            desired("aaa", true),
            desired("off", false),
        ];
        let observed = vec!["web-off".to_string(), "web-zzz".to_string()];
        let changes = plan(&desired_set, &observed);
        let summary: Vec<(ChangeAction, &str)> = changes
            .iter()
            .map(|c| (c.action, c.container_name.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChangeAction::Remove, "web-zzz"),
                (ChangeAction::Modify, "web-off"),
                (ChangeAction::Add, "web-aaa"),
                (ChangeAction::Add, "web-bbb"),
            ]
        );
    }

    #[test]
    fn test_action_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChangeAction::Add).unwrap(),
            "\"add\""
        );
        assert_eq!(
            serde_json::to_string(&ChangeAction::Remove).unwrap(),
            "\"remove\""
        );
    }

    #[test]
    fn test_token_stable_for_unchanged_input() {
        let stack_ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let instances = vec![
            ("app1".to_string(), stack_ts),
            ("app2".to_string(), stack_ts),
        ];
        let a = plan_token(stack_ts, &instances);
        let b = plan_token(stack_ts, &instances);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_token_insensitive_to_input_order() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let ts2 = Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap();
        let forward = vec![("app1".to_string(), ts), ("app2".to_string(), ts2)];
        let backward = vec![("app2".to_string(), ts2), ("app1".to_string(), ts)];
        assert_eq!(plan_token(ts, &forward), plan_token(ts, &backward));
    }

    #[test]
    fn test_token_changes_when_instance_changes() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let later = ts + chrono::Duration::nanoseconds(1);
        let before = plan_token(ts, &[("app1".to_string(), ts)]);
        let after = plan_token(ts, &[("app1".to_string(), later)]);
        assert_ne!(before, after);
    }

    #[test]
    fn test_token_changes_when_stack_changes() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let later = ts + chrono::Duration::seconds(1);
        let instances = vec![("app1".to_string(), ts)];
        assert_ne!(plan_token(ts, &instances), plan_token(later, &instances));
    }
}
