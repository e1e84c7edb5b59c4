//! Spec and status shared by operator resources
use crate::{conditions::OperatorCondition, generation::GenerationStatus};
use serde::{Deserialize, Serialize};

/// Whether and how the operator should manage its operand
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagementState {
    /// The operator reconciles the operand
    #[default]
    Managed,
    /// The operator leaves the operand alone
    Unmanaged,
    /// The operand should be removed; the operator stops reconciling it
    Removed,
}

/// Verbosity requested for the operand or the operator itself
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Default verbosity
    #[default]
    Normal,
    /// More verbose, suitable for debugging
    Debug,
    /// Request level tracing
    Trace,
    /// Everything
    TraceAll,
}

impl LogLevel {
    /// The klog style `-v` verbosity this level maps to
    pub fn verbosity(self) -> u8 {
        match self {
            LogLevel::Normal => 2,
            LogLevel::Debug => 4,
            LogLevel::Trace => 6,
            LogLevel::TraceAll => 8,
        }
    }
}

/// Desired state of an operator resource
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpec {
    /// Whether the operand is managed
    #[serde(default)]
    pub management_state: ManagementState,
    /// Verbosity of the operand
    #[serde(default)]
    pub log_level: LogLevel,
    /// Verbosity of the operator
    #[serde(default)]
    pub operator_log_level: LogLevel,
    /// The merged desired-state document written by the config observer
    #[serde(default)]
    pub observed_config: serde_json::Value,
    /// Config overrides layered on top of the observed config, not validated
    #[serde(default)]
    pub unsupported_config_overrides: serde_json::Value,
}

/// Observed state of an operator resource
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    /// The operator resource generation the status was computed from
    #[serde(default)]
    pub observed_generation: i64,
    /// Current conditions, keyed by type
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,
    /// Number of ready replicas of the operand
    #[serde(default)]
    pub ready_replicas: i32,
    /// Generations of controlled objects recorded at their last successful apply
    #[serde(default)]
    pub generations: Vec<GenerationStatus>,
    /// The newest operand revision rolled out, `0` before the first rollout
    ///
    /// Every forced rollout cuts the next revision; revisioned secrets are snapshots taken for it.
    #[serde(default)]
    pub latest_available_revision: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_maps_to_verbosity() {
        assert_eq!(LogLevel::Normal.verbosity(), 2);
        assert_eq!(LogLevel::Debug.verbosity(), 4);
        assert_eq!(LogLevel::Trace.verbosity(), 6);
        assert_eq!(LogLevel::TraceAll.verbosity(), 8);
    }

    #[test]
    fn spec_defaults_when_fields_are_missing() {
        let spec: OperatorSpec = serde_json::from_str(r#"{"logLevel":"Debug"}"#).unwrap();
        assert_eq!(spec.management_state, ManagementState::Managed);
        assert_eq!(spec.log_level, LogLevel::Debug);
        assert!(spec.observed_config.is_null());
    }

    #[test]
    fn status_reads_the_latest_revision() {
        let status: OperatorStatus =
            serde_json::from_str(r#"{"observedGeneration":3,"latestAvailableRevision":7}"#).unwrap();
        assert_eq!(status.latest_available_revision, 7);
        let empty: OperatorStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.latest_available_revision, 0);
    }
}
