//! Status conditions reported on the operator resource
//!
//! Conditions are keyed by their `type`. Setting a condition replaces any previous
//! condition of the same type (last writer wins), but keeps the previous
//! `last_transition_time` when the status did not change, so that re-running an
//! unchanged reconcile produces a byte-identical status.
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The tri-state status of a condition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The controller could not determine the condition
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        })
    }
}

impl From<bool> for ConditionStatus {
    fn from(b: bool) -> Self {
        if b {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A single observation about the managed component
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    /// Unique key of the condition, e.g. `APIServerDeploymentAvailable`
    #[serde(rename = "type")]
    pub type_: String,
    /// Whether the condition holds
    pub status: ConditionStatus,
    /// Machine readable CamelCase reason for the last transition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human readable details
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// When `status` last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Timestamp>,
}

impl OperatorCondition {
    /// Creates a condition of `type_` with `status` and no reason or message
    pub fn new(type_: impl Into<String>, status: impl Into<ConditionStatus>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            ..Self::default()
        }
    }

    /// Sets the reason
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Sets the message
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Inserts or replaces the condition with the same type as `new`
///
/// `last_transition_time` is carried over from the existing condition when the status is
/// unchanged, and set to now otherwise.
pub fn set_condition(conditions: &mut Vec<OperatorCondition>, mut new: OperatorCondition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time;
            } else {
                new.last_transition_time = Some(Timestamp::now());
            }
            *existing = new;
        }
        None => {
            new.last_transition_time = Some(Timestamp::now());
            conditions.push(new);
        }
    }
}

/// Removes the condition of `type_`, if present
pub fn remove_condition(conditions: &mut Vec<OperatorCondition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

/// Looks up the condition of `type_`
pub fn find_condition<'a>(conditions: &'a [OperatorCondition], type_: &str) -> Option<&'a OperatorCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether the condition of `type_` is present and `True`
pub fn is_condition_true(conditions: &[OperatorCondition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Whether the condition of `type_` is present and `False`
pub fn is_condition_false(conditions: &[OperatorCondition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::False)
}
