//! Condition sets with a derived "happy" condition
//!
//! A [`ConditionSet`] names one happy condition (Ready) and the dependent
//! conditions it is computed from. The happy condition is never written
//! directly; every change to a dependent recomputes it:
//!
//! - False, carrying reason and message of the first False dependent
//! - otherwise Unknown, if any dependent is Unknown or missing
//! - otherwise True
//!
//! A condition's `lastTransitionTime` only moves when its status changes.

use chrono::Utc;
use tracing::warn;

use super::types::{Condition, ConditionStatus};

/// Aggregate condition, True when every dependent is True
pub const CONDITION_READY: &str = "Ready";

/// The manifest was applied without error
pub const CONDITION_INSTALL_SUCCEEDED: &str = "InstallSucceeded";

/// Every Deployment in the manifest reports Available
pub const CONDITION_DEPLOYMENTS_AVAILABLE: &str = "DeploymentsAvailable";

/// Conditions tracked on a KnativeServing instance
pub const SERVING_CONDITIONS: ConditionSet = ConditionSet::new(
    CONDITION_READY,
    &[CONDITION_INSTALL_SUCCEEDED, CONDITION_DEPLOYMENTS_AVAILABLE],
);

/// A happy condition and the dependents it aggregates
#[derive(Clone, Copy, Debug)]
pub struct ConditionSet {
    happy: &'static str,
    dependents: &'static [&'static str],
}

impl ConditionSet {
    /// Declare a condition set
    pub const fn new(happy: &'static str, dependents: &'static [&'static str]) -> Self {
        Self { happy, dependents }
    }

    /// The aggregate condition type
    pub fn happy(&self) -> &'static str {
        self.happy
    }

    /// Dependent condition types in evaluation order
    pub fn dependents(&self) -> &'static [&'static str] {
        self.dependents
    }

    /// Operate on a condition list through this set
    pub fn manage(self, conditions: &mut Vec<Condition>) -> ConditionSetView<'_> {
        ConditionSetView {
            set: self,
            conditions,
        }
    }
}

/// Mutable view of a condition list governed by a [`ConditionSet`]
pub struct ConditionSetView<'a> {
    set: ConditionSet,
    conditions: &'a mut Vec<Condition>,
}

impl ConditionSetView<'_> {
    /// Add every missing condition as Unknown. Existing conditions are kept.
    pub fn initialize(&mut self) {
        for dependent in self.set.dependents {
            if self.get(dependent).is_none() {
                self.conditions.push(Condition::new(
                    *dependent,
                    ConditionStatus::Unknown,
                    "",
                    "",
                ));
            }
        }
        self.recompute_happy();
    }

    /// Look up a condition by type
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// True when the happy condition is True
    pub fn is_happy(&self) -> bool {
        self.get(self.set.happy).is_some_and(Condition::is_true)
    }

    /// Mark a dependent True
    pub fn mark_true(&mut self, type_: &str) {
        self.set_dependent(type_, ConditionStatus::True, "", "");
    }

    /// Mark a dependent False with a reason
    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_dependent(type_, ConditionStatus::False, reason, message);
    }

    /// Mark a dependent Unknown with a reason
    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_dependent(type_, ConditionStatus::Unknown, reason, message);
    }

    fn set_dependent(&mut self, type_: &str, status: ConditionStatus, reason: &str, message: &str) {
        if type_ == self.set.happy {
            warn!(condition = type_, "refusing to set aggregate condition directly");
            return;
        }
        self.upsert(type_, status, reason, message);
        self.recompute_happy();
    }

    fn upsert(&mut self, type_: &str, status: ConditionStatus, reason: &str, message: &str) {
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = Utc::now();
                }
                existing.reason = reason.to_string();
                existing.message = message.to_string();
            }
            None => self
                .conditions
                .push(Condition::new(type_, status, reason, message)),
        }
    }

    fn recompute_happy(&mut self) {
        let mut unknown: Option<(String, String)> = None;
        let mut failed: Option<(String, String)> = None;

        for dependent in self.set.dependents {
            match self.get(dependent) {
                Some(c) if c.status == ConditionStatus::False => {
                    failed = Some((c.reason.clone(), c.message.clone()));
                    break;
                }
                Some(c) if c.status == ConditionStatus::True => {}
                Some(c) => {
                    unknown.get_or_insert_with(|| (c.reason.clone(), c.message.clone()));
                }
                None => {
                    unknown.get_or_insert_with(Default::default);
                }
            }
        }

        let happy = self.set.happy;
        match (failed, unknown) {
            (Some((reason, message)), _) => {
                self.upsert(happy, ConditionStatus::False, &reason, &message)
            }
            (None, Some((reason, message))) => {
                self.upsert(happy, ConditionStatus::Unknown, &reason, &message)
            }
            (None, None) => self.upsert(happy, ConditionStatus::True, "", ""),
        }
    }
}
