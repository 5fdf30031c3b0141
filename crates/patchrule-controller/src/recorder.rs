//! Condition Recorder — merges a cycle's conditions into the rule status.

use patchrule_api::{Condition, PatchRuleStatus, reset_condition, set_condition};

use crate::machine::NextCondition;

/// Record the `Active` outcome. `generation` becomes the condition's
/// `observedGeneration`; an unchanged condition keeps its old one.
pub fn record_active(status: &mut PatchRuleStatus, next: NextCondition, generation: i64) {
    match next {
        NextCondition::Update(mut condition) => {
            condition.observed_generation = generation;
            set_condition(&mut status.conditions, condition);
        }
        NextCondition::Restart(mut condition) => {
            condition.observed_generation = generation;
            reset_condition(&mut status.conditions, condition);
        }
        NextCondition::Unchanged => {}
    }
}

/// Record the `PatchApplied` outcome.
pub fn record_patch(status: &mut PatchRuleStatus, mut condition: Condition, generation: i64) {
    condition.observed_generation = generation;
    set_condition(&mut status.conditions, condition);
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchrule_api::{ConditionStatus, ConditionType, Reason, find_condition};

    fn active(status: ConditionStatus, reason: Reason, at: u64) -> Condition {
        Condition::new(ConditionType::Active, status, reason, "", at)
    }

    #[test]
    fn update_stamps_generation_and_keeps_transition_time() {
        let mut status = PatchRuleStatus::default();
        record_active(
            &mut status,
            NextCondition::Update(active(ConditionStatus::True, Reason::Active, 10)),
            3,
        );
        record_active(
            &mut status,
            NextCondition::Update(active(ConditionStatus::True, Reason::Active, 20)),
            4,
        );

        let c = find_condition(&status.conditions, ConditionType::Active).unwrap();
        assert_eq!(c.observed_generation, 4);
        assert_eq!(c.last_transition_time, 10);
    }

    #[test]
    fn restart_moves_transition_time() {
        let mut status = PatchRuleStatus::default();
        record_active(
            &mut status,
            NextCondition::Update(active(ConditionStatus::True, Reason::Active, 10)),
            1,
        );
        record_active(
            &mut status,
            NextCondition::Restart(active(ConditionStatus::True, Reason::Pending, 30)),
            1,
        );

        let c = find_condition(&status.conditions, ConditionType::Active).unwrap();
        assert_eq!(c.reason, Reason::Pending);
        assert_eq!(c.last_transition_time, 30);
    }

    #[test]
    fn unchanged_leaves_status_alone() {
        let mut status = PatchRuleStatus::default();
        record_active(
            &mut status,
            NextCondition::Restart(active(ConditionStatus::True, Reason::Pending, 30)),
            1,
        );
        let before = status.clone();
        record_active(&mut status, NextCondition::Unchanged, 2);
        assert_eq!(status, before);
    }

    #[test]
    fn patch_condition_sits_beside_active() {
        let mut status = PatchRuleStatus::default();
        record_active(
            &mut status,
            NextCondition::Update(active(ConditionStatus::True, Reason::Active, 10)),
            1,
        );
        record_patch(
            &mut status,
            Condition::new(
                ConditionType::PatchApplied,
                ConditionStatus::True,
                Reason::Applied,
                "",
                10,
            ),
            1,
        );
        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[1].observed_generation, 1);
    }
}
