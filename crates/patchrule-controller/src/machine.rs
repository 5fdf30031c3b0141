//! Condition State Machine for the `Active` condition.
//!
//! The machine keeps no state of its own: the previously recorded `Active`
//! condition is its only memory, so a cycle is a pure function of
//! `(evaluation, grace period, previous condition, now)`.
//!
//! ```text
//! Inactive ──samples, for > 0──► Pending ──for elapsed──► Active
//!    │                                                      ▲
//!    └─────────────────samples, for == 0────────────────────┘
//!
//! any state ──no samples or evaluation failure──► Inactive
//! ```
//!
//! With a grace period, an `Active` rule that keeps its signal goes back to
//! `Pending` on the next cycle and must wait out the period again.

use std::time::Duration;

use patchrule_api::{Condition, ConditionStatus, ConditionType, Reason};
use patchrule_query::QueryError;

use crate::evaluator::{EvaluationOutcome, failure_reason};

pub const MSG_FOUND_SAMPLES: &str = "Found query samples";
pub const MSG_NO_SAMPLES: &str = "Query did not return samples";

/// How the recorded `Active` condition changes this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum NextCondition {
    /// Set the condition; the transition time only moves if the status flips.
    Update(Condition),
    /// Overwrite the condition, restarting its transition time.
    Restart(Condition),
    /// Leave the recorded condition exactly as it is.
    Unchanged,
}

/// Outcome of one step of the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveDecision {
    pub next: NextCondition,
    pub apply_patches: bool,
}

/// Compute the next `Active` condition and whether patches apply this cycle.
pub fn next_active_condition(
    evaluation: &Result<EvaluationOutcome, QueryError>,
    for_duration: Duration,
    previous: Option<&Condition>,
    now: u64,
) -> ActiveDecision {
    let active = |status, reason, message: String| {
        Condition::new(ConditionType::Active, status, reason, message, now)
    };

    let outcome = match evaluation {
        Err(e) => {
            return ActiveDecision {
                next: NextCondition::Update(active(
                    ConditionStatus::False,
                    failure_reason(e),
                    e.to_string(),
                )),
                apply_patches: false,
            };
        }
        Ok(outcome) => outcome,
    };

    if !outcome.has_samples {
        return ActiveDecision {
            next: NextCondition::Update(active(
                ConditionStatus::False,
                Reason::NoSamples,
                MSG_NO_SAMPLES.to_string(),
            )),
            apply_patches: false,
        };
    }

    let pending_since = previous
        .filter(|c| c.reason == Reason::Pending)
        .map(|c| c.last_transition_time);

    match pending_since {
        None if !for_duration.is_zero() => ActiveDecision {
            next: NextCondition::Restart(active(
                ConditionStatus::True,
                Reason::Pending,
                MSG_FOUND_SAMPLES.to_string(),
            )),
            apply_patches: false,
        },
        Some(since) if !for_duration.is_zero() && since.saturating_add(whole_secs(for_duration)) > now => {
            ActiveDecision {
                next: NextCondition::Unchanged,
                apply_patches: false,
            }
        }
        _ => ActiveDecision {
            next: NextCondition::Update(active(
                ConditionStatus::True,
                Reason::Active,
                MSG_FOUND_SAMPLES.to_string(),
            )),
            apply_patches: true,
        },
    }
}

/// Seconds in `d`, rounding any fraction up so a grace period never
/// ends early.
fn whole_secs(d: Duration) -> u64 {
    d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0))
}
