//! patchrule-api — schema for the `PrometheusPatchRule` resource.
//!
//! A rule binds a metrics expression, a grace period and an ordered set of
//! JSON 6902 patch groups. The controller reads the spec every cycle and
//! records two conditions (`Active` and `PatchApplied`) on the status.
//!
//! This crate holds only types and pure helpers; the store, query client
//! and controller crates build on it.

pub mod condition;
pub mod duration;
pub mod labels;
pub mod types;

pub use condition::{
    Condition, ConditionStatus, ConditionType, Reason, find_condition, reset_condition,
    set_condition,
};
pub use labels::{LabelSelector, LabelSelectorError};
pub use types::*;
