//! patchrule-controller — evaluation-and-patch core of the rule controller.
//!
//! One reconcile cycle runs, in order:
//!
//! 1. [`evaluator`] — run the rule's query and classify it as signal / no signal.
//! 2. [`machine`] — derive the next `Active` condition from that signal, the
//!    previously recorded condition and the grace period, and decide whether
//!    patches apply this cycle.
//! 3. [`resolver`] — expand each patch group's selector into resources.
//! 4. [`applier`] — apply the patch groups in order; the first failure stops
//!    the cycle.
//! 5. [`recorder`] — merge both conditions into the rule status, which the
//!    [`reconciler`] persists with an optimistic precondition.
//!
//! [`controller`] drives cycles on a requeue timer, standing in for a
//! watch-based scheduler.
//!
//! # Forward-only patches
//!
//! Patches are never reverted. When a rule's signal goes away the
//! `Active` condition drops to `False`, but resources patched while it was
//! active keep their patched state. Rules that need the opposite change
//! must be written as a separate rule with the inverse expression.
//!
//! Collaborators sit behind the traits in [`ports`] so every step can be
//! exercised without a network or a real clock.

pub mod applier;
pub mod clock;
pub mod controller;
pub mod evaluator;
pub mod machine;
pub mod metrics;
pub mod ports;
pub mod recorder;
pub mod reconciler;
pub mod resolver;

#[cfg(test)]
pub(crate) mod fakes;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{Controller, ControllerConfig};
pub use evaluator::EvaluationOutcome;
pub use metrics::{MetricsSnapshot, ReconcileMetrics, render_prometheus};
pub use ports::{PrometheusEngine, QueryEngine, ResourceStore, RuleStore, StoreError};
pub use reconciler::{
    Action, DEFAULT_FIELD_MANAGER, ReconcileError, Reconciler, ReconcilerConfig,
};
