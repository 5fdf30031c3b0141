//! Reconciler — runs one evaluation-and-patch cycle for a rule.

use std::sync::Arc;
use std::time::Duration;

use patchrule_api::{ConditionType, PatchRule, find_condition};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::applier::apply_all;
use crate::clock::Clock;
use crate::evaluator::{evaluate, failure_reason};
use crate::machine::next_active_condition;
use crate::metrics::ReconcileMetrics;
use crate::ports::{QueryEngine, ResourceStore, RuleStore, StoreError};
use crate::recorder::{record_active, record_patch};

/// Field manager used when none is configured.
pub const DEFAULT_FIELD_MANAGER: &str = "patchrule-controller";

/// What the scheduler should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Run the rule again after `after`.
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    /// Only run the rule again when it changes.
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// A cycle that could not be completed and should be retried.
///
/// Evaluation and patch failures are not errors here; they end up in the
/// rule's conditions.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read rule {key}: {source}")]
    Read { key: String, source: StoreError },

    #[error("failed to update status of rule {key}: {source}")]
    Status { key: String, source: StoreError },
}

impl ReconcileError {
    /// Whether the failure came from a stale status write.
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::Read { source, .. } | ReconcileError::Status { source, .. } => {
                source.is_conflict()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Identity recorded on every patched resource.
    pub field_manager: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

/// Runs reconcile cycles against a query engine and a store.
pub struct Reconciler<Q, S> {
    query: Q,
    store: S,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    metrics: Arc<ReconcileMetrics>,
}

impl<Q, S> Reconciler<Q, S>
where
    Q: QueryEngine,
    S: ResourceStore + RuleStore,
{
    pub fn new(query: Q, store: S, clock: Arc<dyn Clock>, config: ReconcilerConfig) -> Self {
        Self {
            query,
            store,
            clock,
            config,
            metrics: Arc::new(ReconcileMetrics::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> Arc<ReconcileMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Reconcile the stored rule `namespace/name`. A rule that no longer
    /// exists is a no-op.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ReconcileError> {
        let key = format!("{namespace}/{name}");
        let result = match self.reload(&key, namespace, name).await {
            Ok(Some(rule)) => self.reconcile_rule(rule).await,
            Ok(None) => {
                debug!(rule = %key, "rule is gone, nothing to do");
                Ok(Action::await_change())
            }
            Err(e) => Err(e),
        };
        let conflict = result.as_ref().is_err_and(ReconcileError::is_conflict);
        self.metrics.record_cycle(result.is_ok(), conflict);
        result
    }

    async fn reload(
        &self,
        key: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PatchRule>, ReconcileError> {
        self.store
            .get_rule(namespace, name)
            .await
            .map_err(|source| ReconcileError::Read {
                key: key.to_string(),
                source,
            })
    }

    /// Run one cycle for `rule` and persist its conditions.
    pub async fn reconcile_rule(&self, mut rule: PatchRule) -> Result<Action, ReconcileError> {
        let key = rule.key();
        if rule.spec.suspended {
            debug!(rule = %key, "rule suspended, skipping");
            return Ok(Action::await_change());
        }

        let now = self.clock.now();
        let generation = rule.metadata.generation;

        let evaluation = evaluate(
            &self.query,
            &key,
            &rule.spec.query_address,
            &rule.spec.expression,
            now,
        )
        .await;
        if let Err(e) = &evaluation {
            let reason = failure_reason(e);
            warn!(rule = %key, %reason, error = %e, "query evaluation failed");
            self.metrics.record_evaluation_failure(reason);
        }

        let previous = find_condition(&rule.status.conditions, ConditionType::Active).cloned();
        let decision = next_active_condition(
            &evaluation,
            rule.spec.for_duration,
            previous.as_ref(),
            now,
        );
        record_active(&mut rule.status, decision.next, generation);

        if decision.apply_patches {
            let pass = apply_all(
                &self.store,
                &rule.spec.patch_groups,
                &self.config.field_manager,
                now,
            )
            .await;
            info!(rule = %key, reason = %pass.condition.reason, "rule active, patches processed");
            self.metrics
                .record_patch_result(pass.condition.reason, pass.patched.len());
            let patched_itself = pass.touched(&rule.resource_ref());
            record_patch(&mut rule.status, pass.condition, generation);

            // The rule's own write bumped its resourceVersion; carry this
            // cycle's conditions over to the stored copy.
            if patched_itself {
                let latest = self
                    .reload(&key, &rule.metadata.namespace, &rule.metadata.name)
                    .await?;
                match latest {
                    Some(mut latest) => {
                        debug!(
                            rule = %key,
                            generation = latest.metadata.generation,
                            "rule patched itself, status rebased"
                        );
                        latest.status = rule.status;
                        rule = latest;
                    }
                    None => {
                        debug!(rule = %key, "rule removed by its own patch");
                        return Ok(Action::await_change());
                    }
                }
            }
        }

        self.store
            .patch_status(&rule)
            .await
            .map_err(|source| ReconcileError::Status {
                key: key.clone(),
                source,
            })?;

        let interval = rule.spec.interval;
        debug!(rule = %key, interval_secs = interval.as_secs(), "requeue next reconcile");
        if interval.is_zero() {
            Ok(Action::await_change())
        } else {
            Ok(Action::requeue(interval))
        }
    }
}
