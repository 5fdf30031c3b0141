//! Patch Applier — applies a rule's patch groups in declaration order.
//!
//! The first failure, at any resource in any group, ends the pass. Resources
//! patched before it stay patched.

use patchrule_api::{
    Condition, ConditionStatus, ConditionType, PatchGroup, Reason, ResourceRef, Selector,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ports::{ResourceStore, StoreError};
use crate::resolver::{ResolveError, resolve};

pub const MSG_NO_PATCHES: &str = "No patches have been defined";

/// Why a patch group could not be applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A label selector resolved to no resources.
    #[error("no {resource} in namespace {namespace:?} match label selector {label_selector:?}")]
    NoTargets {
        resource: String,
        namespace: String,
        label_selector: String,
    },

    #[error("{resource}: {source}")]
    Apply {
        resource: ResourceRef,
        source: StoreError,
    },
}

/// Result of one pass over a rule's patch groups.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPass {
    /// The `PatchApplied` condition to record.
    pub condition: Condition,
    /// Every resource written, in order, including those patched before a
    /// failure.
    pub patched: Vec<ResourceRef>,
}

impl PatchPass {
    pub fn touched(&self, resource: &ResourceRef) -> bool {
        self.patched.contains(resource)
    }
}

/// Apply every group and report the resulting `PatchApplied` condition.
pub async fn apply_all<S: ResourceStore>(
    store: &S,
    groups: &[PatchGroup],
    field_manager: &str,
    now: u64,
) -> PatchPass {
    let patch_applied = |status, reason, message: String| {
        Condition::new(ConditionType::PatchApplied, status, reason, message, now)
    };

    let mut patched = Vec::new();
    if groups.is_empty() {
        return PatchPass {
            condition: patch_applied(
                ConditionStatus::False,
                Reason::NoPatchFound,
                MSG_NO_PATCHES.to_string(),
            ),
            patched,
        };
    }

    for (index, group) in groups.iter().enumerate() {
        if let Err(e) = apply_group(store, group, field_manager, now, &mut patched).await {
            warn!(group = index, patched = patched.len(), error = %e, "patch group failed");
            return PatchPass {
                condition: patch_applied(
                    ConditionStatus::False,
                    Reason::PatchApplyFailed,
                    format!("failed to apply patch: {e}"),
                ),
                patched,
            };
        }
    }

    info!(groups = groups.len(), patched = patched.len(), %field_manager, "patches applied");
    PatchPass {
        condition: patch_applied(ConditionStatus::True, Reason::Applied, String::new()),
        patched,
    }
}

/// Apply one group to each resource its selector resolves to, appending
/// every written resource to `patched`.
async fn apply_group<S: ResourceStore>(
    store: &S,
    group: &PatchGroup,
    field_manager: &str,
    now: u64,
    patched: &mut Vec<ResourceRef>,
) -> Result<(), PatchError> {
    let targets = resolve(store, &group.target).await?;
    if targets.is_empty() {
        return Err(no_targets(&group.target));
    }

    for resource in targets {
        store
            .patch(&resource, &group.patch, field_manager, now)
            .await
            .map_err(|source| PatchError::Apply {
                resource: resource.clone(),
                source,
            })?;
        debug!(%resource, ops = group.patch.len(), "resource patched");
        patched.push(resource);
    }
    Ok(())
}

fn no_targets(selector: &Selector) -> PatchError {
    PatchError::NoTargets {
        resource: selector.resource.clone(),
        namespace: selector.namespace.clone(),
        label_selector: selector.label_selector.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchrule_api::PatchOperation;
    use patchrule_state::StateStore;
    use serde_json::{Value, json};

    fn configmap(name: &str) -> ResourceRef {
        ResourceRef {
            group: String::new(),
            version: "v1".to_string(),
            resource: "configmaps".to_string(),
            namespace: "apps".to_string(),
            name: name.to_string(),
        }
    }

    fn seed(store: &StateStore, name: &str, tier: &str) {
        store
            .put_resource(
                &configmap(name),
                json!({"metadata": {"labels": {"tier": tier}}, "data": {"mode": "normal"}}),
            )
            .unwrap();
    }

    fn target(name: &str, label_selector: &str) -> Selector {
        Selector {
            version: "v1".to_string(),
            resource: "configmaps".to_string(),
            namespace: "apps".to_string(),
            name: name.to_string(),
            label_selector: label_selector.to_string(),
            ..Selector::default()
        }
    }

    fn set_mode(target: Selector, mode: &str) -> PatchGroup {
        PatchGroup {
            target,
            patch: vec![PatchOperation::replace("/data/mode", json!(mode))],
        }
    }

    fn mode(store: &StateStore, name: &str) -> Value {
        store.get_resource(&configmap(name)).unwrap().unwrap()["data"]["mode"].clone()
    }

    #[tokio::test]
    async fn no_groups_is_not_an_error() {
        let store = StateStore::open_in_memory().unwrap();
        let pass = apply_all(&store, &[], "ctrl", 1).await;
        assert!(pass.patched.is_empty());
        let c = pass.condition;
        assert_eq!(c.type_, ConditionType::PatchApplied);
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, Reason::NoPatchFound);
        assert_eq!(c.message, MSG_NO_PATCHES);
    }

    #[tokio::test]
    async fn every_matching_resource_is_patched() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, "a", "web");
        seed(&store, "b", "web");
        seed(&store, "c", "db");

        let groups = vec![set_mode(target("", "tier=web"), "degraded")];
        let pass = apply_all(&store, &groups, "ctrl", 7).await;
        let c = &pass.condition;

        assert_eq!(c.reason, Reason::Applied);
        assert_eq!(pass.patched, vec![configmap("a"), configmap("b")]);
        assert!(c.is_true());
        assert_eq!(mode(&store, "a"), "degraded");
        assert_eq!(mode(&store, "b"), "degraded");
        assert_eq!(mode(&store, "c"), "normal");
    }

    #[tokio::test]
    async fn zero_matches_fails_the_group() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, "a", "web");

        let groups = vec![set_mode(target("", "tier=cache"), "degraded")];
        let c = apply_all(&store, &groups, "ctrl", 1).await.condition;
        assert_eq!(c.reason, Reason::PatchApplyFailed);
        assert!(c.message.starts_with("failed to apply patch: no configmaps"));
    }

    #[tokio::test]
    async fn first_failure_stops_without_rollback() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, "a", "web");
        seed(&store, "c", "db");

        let groups = vec![
            set_mode(target("a", ""), "degraded"),
            set_mode(target("missing", ""), "degraded"),
            set_mode(target("c", ""), "degraded"),
        ];
        let pass = apply_all(&store, &groups, "ctrl", 1).await;
        let c = &pass.condition;

        assert_eq!(c.status, ConditionStatus::False);
        assert!(pass.touched(&configmap("a")));
        assert!(!pass.touched(&configmap("c")));
        assert_eq!(c.reason, Reason::PatchApplyFailed);
        assert!(c.message.contains("missing"), "{}", c.message);
        assert_eq!(mode(&store, "a"), "degraded");
        assert_eq!(mode(&store, "c"), "normal");
    }

    #[tokio::test]
    async fn resolution_failure_short_circuits() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, "a", "web");

        let groups = vec![
            set_mode(target("a", ""), "degraded"),
            set_mode(target("", "tier notin web"), "degraded"),
        ];
        let c = apply_all(&store, &groups, "ctrl", 1).await.condition;
        assert_eq!(c.reason, Reason::PatchApplyFailed);
        assert!(c.message.contains("invalid selector"), "{}", c.message);
        assert_eq!(mode(&store, "a"), "degraded");
    }
}
