//! Domain types for the `PrometheusPatchRule` resource.
//!
//! All types serialize with Kubernetes-style camelCase field names so a
//! rule document can be applied from the same JSON a user would hand to
//! an API server.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;

/// API group of the rule resource.
pub const GROUP: &str = "metrics.patchrule.dev";
/// API version of the rule resource.
pub const VERSION: &str = "v1beta1";
/// Plural resource name of the rule resource.
pub const RESOURCE: &str = "prometheuspatchrules";
/// Kind of the rule resource.
pub const KIND: &str = "PrometheusPatchRule";

// ── Metadata ──────────────────────────────────────────────────────

/// Object metadata shared by rules and patch targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Bumped by the store whenever the spec changes.
    #[serde(default)]
    pub generation: i64,
    /// Bumped by the store on every write.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_fields: Vec<ManagedFieldsEntry>,
}

/// Ownership record left by a writer that patched the object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedFieldsEntry {
    pub manager: String,
    pub operation: String,
    /// Unix timestamp (seconds) of the last write by this manager.
    pub time: u64,
}

// ── Rule ──────────────────────────────────────────────────────────

/// The rule resource: spec written by the owner, status written by the
/// controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchRule {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PatchRuleSpec,
    #[serde(default)]
    pub status: PatchRuleStatus,
}

fn default_api_version() -> String {
    format!("{GROUP}/{VERSION}")
}

fn default_kind() -> String {
    KIND.to_string()
}

impl PatchRule {
    /// Build a rule with default type metadata.
    pub fn new(namespace: &str, name: &str, spec: PatchRuleSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..ObjectMeta::default()
            },
            spec,
            status: PatchRuleStatus::default(),
        }
    }

    /// `{namespace}/{name}` used in logs and as the scheduler key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    /// Address of this rule as a patch target.
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            group: GROUP.to_string(),
            version: VERSION.to_string(),
            resource: RESOURCE.to_string(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }
}

/// Desired behavior of a rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PatchRuleSpec {
    /// Base URL of the Prometheus-compatible query API.
    #[serde(default)]
    pub query_address: String,
    /// Query expression. It encodes the threshold itself (`metric > 0`);
    /// any returned sample counts as a positive signal.
    #[serde(default, alias = "expr")]
    pub expression: String,
    /// Re-evaluation period.
    #[serde(default, with = "crate::duration")]
    pub interval: Duration,
    /// How long the signal must stay positive before patches apply.
    #[serde(default, alias = "for", with = "crate::duration")]
    pub for_duration: Duration,
    /// Ordered patch groups.
    #[serde(default, alias = "json6902Patches", skip_serializing_if = "Vec::is_empty")]
    pub patch_groups: Vec<PatchGroup>,
    /// Skip evaluation entirely.
    #[serde(default, alias = "suspend")]
    pub suspended: bool,
}

/// Observed state of a rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PatchRuleStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// ── Patches ───────────────────────────────────────────────────────

/// A target selector plus the operations applied to every resource it
/// resolves to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PatchGroup {
    #[serde(default)]
    pub target: Selector,
    #[serde(default)]
    pub patch: Vec<PatchOperation>,
}

/// Declarative description of zero, one or many resources.
///
/// `name` wins over `label_selector` when both are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    /// Kubernetes label-selector expression, e.g. `app=web,tier!=db`.
    #[serde(default)]
    pub label_selector: String,
}

impl Selector {
    /// The addressed resource when `name` is set.
    pub fn named_ref(&self) -> Option<ResourceRef> {
        if self.name.is_empty() {
            return None;
        }
        Some(ResourceRef {
            group: self.group.clone(),
            version: self.version.clone(),
            resource: self.resource.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        })
    }
}

/// RFC 6902 operation kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

impl PatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
            PatchOp::Replace => "replace",
            PatchOp::Move => "move",
            PatchOp::Copy => "copy",
            PatchOp::Test => "test",
        }
    }
}

/// A single JSON 6902 instruction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    /// Source pointer for `move` and `copy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl PatchOperation {
    /// An `add` operation.
    pub fn add(path: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.to_string(),
            from: None,
            value,
        }
    }

    /// A `replace` operation.
    pub fn replace(path: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.to_string(),
            from: None,
            value,
        }
    }

    /// A `remove` operation.
    pub fn remove(path: &str) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.to_string(),
            from: None,
            value: Value::Null,
        }
    }

    /// Wire form of this operation: only the members RFC 6902 defines for
    /// the op are emitted.
    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("op".to_string(), Value::String(self.op.as_str().to_string()));
        if let Some(from) = &self.from {
            obj.insert("from".to_string(), Value::String(from.clone()));
        }
        obj.insert("path".to_string(), Value::String(self.path.clone()));
        match self.op {
            PatchOp::Add | PatchOp::Replace | PatchOp::Test => {
                obj.insert("value".to_string(), self.value.clone());
            }
            PatchOp::Remove | PatchOp::Move | PatchOp::Copy => {}
        }
        Value::Object(obj)
    }
}

/// Serialize an ordered operation list as one JSON 6902 document.
pub fn patch_document(ops: &[PatchOperation]) -> Value {
    Value::Array(ops.iter().map(PatchOperation::to_json).collect())
}

// ── Resource addressing ───────────────────────────────────────────

/// Fully-qualified address of one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    /// Store key: `{group}/{version}/{resource}/{namespace}/{name}`.
    pub fn table_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.group, self.version, self.resource, self.namespace, self.name
        )
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gvr = if self.group.is_empty() {
            format!("{}/{}", self.version, self.resource)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.resource)
        };
        if self.namespace.is_empty() {
            write!(f, "{gvr} {}", self.name)
        } else {
            write!(f, "{gvr} {}/{}", self.namespace, self.name)
        }
    }
}
