//! `apply` and `status` subcommands.

use anyhow::{Context, bail};
use patchrule_api::{Condition, GROUP, KIND, PatchRule, ResourceRef, VERSION, duration};
use patchrule_state::StateStore;
use serde_json::Value;
use std::time::Duration;

/// Store a rule or an arbitrary resource document. Returns a one-line
/// summary of what was stored.
pub fn apply_document(
    store: &StateStore,
    doc: Value,
    resource: Option<&str>,
) -> anyhow::Result<String> {
    let api_version = doc.get("apiVersion").and_then(Value::as_str).unwrap_or_default();
    let kind = doc.get("kind").and_then(Value::as_str).unwrap_or_default();

    if api_version == format!("{GROUP}/{VERSION}") && kind == KIND {
        let rule: PatchRule = serde_json::from_value(doc).context("invalid rule document")?;
        anyhow::ensure!(!rule.metadata.name.is_empty(), "rule has no metadata.name");
        let stored = store.put_rule(&rule)?;
        return Ok(format!(
            "{KIND} {} stored (generation {})",
            stored.key(),
            stored.metadata.generation
        ));
    }

    let r = resource_ref(&doc, resource)?;
    let stored = store.put_resource(&r, doc)?;
    let generation = stored["metadata"]["generation"].as_i64().unwrap_or_default();
    Ok(format!("{r} stored (generation {generation})"))
}

/// Address of a non-rule document from its `apiVersion`, `kind` and
/// metadata. `resource` overrides the plural derived from `kind`.
pub fn resource_ref(doc: &Value, resource: Option<&str>) -> anyhow::Result<ResourceRef> {
    let api_version = doc
        .get("apiVersion")
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .context("document has no apiVersion")?;
    let (group, version) = api_version.rsplit_once('/').unwrap_or(("", api_version));

    let resource = match resource {
        Some(resource) => resource.to_string(),
        None => {
            let kind = doc
                .get("kind")
                .and_then(Value::as_str)
                .filter(|k| !k.is_empty())
                .context("document has no kind; pass --resource")?;
            format!("{}s", kind.to_lowercase())
        }
    };

    let metadata = doc.get("metadata").context("document has no metadata")?;
    let name = metadata
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .context("document has no metadata.name")?;
    let namespace = metadata.get("namespace").and_then(Value::as_str).unwrap_or_default();

    Ok(ResourceRef {
        group: group.to_string(),
        version: version.to_string(),
        resource,
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

/// Split `namespace/name`.
pub fn parse_key(key: &str) -> anyhow::Result<(&str, &str)> {
    match key.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace, name))
        }
        _ => bail!("expected <namespace>/<name>, got {key:?}"),
    }
}

/// Render a rule's conditions as a table.
pub fn render_status(rule: &PatchRule, now: u64) -> String {
    let mut out = format!(
        "{}  generation={}  suspended={}\n",
        rule.key(),
        rule.metadata.generation,
        rule.spec.suspended
    );
    if rule.status.conditions.is_empty() {
        out.push_str("no conditions recorded\n");
        return out;
    }
    out.push_str(&format!(
        "{:<14} {:<7} {:<22} {:<8} {}\n",
        "TYPE", "STATUS", "REASON", "AGE", "MESSAGE"
    ));
    for c in &rule.status.conditions {
        out.push_str(&condition_row(c, now));
    }
    out
}

fn condition_row(c: &Condition, now: u64) -> String {
    let age = duration::format(Duration::from_secs(now.saturating_sub(c.last_transition_time)));
    format!(
        "{:<14} {:<7} {:<22} {:<8} {}\n",
        format!("{:?}", c.type_),
        format!("{:?}", c.status),
        c.reason.to_string(),
        age,
        c.message
    )
}
