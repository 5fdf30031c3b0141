//! Helpers for reading and stamping metadata on JSON resource documents.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::error::{StateError, StateResult};

fn metadata(doc: &Value) -> Option<&Map<String, Value>> {
    doc.get("metadata").and_then(Value::as_object)
}

fn metadata_mut(doc: &mut Value) -> StateResult<&mut Map<String, Value>> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| StateError::InvalidDocument("document is not an object".to_string()))?;
    obj.entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| StateError::InvalidDocument("metadata is not an object".to_string()))
}

fn meta_str<'a>(doc: &'a Value, field: &str) -> &'a str {
    metadata(doc)
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

pub fn name(doc: &Value) -> &str {
    meta_str(doc, "name")
}

pub fn namespace(doc: &Value) -> &str {
    meta_str(doc, "namespace")
}

pub fn generation(doc: &Value) -> i64 {
    metadata(doc)
        .and_then(|m| m.get("generation"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

pub fn resource_version(doc: &Value) -> &str {
    meta_str(doc, "resourceVersion")
}

/// Labels of a document; non-string values are ignored.
pub fn labels(doc: &Value) -> BTreeMap<String, String> {
    metadata(doc)
        .and_then(|m| m.get("labels"))
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Force `metadata.name` and `metadata.namespace` to the addressed identity.
pub fn set_identity(doc: &mut Value, namespace: &str, name: &str) -> StateResult<()> {
    let meta = metadata_mut(doc)?;
    meta.insert("name".to_string(), Value::String(name.to_string()));
    if namespace.is_empty() {
        meta.remove("namespace");
    } else {
        meta.insert("namespace".to_string(), Value::String(namespace.to_string()));
    }
    Ok(())
}

pub fn set_generation(doc: &mut Value, generation: i64) -> StateResult<()> {
    metadata_mut(doc)?.insert("generation".to_string(), json!(generation));
    Ok(())
}

pub fn set_resource_version(doc: &mut Value, revision: u64) -> StateResult<()> {
    metadata_mut(doc)?.insert("resourceVersion".to_string(), json!(revision.to_string()));
    Ok(())
}

/// Record `manager` as the author of an update at `now`.
///
/// One entry per manager is kept; repeated writes refresh its timestamp.
pub fn record_manager(doc: &mut Value, manager: &str, now: u64) -> StateResult<()> {
    let meta = metadata_mut(doc)?;
    let entries = meta
        .entry("managedFields")
        .or_insert_with(|| Value::Array(Vec::new()));
    let entries = entries.as_array_mut().ok_or_else(|| {
        StateError::InvalidDocument("metadata.managedFields is not an array".to_string())
    })?;

    let entry = json!({ "manager": manager, "operation": "Update", "time": now });
    match entries
        .iter_mut()
        .find(|e| e.get("manager").and_then(Value::as_str) == Some(manager))
    {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
    Ok(())
}
