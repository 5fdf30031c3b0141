//! StateStore — redb-backed resource persistence.
//!
//! Provides document CRUD, label-selector listing, JSON 6902 patching with
//! field-manager attribution, and typed access to rule resources. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use patchrule_api::{
    GROUP, LabelSelector, PatchOperation, PatchRule, RESOURCE, ResourceRef, VERSION,
    patch_document,
};
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde_json::Value;
use tracing::{debug, warn};

use crate::document;
use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe resource store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Create or replace a resource document.
    ///
    /// The stored `status` survives a replace, `generation` is bumped only
    /// when `spec` changed, and `resourceVersion` is bumped on every write.
    pub fn put_resource(&self, resource: &ResourceRef, mut doc: Value) -> StateResult<Value> {
        let key = resource.table_key();
        document::set_identity(&mut doc, &resource.namespace, &resource.name)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            let existing: Option<Value> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };

            let generation = match &existing {
                Some(prev) if prev.get("spec") != doc.get("spec") => document::generation(prev) + 1,
                Some(prev) => document::generation(prev),
                None => 1,
            };
            if let (Some(prev), Some(obj)) = (&existing, doc.as_object_mut()) {
                match prev.get("status") {
                    Some(status) => obj.insert("status".to_string(), status.clone()),
                    None => obj.remove("status"),
                };
            }
            document::set_generation(&mut doc, generation)?;
            document::set_resource_version(&mut doc, next_revision(&txn)?)?;

            let value = serde_json::to_vec(&doc).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "resource stored");
        Ok(doc)
    }

    /// Get a resource document.
    pub fn get_resource(&self, resource: &ResourceRef) -> StateResult<Option<Value>> {
        let key = resource.table_key();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let doc: Value =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// List resources of one kind whose labels match `labels`.
    ///
    /// An empty `namespace` lists across all namespaces. Results come back
    /// in key order.
    pub fn list_resources(
        &self,
        group: &str,
        version: &str,
        resource: &str,
        namespace: &str,
        labels: &LabelSelector,
    ) -> StateResult<Vec<(ResourceRef, Value)>> {
        let prefix = if namespace.is_empty() {
            format!("{group}/{version}/{resource}/")
        } else {
            format!("{group}/{version}/{resource}/{namespace}/")
        };
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        // Keys sort lexicographically, so the prefix is one contiguous run.
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let doc: Value =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if !labels.matches(&document::labels(&doc)) {
                continue;
            }
            let r = ResourceRef {
                group: group.to_string(),
                version: version.to_string(),
                resource: resource.to_string(),
                namespace: document::namespace(&doc).to_string(),
                name: document::name(&doc).to_string(),
            };
            results.push((r, doc));
        }
        Ok(results)
    }

    /// Delete a resource. Returns true if it existed.
    pub fn delete_resource(&self, resource: &ResourceRef) -> StateResult<bool> {
        let key = resource.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "resource deleted");
        Ok(existed)
    }

    /// Apply `ops` as one JSON 6902 document to a stored resource.
    ///
    /// Either every operation applies or the document is left untouched.
    /// The patch may not change the object's name or namespace. On success
    /// `field_manager` is recorded in `metadata.managedFields`.
    pub fn patch_resource(
        &self,
        resource: &ResourceRef,
        ops: &[PatchOperation],
        field_manager: &str,
        now: u64,
    ) -> StateResult<Value> {
        let key = resource.table_key();
        let patch: json_patch::Patch =
            serde_json::from_value(patch_document(ops)).map_err(map_err!(Patch))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let patched = {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            let mut doc: Value = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(resource.to_string())),
            };

            let generation = document::generation(&doc);
            let spec_before = doc.get("spec").cloned();
            json_patch::patch(&mut doc, &patch.0).map_err(map_err!(Patch))?;

            if document::name(&doc) != resource.name
                || document::namespace(&doc) != resource.namespace
            {
                return Err(StateError::Patch(format!(
                    "{resource}: patch must not change metadata.name or metadata.namespace"
                )));
            }
            if doc.get("spec").cloned() != spec_before {
                document::set_generation(&mut doc, generation + 1)?;
            }
            document::set_resource_version(&mut doc, next_revision(&txn)?)?;
            document::record_manager(&mut doc, field_manager, now)?;

            let value = serde_json::to_vec(&doc).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            doc
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, %field_manager, ops = ops.len(), "resource patched");
        Ok(patched)
    }

    // ── Rules ──────────────────────────────────────────────────────

    /// Create or replace a rule, keeping any status already recorded.
    pub fn put_rule(&self, rule: &PatchRule) -> StateResult<PatchRule> {
        let doc = serde_json::to_value(rule).map_err(map_err!(Serialize))?;
        let stored = self.put_resource(&rule.resource_ref(), doc)?;
        serde_json::from_value(stored).map_err(map_err!(Deserialize))
    }

    /// Get a rule by namespace and name.
    pub fn get_rule(&self, namespace: &str, name: &str) -> StateResult<Option<PatchRule>> {
        let r = rule_ref(namespace, name);
        match self.get_resource(&r)? {
            Some(doc) => Ok(Some(
                serde_json::from_value(doc).map_err(map_err!(Deserialize))?,
            )),
            None => Ok(None),
        }
    }

    /// List all rules. Documents that no longer decode as rules are skipped.
    pub fn list_rules(&self) -> StateResult<Vec<PatchRule>> {
        let docs =
            self.list_resources(GROUP, VERSION, RESOURCE, "", &LabelSelector::everything())?;
        let mut rules = Vec::with_capacity(docs.len());
        for (r, doc) in docs {
            match serde_json::from_value::<PatchRule>(doc) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(resource = %r, error = %e, "skipping undecodable rule"),
            }
        }
        Ok(rules)
    }

    /// Write `rule.status` onto the stored rule.
    ///
    /// `rule.metadata.resourceVersion` is the precondition: the write fails
    /// with [`StateError::Conflict`] when the stored rule has been written
    /// since the caller read it. An empty version writes unconditionally.
    pub fn update_rule_status(&self, rule: &PatchRule) -> StateResult<()> {
        let r = rule.resource_ref();
        let key = r.table_key();
        let status = serde_json::to_value(&rule.status).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            let mut doc: Value = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(r.to_string())),
            };

            let stored = document::resource_version(&doc);
            let expected = rule.metadata.resource_version.as_str();
            if !expected.is_empty() && stored != expected {
                return Err(StateError::Conflict(format!(
                    "{r}: resourceVersion is {stored}, status was computed from {expected}"
                )));
            }
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("status".to_string(), status);
            }
            document::set_resource_version(&mut doc, next_revision(&txn)?)?;

            let value = serde_json::to_vec(&doc).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "rule status updated");
        Ok(())
    }
}

/// Address of a rule resource.
pub fn rule_ref(namespace: &str, name: &str) -> ResourceRef {
    ResourceRef {
        group: GROUP.to_string(),
        version: VERSION.to_string(),
        resource: RESOURCE.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Increment and return the store-wide revision counter.
fn next_revision(txn: &WriteTransaction) -> StateResult<u64> {
    let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
    let current = meta
        .get(REVISION_KEY)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    meta.insert(REVISION_KEY, next).map_err(map_err!(Write))?;
    Ok(next)
}
