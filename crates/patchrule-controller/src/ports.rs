//! Collaborator seams of the reconcile cycle and their production backends.
//!
//! [`PrometheusEngine`] answers queries over HTTP; [`StateStore`] serves as
//! both the target resource store and the rule store.

use std::future::Future;
use std::time::Duration;

use patchrule_api::{LabelSelector, PatchOperation, PatchRule, ResourceRef, Selector};
use patchrule_query::{PrometheusClient, QueryError, QueryResponse, TlsConfig};
use patchrule_state::{StateError, StateResult, StateStore};
use thiserror::Error;

/// Failure reported by a resource or rule store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A precondition failed because the stored object moved on.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<StateError> for StoreError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => StoreError::NotFound(what),
            StateError::Conflict(what) => StoreError::Conflict(what),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Executes instant queries against a metrics backend.
pub trait QueryEngine: Send + Sync {
    /// Evaluate `expression` at unix time `at` against the backend at `address`.
    fn query(
        &self,
        address: &str,
        expression: &str,
        at: u64,
    ) -> impl Future<Output = Result<QueryResponse, QueryError>> + Send;
}

/// Lists and patches target resources.
pub trait ResourceStore: Send + Sync {
    /// Resources of the selector's kind and namespace matching its label
    /// selector, in the store's iteration order. `selector.name` is ignored.
    fn list(
        &self,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<ResourceRef>, StoreError>> + Send;

    /// Apply `operations` as one JSON 6902 document, attributed to
    /// `field_manager` at unix time `now`.
    fn patch(
        &self,
        resource: &ResourceRef,
        operations: &[PatchOperation],
        field_manager: &str,
        now: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Reads rules and persists their status.
pub trait RuleStore: Send + Sync {
    fn get_rule(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<PatchRule>, StoreError>> + Send;

    fn list_rules(&self) -> impl Future<Output = Result<Vec<PatchRule>, StoreError>> + Send;

    /// Write `rule.status`. Must fail with [`StoreError::Conflict`] when the
    /// stored rule was written after `rule` was read, as tracked by
    /// `metadata.resourceVersion`.
    fn patch_status(&self, rule: &PatchRule) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Query engine that dials the rule's own Prometheus address on each call.
#[derive(Debug, Clone)]
pub struct PrometheusEngine {
    timeout: Duration,
    /// Used for `https` addresses instead of the shared webpki roots.
    tls: Option<TlsConfig>,
}

impl PrometheusEngine {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, tls: None }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

impl QueryEngine for PrometheusEngine {
    async fn query(
        &self,
        address: &str,
        expression: &str,
        at: u64,
    ) -> Result<QueryResponse, QueryError> {
        let client = match &self.tls {
            Some(tls) => PrometheusClient::with_tls(address, self.timeout, tls.clone())?,
            None => PrometheusClient::new(address, self.timeout)?,
        };
        client.query(expression, at).await
    }
}

/// Run a redb call on the blocking pool. Write transactions serialize on
/// the database lock and must not stall the runtime's worker threads.
async fn blocking<T, F>(store: &StateStore, call: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&StateStore) -> StateResult<T> + Send + 'static,
{
    let store = store.clone();
    let result = tokio::task::spawn_blocking(move || call(&store))
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?;
    Ok(result?)
}

impl ResourceStore for StateStore {
    async fn list(&self, selector: &Selector) -> Result<Vec<ResourceRef>, StoreError> {
        let labels: LabelSelector = selector
            .label_selector
            .parse()
            .map_err(|e: patchrule_api::LabelSelectorError| {
                StoreError::InvalidSelector(e.to_string())
            })?;
        let selector = selector.clone();
        let found = blocking(self, move |store| {
            store.list_resources(
                &selector.group,
                &selector.version,
                &selector.resource,
                &selector.namespace,
                &labels,
            )
        })
        .await?;
        Ok(found.into_iter().map(|(r, _)| r).collect())
    }

    async fn patch(
        &self,
        resource: &ResourceRef,
        operations: &[PatchOperation],
        field_manager: &str,
        now: u64,
    ) -> Result<(), StoreError> {
        let resource = resource.clone();
        let operations = operations.to_vec();
        let field_manager = field_manager.to_string();
        blocking(self, move |store| {
            store.patch_resource(&resource, &operations, &field_manager, now)
        })
        .await?;
        Ok(())
    }
}

impl RuleStore for StateStore {
    async fn get_rule(&self, namespace: &str, name: &str) -> Result<Option<PatchRule>, StoreError> {
        let (namespace, name) = (namespace.to_string(), name.to_string());
        blocking(self, move |store| StateStore::get_rule(store, &namespace, &name)).await
    }

    async fn list_rules(&self) -> Result<Vec<PatchRule>, StoreError> {
        blocking(self, StateStore::list_rules).await
    }

    async fn patch_status(&self, rule: &PatchRule) -> Result<(), StoreError> {
        let rule = rule.clone();
        blocking(self, move |store| store.update_rule_status(&rule)).await
    }
}
