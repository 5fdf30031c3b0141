//! Target Resolver — turns a patch group's selector into resources.

use patchrule_api::{ResourceRef, Selector};
use thiserror::Error;
use tracing::debug;

use crate::ports::{ResourceStore, StoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to resolve {kind} in namespace {namespace:?}: {source}")]
pub struct ResolveError {
    pub kind: String,
    pub namespace: String,
    pub source: StoreError,
}

/// Resolve `selector` to zero or more resources.
///
/// A named selector yields exactly that resource without a lookup; its
/// existence is checked when the patch lands. Otherwise the store lists the
/// kind in the namespace filtered by the label selector, and its order is
/// kept.
pub async fn resolve<S: ResourceStore>(
    store: &S,
    selector: &Selector,
) -> Result<Vec<ResourceRef>, ResolveError> {
    if let Some(named) = selector.named_ref() {
        return Ok(vec![named]);
    }

    let found = store.list(selector).await.map_err(|source| ResolveError {
        kind: kind(selector),
        namespace: selector.namespace.clone(),
        source,
    })?;
    debug!(
        kind = %kind(selector),
        namespace = %selector.namespace,
        label_selector = %selector.label_selector,
        matched = found.len(),
        "selector resolved"
    );
    Ok(found)
}

fn kind(selector: &Selector) -> String {
    if selector.group.is_empty() {
        format!("{}/{}", selector.version, selector.resource)
    } else {
        format!("{}/{}/{}", selector.group, selector.version, selector.resource)
    }
}
