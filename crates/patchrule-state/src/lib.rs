//! patchrule-state — embedded resource store for the patch rule controller.
//!
//! Backed by [redb](https://docs.rs/redb). Holds rule documents and the
//! arbitrary resources that rules patch, all as JSON documents in a single
//! table.
//!
//! # Architecture
//!
//! Keys are `{group}/{version}/{resource}/{namespace}/{name}` so listing a
//! kind in a namespace is a prefix scan. Every write bumps a store-wide
//! revision that becomes the document's `metadata.resourceVersion`.
//!
//! Patches are JSON 6902 documents applied inside one write transaction:
//! either every operation lands or the stored document is untouched.
//! Status writes use `metadata.generation` as an optimistic precondition.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod document;
pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{StateStore, rule_ref};
