//! patchrule-query — instant queries against a Prometheus-compatible API.
//!
//! [`PrometheusClient`] issues `GET /api/v1/query` over an HTTP/1
//! connection, wrapped in rustls for `https` addresses, and decodes the
//! answer into a [`QueryResult`], which is either an instant vector or a
//! scalar. Every other result type is rejected with
//! [`QueryError::UnsupportedResultType`].

pub mod client;
pub mod error;
pub mod tls;
pub mod value;

pub use client::PrometheusClient;
pub use error::QueryError;
pub use tls::TlsConfig;
pub use value::{QueryResponse, QueryResult, Sample, decode_response};
