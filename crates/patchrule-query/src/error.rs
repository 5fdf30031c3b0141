//! Error types for query execution.

use thiserror::Error;

/// Why a query produced no usable result.
///
/// The display form is what ends up in a rule's condition message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The backend address could not be turned into a client.
    #[error("failed to parse query address: {0}")]
    InvalidEndpoint(String),

    /// The request failed or the backend reported an error.
    #[error("failed executing query: {0}")]
    QueryFailed(String),

    /// The backend answered with a result shape other than vector or scalar.
    #[error("failed parsing query result: {0}")]
    UnsupportedResultType(String),
}
