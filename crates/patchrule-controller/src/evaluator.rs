//! Sample Evaluator — runs a rule's query and classifies the answer.

use patchrule_api::Reason;
use patchrule_query::QueryError;
use tracing::{debug, warn};

use crate::ports::QueryEngine;

/// Classification of one query evaluation. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationOutcome {
    /// The normalized series is non-empty. The expression carries the
    /// threshold, so presence of any sample is the signal.
    pub has_samples: bool,
    pub first_value: Option<f64>,
}

/// Evaluate `expression` against `address` at unix time `now`.
pub async fn evaluate<Q: QueryEngine>(
    engine: &Q,
    rule: &str,
    address: &str,
    expression: &str,
    now: u64,
) -> Result<EvaluationOutcome, QueryError> {
    let response = engine.query(address, expression, now).await?;
    if !response.warnings.is_empty() {
        warn!(%rule, warnings = ?response.warnings, "query returned warnings");
    }

    let result_type = response.result.result_type();
    let samples = response.result.into_samples();
    let outcome = EvaluationOutcome {
        has_samples: !samples.is_empty(),
        first_value: samples.first().map(|s| s.value),
    };
    debug!(
        %rule,
        result_type,
        samples = samples.len(),
        first_value = ?outcome.first_value,
        "query evaluated"
    );
    Ok(outcome)
}

/// Condition reason recorded for an evaluation failure.
pub fn failure_reason(err: &QueryError) -> Reason {
    match err {
        QueryError::InvalidEndpoint(_) => Reason::InvalidEndpoint,
        QueryError::QueryFailed(_) => Reason::QueryFailed,
        QueryError::UnsupportedResultType(_) => Reason::UnsupportedResultType,
    }
}
