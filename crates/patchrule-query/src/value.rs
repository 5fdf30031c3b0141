//! Query results and decoding of the Prometheus response envelope.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::QueryError;

/// One series value at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Series labels. Empty for a scalar.
    pub metric: BTreeMap<String, String>,
    /// Evaluation timestamp in (fractional) unix seconds.
    pub timestamp: f64,
    pub value: f64,
}

/// Result of an instant query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Vector(Vec<Sample>),
    Scalar(Sample),
}

impl QueryResult {
    /// Normalize into a series: a scalar becomes a one-element vector.
    pub fn into_samples(self) -> Vec<Sample> {
        match self {
            QueryResult::Vector(samples) => samples,
            QueryResult::Scalar(sample) => vec![sample],
        }
    }

    pub fn result_type(&self) -> &'static str {
        match self {
            QueryResult::Vector(_) => "vector",
            QueryResult::Scalar(_) => "scalar",
        }
    }
}

/// A decoded answer plus any warnings the backend attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub result: QueryResult,
    pub warnings: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<Data>,
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Data {
    result_type: String,
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
struct VectorEntry {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

/// Decode a `/api/v1/query` response body.
///
/// `http_status` is only used to describe bodies that are not API JSON;
/// Prometheus reports query errors as JSON with a 4xx/5xx status.
pub fn decode_response(http_status: u16, body: &[u8]) -> Result<QueryResponse, QueryError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        QueryError::QueryFailed(format!(
            "unexpected response (HTTP {http_status}): {e}"
        ))
    })?;

    if envelope.status != "success" {
        return Err(QueryError::QueryFailed(format!(
            "{}: {}",
            envelope.error_type, envelope.error
        )));
    }
    let data = envelope.data.ok_or_else(|| {
        QueryError::QueryFailed("response carries no data".to_string())
    })?;

    let result = match data.result_type.as_str() {
        "vector" => {
            let entries: Vec<VectorEntry> = serde_json::from_value(data.result)
                .map_err(|e| QueryError::QueryFailed(format!("malformed vector: {e}")))?;
            let samples = entries
                .into_iter()
                .map(|entry| {
                    Ok(Sample {
                        metric: entry.metric,
                        timestamp: entry.value.0,
                        value: parse_value(&entry.value.1)?,
                    })
                })
                .collect::<Result<Vec<_>, QueryError>>()?;
            QueryResult::Vector(samples)
        }
        "scalar" => {
            let (timestamp, raw): (f64, String) = serde_json::from_value(data.result)
                .map_err(|e| QueryError::QueryFailed(format!("malformed scalar: {e}")))?;
            QueryResult::Scalar(Sample {
                metric: BTreeMap::new(),
                timestamp,
                value: parse_value(&raw)?,
            })
        }
        other => {
            return Err(QueryError::UnsupportedResultType(format!(
                "unsupported result type {other:?}"
            )));
        }
    };

    Ok(QueryResponse {
        result,
        warnings: envelope.warnings,
    })
}

/// Sample values travel as strings so that NaN and infinities survive JSON.
fn parse_value(raw: &str) -> Result<f64, QueryError> {
    match raw {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => raw
            .parse()
            .map_err(|_| QueryError::QueryFailed(format!("invalid sample value {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(body: Value) -> Result<QueryResponse, QueryError> {
        decode_response(200, body.to_string().as_bytes())
    }

    #[test]
    fn decodes_vector() {
        let resp = decode(json!({
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {"__name__": "up", "job": "api"}, "value": [1700000000.5, "1"]},
                    {"metric": {"__name__": "up", "job": "db"}, "value": [1700000000.5, "NaN"]}
                ]
            }
        }))
        .unwrap();

        let QueryResult::Vector(samples) = &resp.result else {
            panic!("expected vector, got {:?}", resp.result);
        };
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].metric["job"], "api");
        assert_eq!(samples[0].value, 1.0);
        assert!(samples[1].value.is_nan());
        assert!(resp.warnings.is_empty());
    }

    #[test]
    fn scalar_normalizes_to_single_sample() {
        let resp = decode(json!({
            "status": "success",
            "data": {"resultType": "scalar", "result": [1700000000, "+Inf"]},
            "warnings": ["partial response"]
        }))
        .unwrap();

        assert_eq!(resp.result.result_type(), "scalar");
        assert_eq!(resp.warnings, vec!["partial response"]);
        let samples = resp.result.into_samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, f64::INFINITY);
        assert!(samples[0].metric.is_empty());
    }

    #[test]
    fn empty_vector_has_no_samples() {
        let resp = decode(json!({
            "status": "success",
            "data": {"resultType": "vector", "result": []}
        }))
        .unwrap();
        assert!(resp.result.into_samples().is_empty());
    }

    #[test]
    fn other_result_types_are_rejected() {
        for result_type in ["matrix", "string", "streams"] {
            let err = decode(json!({
                "status": "success",
                "data": {"resultType": result_type, "result": []}
            }))
            .unwrap_err();
            assert!(
                matches!(err, QueryError::UnsupportedResultType(_)),
                "{result_type}: {err:?}"
            );
        }
    }

    #[test]
    fn api_error_carries_backend_text() {
        let err = decode_response(
            400,
            json!({
                "status": "error",
                "errorType": "bad_data",
                "error": "parse error at char 4"
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            QueryError::QueryFailed("bad_data: parse error at char 4".to_string())
        );
        assert_eq!(
            err.to_string(),
            "failed executing query: bad_data: parse error at char 4"
        );
    }

    #[test]
    fn non_json_body_names_http_status() {
        let err = decode_response(502, b"<html>bad gateway</html>").unwrap_err();
        match err {
            QueryError::QueryFailed(msg) => assert!(msg.contains("HTTP 502"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
