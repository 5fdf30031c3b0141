//! In-process collaborators for unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use patchrule_query::{QueryError, QueryResponse, QueryResult, Sample};

use crate::ports::QueryEngine;

/// Query engine whose answer is set by the test.
#[derive(Clone)]
pub struct FakeEngine {
    answer: Arc<Mutex<Result<QueryResponse, QueryError>>>,
    calls: Arc<Mutex<Vec<(String, String, u64)>>>,
}

impl FakeEngine {
    pub fn returning(answer: Result<QueryResponse, QueryError>) -> Self {
        Self {
            answer: Arc::new(Mutex::new(answer)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_samples(values: &[f64]) -> Self {
        Self::returning(Ok(vector(values)))
    }

    pub fn set(&self, answer: Result<QueryResponse, QueryError>) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn calls(&self) -> Vec<(String, String, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

impl QueryEngine for FakeEngine {
    async fn query(
        &self,
        address: &str,
        expression: &str,
        at: u64,
    ) -> Result<QueryResponse, QueryError> {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), expression.to_string(), at));
        self.answer.lock().unwrap().clone()
    }
}

pub fn vector(values: &[f64]) -> QueryResponse {
    QueryResponse {
        result: QueryResult::Vector(
            values
                .iter()
                .map(|v| Sample {
                    metric: BTreeMap::new(),
                    timestamp: 0.0,
                    value: *v,
                })
                .collect(),
        ),
        warnings: Vec::new(),
    }
}
