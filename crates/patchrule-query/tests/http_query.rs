//! End-to-end queries against an in-process mock of the Prometheus API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use patchrule_query::{PrometheusClient, QueryError, QueryResult};
use serde_json::json;

/// Answers according to the expression text so each test picks its case.
async fn query_handler(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let expr = params.get("query").cloned().unwrap_or_default();
    let time = params.get("time").cloned().unwrap_or_default();
    match expr.as_str() {
        "vector_hit" => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [{"metric": {"job": "api", "time": time}, "value": [1.0, "3"]}]
                }
            })),
        ),
        "vector_empty" => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "data": {"resultType": "vector", "result": []},
                "warnings": ["query touched too many series"]
            })),
        ),
        "scalar" => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "data": {"resultType": "scalar", "result": [1.0, "42"]}
            })),
        ),
        "matrix" => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "data": {"resultType": "matrix", "result": []}
            })),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "errorType": "bad_data",
                "error": format!("unknown expression {expr:?}")
            })),
        ),
    }
}

async fn spawn_mock(prefix: &str) -> SocketAddr {
    let app = Router::new().route(&format!("{prefix}/api/v1/query"), get(query_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr) -> PrometheusClient {
    PrometheusClient::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn vector_result_with_time_parameter() {
    let addr = spawn_mock("").await;
    let resp = client(addr).query("vector_hit", 1_700_000_123).await.unwrap();

    let QueryResult::Vector(samples) = resp.result else {
        panic!("expected vector");
    };
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 3.0);
    assert_eq!(samples[0].metric["time"], "1700000123");
}

#[tokio::test]
async fn empty_vector_keeps_warnings() {
    let addr = spawn_mock("").await;
    let resp = client(addr).query("vector_empty", 1).await.unwrap();
    assert!(resp.result.into_samples().is_empty());
    assert_eq!(resp.warnings, vec!["query touched too many series"]);
}

#[tokio::test]
async fn scalar_result() {
    let addr = spawn_mock("").await;
    let resp = client(addr).query("scalar", 1).await.unwrap();
    assert_eq!(resp.result.into_samples()[0].value, 42.0);
}

#[tokio::test]
async fn matrix_is_unsupported() {
    let addr = spawn_mock("").await;
    let err = client(addr).query("matrix", 1).await.unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedResultType(_)), "{err:?}");
}

#[tokio::test]
async fn backend_error_is_query_failure() {
    let addr = spawn_mock("").await;
    let err = client(addr).query("sum(", 1).await.unwrap_err();
    assert_eq!(
        err,
        QueryError::QueryFailed("bad_data: unknown expression \"sum(\"".to_string())
    );
}

#[tokio::test]
async fn address_path_prefix_is_honored() {
    let addr = spawn_mock("/prometheus").await;
    let prefixed = PrometheusClient::new(
        &format!("http://{addr}/prometheus"),
        Duration::from_secs(5),
    )
    .unwrap();
    assert!(prefixed.query("scalar", 1).await.is_ok());

    // Without the prefix the mock answers 404 with a non-JSON body.
    let err = client(addr).query("scalar", 1).await.unwrap_err();
    assert!(matches!(err, QueryError::QueryFailed(_)), "{err:?}");
}

#[tokio::test]
async fn unreachable_backend_is_query_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(addr).query("up", 1).await.unwrap_err();
    assert!(matches!(err, QueryError::QueryFailed(_)), "{err:?}");
}
