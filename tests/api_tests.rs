//! Router-level tests driven through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::{Arc, Mutex};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use facefuse::api::{build_router, AppState, SharedProvider};
use facefuse::predict::encode_jpeg;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;

fn app(provider: Option<SharedProvider>) -> Router {
    build_router(AppState::new(Arc::new(context()), provider))
}

fn stub(id: usize) -> Option<SharedProvider> {
    let provider: SharedProvider = Arc::new(Mutex::new(StubProvider::seeing(id, 0.9)));
    Some(provider)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn image_payload() -> String {
    encode_jpeg(&test_image()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(app(None), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_person_names_sorted_unique() {
    let (status, body) = send(app(None), get("/api/person_names")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["Alice", "Bob", "Carol", "Dave", "Eve"]));
}

#[tokio::test]
async fn test_compare_faces() {
    let (status, body) = send(
        app(None),
        post(
            "/api/compare_faces",
            json!({ "person1": "Alice", "person2": "Bob" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["category"], "Similar");
    let similarity = body["similarity"].as_f64().unwrap();
    assert!((similarity - 0.7).abs() < 1e-4);
}

#[tokio::test]
async fn test_compare_faces_unknown_person() {
    let (status, body) = send(
        app(None),
        post(
            "/api/compare_faces",
            json!({ "person1": "Alice", "person2": "Zed" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Zed"));
}

#[tokio::test]
async fn test_compare_faces_same_unknown_person() {
    let (status, _) = send(
        app(None),
        post(
            "/api/compare_faces",
            json!({ "person1": "Nobody", "person2": "Nobody" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_predict_4_rejects_zero_results() {
    let (status, _) = send(
        app(None),
        post("/api/predict_4", json!({ "data": ["Alice", 0, 0.3, 1.0, 1.0] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predict_4_needs_five_values() {
    let (status, body) = send(
        app(None),
        post("/api/predict_4", json!({ "data": ["Alice", 5, 0.3, 1.0] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("expected 5 values"));
}

#[tokio::test]
async fn test_predict_4_closest_faces() {
    let (status, body) = send(
        app(None),
        post(
            "/api/predict_4",
            json!({ "data": ["Alice", "5", 0.3, 1.0, 1.0] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let matches = body.as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["name"], "Bob");
    assert_eq!(matches[0]["id"], "b");
    assert!(matches[0]["model_similarities"]["arcface"].is_number());
}

#[tokio::test]
async fn test_predict_4_diagnostic() {
    let (status, body) = send(
        app(None),
        post("/api/predict_4", json!({ "data": ["Eve", 5, 0.3, 1.0, 1.0] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_object());
    assert_eq!(body["target"], "Eve");
}

#[tokio::test]
async fn test_predict_without_models() {
    let (status, _) = send(
        app(None),
        post("/api/predict_0", json!({ "data": [image_payload()] })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_predict_0() {
    let (status, body) = send(
        app(stub(0)),
        post("/api/predict_0", json!({ "data": [image_payload(), 0.5, 2] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "Alice");
    assert_eq!(body[0]["confidence"], 100);
}

#[tokio::test]
async fn test_predict_0_rejects_bad_image() {
    let (status, _) = send(
        app(stub(0)),
        post("/api/predict_0", json!({ "data": ["%%%"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predict_0_below_threshold() {
    let (status, body) = send(
        app(stub(0)),
        post("/api/predict_0", json!({ "data": [image_payload(), 0.95] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("No face"));
}

#[tokio::test]
async fn test_predict_1() {
    let (status, body) = send(
        app(stub(1)),
        post("/api/predict_1", json!({ "data": [image_payload()] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let faces = body.as_array().unwrap();
    assert_eq!(faces.len(), 1);
    assert!(faces[0]["image"].is_string());
    assert_eq!(faces[0]["performers"][0]["name"], "Bob");
}

#[tokio::test]
async fn test_batch_one_to_many() {
    let (status, body) = send(
        app(None),
        post(
            "/api/batch_compare_one_to_many",
            json!({ "target_person": "Alice", "comparison_people": "Bob, Zed" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries[0]["type"], "metadata");
    assert_eq!(entries[0]["invalid_names"], json!(["Zed"]));
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_batch_one_to_many_unknown_target() {
    let (status, body) = send(
        app(None),
        post(
            "/api/batch_compare_one_to_many",
            json!({ "target_person": "Zed", "comparison_people": "Bob" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["invalid_names"], json!(["Zed"]));
}

#[tokio::test]
async fn test_batch_many_to_many() {
    let (status, body) = send(
        app(None),
        post(
            "/api/batch_compare_many_to_many",
            json!({
                "group1_people": "Alice, Bob",
                "group2_people": "Carol, Dave",
                "tolerance": 0.2,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries[0]["mode"], "many_to_many");
    assert_eq!(entries[0]["comparisons"], 4);
    for entry in &entries[1..] {
        assert!(entry["similarity"].as_f64().unwrap() >= 0.2);
    }
}
