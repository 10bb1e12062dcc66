use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use mongodb::bson::Document;
use readmission_insights::pipeline::{Filter, Pipeline, SortSpec};
use readmission_insights::record::PatientVisitRecord;
use readmission_insights::server::{AppState, RUNNING_STATUS, router};
use readmission_insights::store::{MemoryStore, RecordStore, StoreError};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

/// Reachable at startup, but every query is rejected.
struct RejectingStore;

#[async_trait]
impl RecordStore for RejectingStore {
    fn backend(&self) -> &'static str {
        "rejecting"
    }
    async fn count(&self, _: &Filter) -> Result<u64, StoreError> {
        Err(StoreError::Query("not authorized on diabetes_project".into()))
    }
    async fn aggregate(&self, _: &Pipeline) -> Result<Vec<Document>, StoreError> {
        Err(StoreError::Query("not authorized on diabetes_project".into()))
    }
    async fn find_sorted(&self, _: &SortSpec, _: usize) -> Result<Vec<Document>, StoreError> {
        Err(StoreError::Query("not authorized on diabetes_project".into()))
    }
}

fn visit(id: i64, stay: i32, meds: i32, labs: i32, readmitted: &str) -> PatientVisitRecord {
    PatientVisitRecord {
        patient_id: id,
        age: Some("[60-70)".into()),
        race: Some("Caucasian".into()),
        time_in_hospital: stay,
        num_medications: meds,
        num_lab_procedures: labs,
        insulin: Some("No".into()),
        readmitted: Some(readmitted.into()),
    }
}

fn state_with(store: impl RecordStore + 'static) -> AppState {
    AppState::new(Some(Arc::new(store)))
}

async fn get(state: AppState, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(state, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_stats_on_empty_collection_is_ok() {
    let (status, body) = get_json(state_with(MemoryStore::default()), "/api/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "total_patients": 0,
            "readmission_stats": [],
            "averages": { "avg_stay": 0, "avg_meds": 0, "avg_labs": 0 }
        })
    );
}

#[tokio::test]
async fn test_stats_with_records() {
    let store = MemoryStore::from_records(&[
        visit(1, 3, 10, 40, "NO"),
        visit(2, 5, 20, 45, ">30"),
        visit(3, 4, 15, 41, "NO"),
        visit(4, 2, 16, 44, "<30"),
    ])
    .unwrap();

    let (status, body) = get_json(state_with(store), "/api/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_patients"], 4);
    assert_eq!(
        body["readmission_stats"],
        json!([
            { "_id": "NO", "count": 2 },
            { "_id": ">30", "count": 1 },
            { "_id": "<30", "count": 1 }
        ])
    );
    assert_eq!(
        body["averages"],
        json!({ "avg_stay": 3.5, "avg_meds": 15.2, "avg_labs": 42.5 })
    );
}

#[tokio::test]
async fn test_degraded_mode_reports_disconnected() {
    let (status, body) = get_json(AppState::new(None), "/test").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": RUNNING_STATUS, "mongodb_connected": false })
    );

    let (status, body) = get_json(AppState::new(None), "/api/stats").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_health_reports_connected_store() {
    let (_, body) = get_json(state_with(MemoryStore::default()), "/test").await;
    assert_eq!(body["mongodb_connected"], true);
}

#[tokio::test]
async fn test_query_failure_is_500_with_message() {
    let (status, body) = get_json(state_with(RejectingStore), "/api/stats").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("not authorized"));
}

#[tokio::test]
async fn test_index_serves_dashboard_page() {
    let (status, body) = get(AppState::new(None), "/").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("id=\"readmissionChart\""));
    assert!(html.contains("/api/stats"));
}

#[tokio::test]
async fn test_missing_readmission_code_groups_as_null() {
    let mut unknown = visit(5, 3, 12, 40, "NO");
    unknown.readmitted = None;
    let store = MemoryStore::from_records(&[visit(1, 3, 12, 40, "NO"), unknown]).unwrap();

    let (status, body) = get_json(state_with(store), "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["readmission_stats"],
        json!([{ "_id": "NO", "count": 1 }, { "_id": null, "count": 1 }])
    );

    let (_, page) = get(AppState::new(None), "/").await;
    let html = String::from_utf8(page).unwrap();
    assert!(html.contains("item._id ?? 'Unknown'"));
}
