use super::*;
use crate::db::models::job_models::JobPriority;
use axum::{
    extract::{Multipart, Path},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map};

const API_KEY: &str = "test-key";

async fn form_fields(mut multipart: Multipart) -> Map<String, Value> {
    let mut fields = Map::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let size = field.bytes().await.unwrap().len();
            fields.insert("file".into(), json!({"name": filename, "size": size}));
        } else {
            fields.insert(name, Value::String(field.text().await.unwrap()));
        }
    }
    fields
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
        && headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ua| ua.starts_with("campus-guard/"))
}

async fn process_image(headers: HeaderMap, multipart: Multipart) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "bad key"})));
    }
    let fields = form_fields(multipart).await;
    (
        StatusCode::OK,
        Json(json!({
            "job_id": "img-1",
            "detections": [{"class_name": "person", "confidence": 0.91}],
            "detection_summary": fields,
            "processing_time": 0.25,
        })),
    )
}

async fn submit_video(headers: HeaderMap, multipart: Multipart) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "bad key"})));
    }
    let fields = form_fields(multipart).await;
    (
        StatusCode::OK,
        Json(json!({
            "job_id": "abcdef12-3456",
            "status": "submitted",
            "message": "queued",
            "received": fields,
        })),
    )
}

async fn job_status(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    match id.as_str() {
        "known" => (
            StatusCode::OK,
            Json(json!({
                "status": "completed",
                "progress": 100.0,
                "started_at": "2024-01-01T10:00:00Z",
                "completed_at": "2024-01-01T10:05:00Z",
                "result": {"processing_time": 300.0, "summary": {"motion_statistics": {"total_events": 4}}}
            })),
        ),
        "broken" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "boom"})),
        ),
        _ => (StatusCode::NOT_FOUND, Json(json!({"detail": "missing"}))),
    }
}

async fn job_results(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    if id == "known" {
        (StatusCode::OK, Json(json!({"job_id": id, "frames": 120})))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"detail": "missing"})))
    }
}

async fn cancel(Path(id): Path<String>) -> StatusCode {
    if id == "known" {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    }
}

fn detector_app() -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route(
            "/api/v1/models",
            get(|| async { Json(json!([{"name": "yolov8n"}, {"name": "face"}])) }),
        )
        .route("/api/v1/process/image", post(process_image))
        .route("/api/v1/jobs/process/video", post(submit_video))
        .route("/api/v1/jobs/:id/status", get(job_status))
        .route("/api/v1/jobs/:id/results", get(job_results))
        .route("/api/v1/jobs/:id/cancel", post(cancel))
}

fn spawn_detector() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(detector_app().into_make_service());
    tokio::spawn(server);
    format!("http://{}", addr)
}

fn client_for(base_url: &str) -> DetectorClient {
    let config = DetectorConfig {
        base_url: base_url.to_string(),
        api_key: API_KEY.to_string(),
        max_retries: 2,
        retry_delay_ms: 1,
        request_timeout_secs: 5,
        video_upload_timeout_secs: 5,
        job_status_timeout_secs: 5,
    };
    DetectorClient::new(&config).unwrap()
}

/// Address that refuses connections
fn closed_port() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[tokio::test]
async fn image_request_sends_key_and_form_fields() {
    let client = client_for(&spawn_detector());
    let upload = FileUpload::new("gate.jpg", "image/jpeg", vec![1, 2, 3, 4]);

    let result = client
        .process_image(&upload, &ImageParams::default())
        .await
        .unwrap();

    assert_eq!(result.count_of("person"), 1);
    assert_eq!(result.server_url, client.base_url());
    assert_eq!(result.detection_summary["detection_types"], "person,vehicle,face");
    assert_eq!(result.detection_summary["return_image"], "false");
    assert_eq!(result.detection_summary["file"]["name"], "gate.jpg");
    assert_eq!(result.detection_summary["file"]["size"], 4);
}

#[tokio::test]
async fn video_submission_returns_job_id() {
    let client = client_for(&spawn_detector());
    let upload = FileUpload::new("lobby.mp4", "video/mp4", vec![0; 16]);
    let params = VideoParams {
        priority: JobPriority::High,
        crowd_detection: true,
        ..Default::default()
    };

    let submission = client.submit_video_job(&upload, &params).await.unwrap();
    assert_eq!(submission.job_id, "abcdef12-3456");
    assert_eq!(submission.submitted_to, client.base_url());
    assert_eq!(submission.extra["received"]["priority"], "2");
    assert_eq!(submission.extra["received"]["min_people_count"], "3");
}

#[tokio::test]
async fn wrong_key_is_a_status_error() {
    let base = spawn_detector();
    let config = DetectorConfig {
        base_url: base,
        api_key: "wrong".into(),
        max_retries: 1,
        retry_delay_ms: 1,
        ..Default::default()
    };
    let client = DetectorClient::new(&config).unwrap();
    let upload = FileUpload::new("gate.jpg", "image/jpeg", vec![1]);

    match client.process_image(&upload, &ImageParams::default()).await {
        Err(DetectorError::Status { status, .. }) => assert_eq!(status, 401),
        other => panic!("unexpected: {:?}", other.map(|r| r.job_id)),
    }
}

#[tokio::test]
async fn job_status_maps_failures_to_error_snapshots() {
    let client = client_for(&spawn_detector());

    let done = client.get_job_status("known").await;
    assert_eq!(done.status, "completed");
    assert_eq!(done.progress, Some(100.0));

    let missing = client.get_job_status("nope").await;
    assert!(missing.is_error());
    assert_eq!(missing.message, "Job nope not found on processing server");

    let broken = client.get_job_status("broken").await;
    assert!(broken.is_error());
    assert!(broken.message.contains("500"));
}

#[tokio::test]
async fn results_cancel_health_and_models() {
    let client = client_for(&spawn_detector());

    assert_eq!(client.get_job_results("known").await.unwrap()["frames"], 120);
    assert!(client.get_job_results("nope").await.is_err());

    assert!(client.cancel_job("known").await);
    assert!(!client.cancel_job("other").await);

    let health = client.check_health().await;
    assert!(health.healthy);
    assert_eq!(health.status, ServerState::Online);

    assert_eq!(client.available_models().await.len(), 2);
}

#[tokio::test]
async fn unreachable_server_degrades_gracefully() {
    let client = client_for(&closed_port());

    let snapshot = client.get_job_status("known").await;
    assert!(snapshot.is_error());
    assert!(snapshot.message.contains("after 2 attempts"));

    assert!(!client.cancel_job("known").await);
    assert!(client.available_models().await.is_empty());

    let health = client.check_health().await;
    assert!(!health.healthy);
    assert_eq!(health.status, ServerState::Offline);

    let upload = FileUpload::new("gate.jpg", "image/jpeg", vec![1]);
    match client.process_image(&upload, &ImageParams::default()).await {
        Err(DetectorError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("unexpected: {:?}", other.map(|r| r.job_id)),
    }
}

#[tokio::test]
async fn error_statuses_are_not_retried() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/api/v1/jobs/:id/results",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"detail": "busy"})))
            }
        }),
    );
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));

    let client = client_for(&format!("http://{}", addr));
    let result = client.get_job_results("any").await;

    assert!(result.is_err());
    assert!(!matches!(result, Err(DetectorError::RetriesExhausted { .. })));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
