use crate::api::rest::{merge_json, ApiResult, AppState, AuthUser};
use crate::db::models::camera_models::{
    Camera, CameraGroup, CameraGroupDetail, CameraHealthLog, CameraStatistics, CameraStatus,
    CameraSummary, Location,
};
use crate::error::Error;
use crate::services::cameras::GroupRequest;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CameraListParams {
    pub status: Option<CameraStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: CameraStatus,
}

#[derive(Debug, Deserialize)]
pub struct HealthParams {
    pub limit: Option<i64>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_cameras).post(create_camera))
        .route("/statistics", get(camera_statistics))
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/:id", get(get_group).put(update_group).delete(delete_group))
        .route("/:id", get(get_camera).put(update_camera).delete(delete_camera))
        .route("/:id/status", put(update_camera_status))
        .route("/:id/health-check", post(check_health))
        .route("/:id/health", get(health_logs))
}

pub fn location_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_locations).post(create_location))
        .route("/:id", get(get_location).put(update_location).delete(delete_location))
}

/// Camera JSON with the write-only password present so it can be read back
fn camera_base(camera: &Camera, password: &str) -> Result<Value, Error> {
    let mut value = serde_json::to_value(camera)?;
    value["password"] = json!(password);
    Ok(value)
}

async fn list_cameras(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(params): Query<CameraListParams>,
) -> ApiResult<Json<Vec<CameraSummary>>> {
    Ok(Json(state.cameras.list(params.status).await?))
}

async fn camera_statistics(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> ApiResult<Json<CameraStatistics>> {
    Ok(Json(state.cameras.statistics().await?))
}

async fn get_camera(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Camera>> {
    Ok(Json(state.cameras.get(&id).await?))
}

async fn create_camera(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Camera>)> {
    let template = Camera::new("", Uuid::nil());
    let mut camera: Camera = merge_json(camera_base(&template, "")?, body)?;
    camera.id = template.id;
    camera.status = CameraStatus::Inactive;
    camera.created_at = template.created_at;
    camera.updated_at = template.updated_at;

    let camera = state.cameras.create(&user, camera).await?;
    Ok((StatusCode::CREATED, Json(camera)))
}

async fn update_camera(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Camera>> {
    let existing = state.cameras.get(&id).await?;
    // An omitted password keeps the stored one
    let mut camera: Camera = merge_json(camera_base(&existing, "")?, body)?;
    camera.id = existing.id;
    camera.created_at = existing.created_at;

    Ok(Json(state.cameras.update(&user, camera).await?))
}

async fn delete_camera(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.cameras.delete(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_camera_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Json<Camera>> {
    if !user.role.can_manage_cases() {
        return Err(Error::Authorization("Only staff can change camera status".to_string()).into());
    }
    Ok(Json(state.cameras.set_status(&id, request.status).await?))
}

async fn check_health(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let log = state.cameras.check_health(&user, &id).await?;
    let healthy = log.is_healthy();
    let mut body = serde_json::to_value(&log).map_err(Error::from)?;
    body["is_healthy"] = json!(healthy);
    Ok(Json(body))
}

async fn health_logs(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<Uuid>,
    Query(params): Query<HealthParams>,
) -> ApiResult<Json<Vec<CameraHealthLog>>> {
    Ok(Json(state.cameras.health_logs(&id, params.limit).await?))
}

async fn list_groups(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> ApiResult<Json<Vec<CameraGroup>>> {
    Ok(Json(state.cameras.groups().await?))
}

async fn get_group(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CameraGroupDetail>> {
    Ok(Json(state.cameras.group_detail(&id).await?))
}

async fn create_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<GroupRequest>,
) -> ApiResult<(StatusCode, Json<CameraGroup>)> {
    let group = state.cameras.create_group(&user, request).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn update_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<GroupRequest>,
) -> ApiResult<Json<CameraGroup>> {
    Ok(Json(state.cameras.update_group(&user, &id, request).await?))
}

async fn delete_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.cameras.delete_group(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_locations(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> ApiResult<Json<Vec<Location>>> {
    Ok(Json(state.cameras.locations().await?))
}

async fn get_location(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Location>> {
    Ok(Json(state.cameras.location(&id).await?))
}

async fn create_location(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Location>)> {
    let template = Location::new("", "building");
    let mut location: Location = merge_json(serde_json::to_value(&template).map_err(Error::from)?, body)?;
    location.id = template.id;
    location.created_at = template.created_at;
    location.updated_at = template.updated_at;

    let location = state.cameras.create_location(&user, location).await?;
    Ok((StatusCode::CREATED, Json(location)))
}

async fn update_location(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Location>> {
    let existing = state.cameras.location(&id).await?;
    let mut location: Location = merge_json(serde_json::to_value(&existing).map_err(Error::from)?, body)?;
    location.id = existing.id;
    location.created_at = existing.created_at;
    location.updated_at = Utc::now();

    Ok(Json(state.cameras.update_location(&user, location).await?))
}

async fn delete_location(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.cameras.delete_location(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_body_fills_from_defaults() {
        let location_id = Uuid::new_v4();
        let template = Camera::new("", Uuid::nil());
        let body = json!({
            "name": "Main gate",
            "location_id": location_id,
            "stream_url": "rtsp://10.0.0.9/live",
            "password": "secret",
        });
        let camera: Camera = merge_json(camera_base(&template, "").unwrap(), body).unwrap();
        assert_eq!(camera.name, "Main gate");
        assert_eq!(camera.location_id, location_id);
        assert_eq!(camera.port, 554);
        assert_eq!(camera.password, "secret");
    }

    #[test]
    fn omitted_password_stays_empty_on_update() {
        let mut existing = Camera::new("Lab", Uuid::new_v4());
        existing.password = "stored".into();
        let camera: Camera =
            merge_json(camera_base(&existing, "").unwrap(), json!({ "fps": 15 })).unwrap();
        assert_eq!(camera.fps, 15);
        assert!(camera.password.is_empty());
    }
}
