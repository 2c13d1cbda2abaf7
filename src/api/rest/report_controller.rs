use crate::api::rest::{ApiResult, AppState, AuthUser, UploadForm};
use crate::db::models::report_models::{
    IncidentReport, ReportCategory, ReportImage, ReportStatus, ReportUpdate, ReportView,
};
use crate::detector::ImageParams;
use crate::services::reports::{NewReport, ReportDetail};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const MAX_IMAGE_UPLOAD: usize = 20 * 1024 * 1024;
const DEFAULT_REPORT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportListParams {
    pub status: Option<ReportStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: Option<ReportStatus>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub reanalyze: bool,
    #[serde(flatten)]
    pub params: ImageParams,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reports).post(create_report))
        .route("/categories", get(list_categories).post(create_category))
        .route("/:id", get(get_report).put(edit_report).delete(delete_report))
        .route("/:id/status", post(update_status))
        .route("/:id/updates", get(list_updates))
        .route(
            "/:id/images",
            post(upload_image).layer(DefaultBodyLimit::max(MAX_IMAGE_UPLOAD)),
        )
        .route("/:id/analyze", post(analyze_images))
}

async fn list_categories(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> ApiResult<Json<Vec<ReportCategory>>> {
    Ok(Json(state.reports.categories().await?))
}

async fn create_category(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CategoryRequest>,
) -> ApiResult<(StatusCode, Json<ReportCategory>)> {
    let category = state
        .reports
        .create_category(&user, &request.name, &request.description, &request.icon)
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn list_reports(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<ReportListParams>,
) -> ApiResult<Json<Vec<ReportView>>> {
    let limit = params.limit.unwrap_or(DEFAULT_REPORT_LIMIT).clamp(1, 500);
    Ok(Json(state.reports.list(&user, params.status, limit).await?))
}

async fn create_report(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<NewReport>,
) -> ApiResult<(StatusCode, Json<IncidentReport>)> {
    let report = state.reports.create(&user, request).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_report(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ReportDetail>> {
    Ok(Json(state.reports.detail(&user, &id).await?))
}

async fn edit_report(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<NewReport>,
) -> ApiResult<Json<IncidentReport>> {
    Ok(Json(state.reports.edit(&user, &id, request).await?))
}

async fn delete_report(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.reports.delete(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> ApiResult<(StatusCode, Json<ReportUpdate>)> {
    let update = state
        .reports
        .update_status(&user, &id, request.status, &request.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(update)))
}

async fn list_updates(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ReportUpdate>>> {
    let detail = state.reports.detail(&user, &id).await?;
    Ok(Json(detail.updates))
}

async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ReportImage>)> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let caption = form.fields.remove("caption").unwrap_or_default();

    let image = state.reports.add_image(&user, &id, upload, &caption).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

async fn analyze_images(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    request: Option<Json<AnalyzeRequest>>,
) -> ApiResult<Json<Value>> {
    let AnalyzeRequest { reanalyze, params } = request.map(|Json(r)| r).unwrap_or_default();
    let analyzed = state.reports.analyze_images(&user, &id, reanalyze, params).await?;
    Ok(Json(json!({ "analyzed": analyzed })))
}
