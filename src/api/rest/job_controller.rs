use crate::api::rest::{ApiResult, AppState, AuthUser, UploadForm};
use crate::db::models::job_models::{
    ImageProcessingResult, JobPriority, JobStatus, ProcessingStatistics, VideoProcessingJob,
};
use crate::detector::{HealthStatus, ImageParams, VideoParams};
use crate::error::Error;
use crate::jobs::{JobDetail, JobStatusReport};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

const MAX_VIDEO_UPLOAD: usize = 512 * 1024 * 1024;
const MAX_IMAGE_UPLOAD: usize = 20 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct JobListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    pub date: Option<NaiveDate>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            "/videos",
            get(list_jobs).post(submit_video).layer(DefaultBodyLimit::max(MAX_VIDEO_UPLOAD)),
        )
        .route("/videos/:id", get(job_detail))
        .route("/videos/:id/status", get(job_status))
        .route("/videos/:id/refresh", post(refresh_job))
        .route("/videos/:id/cancel", post(cancel_job))
        .route(
            "/images",
            get(image_history).post(process_image).layer(DefaultBodyLimit::max(MAX_IMAGE_UPLOAD)),
        )
        .route("/statistics", get(processing_statistics))
        .route("/health", get(detector_health))
        .route("/models", get(detector_models))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        other => Err(Error::Validation(format!("Invalid value for {}: {}", name, other))),
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("Invalid value for {}: {}", name, value)))
}

fn parse_priority(value: &str) -> Result<JobPriority, Error> {
    let value = value.trim();
    if let Ok(wire) = value.parse::<i16>() {
        return JobPriority::from_wire(wire)
            .ok_or_else(|| Error::Validation(format!("Invalid priority: {}", value)));
    }
    serde_json::from_value(Value::String(value.to_ascii_lowercase()))
        .map_err(|_| Error::Validation(format!("Invalid priority: {}", value)))
}

/// Video options from form fields; unknown fields pass through to the detector
pub fn video_params(fields: BTreeMap<String, String>) -> Result<VideoParams, Error> {
    let mut params = VideoParams::default();
    for (name, value) in fields {
        match name.as_str() {
            "confidence_threshold" => params.confidence_threshold = parse_number(&name, &value)?,
            "frame_sample_rate" => params.frame_sample_rate = parse_number(&name, &value)?,
            "analyze_motion" => params.analyze_motion = parse_flag(&name, &value)?,
            "return_summary_only" => params.return_summary_only = parse_flag(&name, &value)?,
            "enable_advanced_features" => params.enable_advanced_features = parse_flag(&name, &value)?,
            "priority" => params.priority = parse_priority(&value)?,
            "crowd_detection" => params.crowd_detection = parse_flag(&name, &value)?,
            "min_people_count" => params.min_people_count = parse_number(&name, &value)?,
            "vehicle_counting" => params.vehicle_counting = parse_flag(&name, &value)?,
            "counting_line_position" => params.counting_line_position = parse_number(&name, &value)?,
            _ => {
                params.extra.insert(name, value);
            }
        }
    }
    Ok(params)
}

pub fn image_params(fields: BTreeMap<String, String>) -> Result<ImageParams, Error> {
    let mut params = ImageParams::default();
    for (name, value) in fields {
        match name.as_str() {
            "confidence_threshold" => params.confidence_threshold = parse_number(&name, &value)?,
            "return_image" => params.return_image = parse_flag(&name, &value)?,
            "detection_types" => params.detection_types = value,
            "enable_advanced_features" => params.enable_advanced_features = parse_flag(&name, &value)?,
            _ => {
                params.extra.insert(name, value);
            }
        }
    }
    Ok(params)
}

async fn submit_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<VideoProcessingJob>)> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let params = video_params(form.fields)?;

    let job = state.jobs.submit(&user, upload, params).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn list_jobs(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<JobListParams>,
) -> ApiResult<Json<Vec<VideoProcessingJob>>> {
    let status = params
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(Error::Validation)?;
    Ok(Json(state.jobs.list(&user, status, params.limit).await?))
}

async fn job_detail(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobDetail>> {
    Ok(Json(state.jobs.detail(&id, &user).await?))
}

async fn job_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusReport>> {
    Ok(Json(state.jobs.job_status_report(&id, &user).await?))
}

async fn refresh_job(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobDetail>> {
    Ok(Json(state.jobs.refresh(&id, &user).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<VideoProcessingJob>> {
    Ok(Json(state.jobs.cancel(&id, &user).await?))
}

async fn process_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<ImageProcessingResult>> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let params = image_params(form.fields)?;

    Ok(Json(state.jobs.process_image(&user, upload, params).await?))
}

async fn image_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<ImageProcessingResult>>> {
    Ok(Json(state.jobs.image_history(&user, params.limit).await?))
}

async fn processing_statistics(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<StatisticsParams>,
) -> ApiResult<Json<ProcessingStatistics>> {
    if !user.role.can_view_analytics() {
        return Err(Error::Authorization("Staff access required".to_string()).into());
    }
    let date = params.date.unwrap_or_else(|| state.incidents.today());
    Ok(Json(state.jobs.processing_statistics(date).await?))
}

async fn detector_health(State(state): State<AppState>, AuthUser(_user): AuthUser) -> Json<HealthStatus> {
    Json(state.jobs.detector().check_health().await)
}

async fn detector_models(State(state): State<AppState>, AuthUser(_user): AuthUser) -> Json<Vec<Value>> {
    Json(state.jobs.detector().available_models().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn video_fields_override_defaults() {
        let params = video_params(fields(&[
            ("confidence_threshold", "0.7"),
            ("crowd_detection", "true"),
            ("min_people_count", "10"),
            ("priority", "high"),
            ("zone", "north"),
        ]))
        .unwrap();

        assert_eq!(params.confidence_threshold, 0.7);
        assert!(params.crowd_detection);
        assert_eq!(params.min_people_count, 10);
        assert_eq!(params.priority, JobPriority::High);
        assert_eq!(params.frame_sample_rate, 5);
        assert_eq!(params.extra.get("zone").map(String::as_str), Some("north"));
    }

    #[test]
    fn numeric_priority_uses_wire_values() {
        let params = video_params(fields(&[("priority", "3")])).unwrap();
        assert_eq!(params.priority, JobPriority::Urgent);
        assert!(video_params(fields(&[("priority", "9")])).is_err());
        assert!(video_params(fields(&[("priority", "soon")])).is_err());
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            video_params(fields(&[("frame_sample_rate", "fast")])),
            Err(Error::Validation(_))
        ));
        assert!(image_params(fields(&[("return_image", "maybe")])).is_err());
    }

    #[test]
    fn image_fields() {
        let params = image_params(fields(&[
            ("detection_types", "person"),
            ("return_image", "1"),
        ]))
        .unwrap();
        assert_eq!(params.detection_types, "person");
        assert!(params.return_image);
        assert!(params.extra.is_empty());
    }
}
