use crate::api::rest::{merge_json, ApiResult, AppState, AuthUser};
use crate::db::models::alert_models::{Alert, AlertRule, NotificationPreference, TriggerType};
use crate::db::models::user_models::User;
use crate::error::Error;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_ALERT_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub limit: Option<i64>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(my_alerts))
        .route("/unread", get(unread_alerts))
        .route("/unread/count", get(unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/:id/read", post(mark_read))
        .route("/:id/retry", post(retry_alert))
        .route("/preferences", get(get_preferences).put(update_preferences))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/:id", get(get_rule).put(update_rule).delete(delete_rule))
}

fn require_rule_access(user: &User) -> Result<(), Error> {
    if user.role.can_manage_cases() {
        Ok(())
    } else {
        Err(Error::Authorization("Only staff can manage alert rules".to_string()))
    }
}

async fn my_alerts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<RecentParams>,
) -> ApiResult<Json<Vec<Alert>>> {
    let limit = params.limit.unwrap_or(DEFAULT_ALERT_LIMIT).clamp(1, 200);
    Ok(Json(state.alerts.recent(&user, limit).await?))
}

async fn unread_alerts(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Json<Vec<Alert>>> {
    Ok(Json(state.alerts.unread(&user).await?))
}

async fn unread_count(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Json<Value>> {
    let count = state.alerts.unread_count(&user).await?;
    Ok(Json(json!({ "count": count })))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    Ok(Json(state.alerts.mark_read(&user, &id).await?))
}

async fn mark_all_read(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Json<Value>> {
    let updated = state.alerts.mark_all_read(&user).await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn retry_alert(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    Ok(Json(state.alerts.retry_alert(&user, &id).await?))
}

async fn get_preferences(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<NotificationPreference>> {
    Ok(Json(state.alerts.preference(&user).await?))
}

async fn update_preferences(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<Value>,
) -> ApiResult<Json<NotificationPreference>> {
    let current = state.alerts.preference(&user).await?;
    let mut preference: NotificationPreference =
        merge_json(serde_json::to_value(&current).map_err(Error::from)?, body)?;
    preference.created_at = current.created_at;
    preference.updated_at = Utc::now();
    Ok(Json(state.alerts.update_preference(&user, preference).await?))
}

async fn list_rules(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Json<Vec<AlertRule>>> {
    require_rule_access(&user)?;
    Ok(Json(state.alerts.rules().await?))
}

async fn get_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AlertRule>> {
    require_rule_access(&user)?;
    Ok(Json(state.alerts.rule(&id).await?))
}

async fn create_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<AlertRule>)> {
    let template = AlertRule::new("", TriggerType::IncidentSeverity, "");
    let mut rule: AlertRule = merge_json(serde_json::to_value(&template).map_err(Error::from)?, body)?;
    rule.id = template.id;
    rule.created_at = template.created_at;
    rule.updated_at = template.updated_at;

    let rule = state.alerts.save_rule(&user, rule, false).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<Json<AlertRule>> {
    let existing = state.alerts.rule(&id).await?;
    let mut rule: AlertRule = merge_json(serde_json::to_value(&existing).map_err(Error::from)?, body)?;
    rule.id = existing.id;
    rule.created_at = existing.created_at;
    rule.updated_at = Utc::now();

    Ok(Json(state.alerts.save_rule(&user, rule, true).await?))
}

async fn delete_rule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.alerts.delete_rule(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
