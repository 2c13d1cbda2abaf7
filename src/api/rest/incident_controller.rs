use crate::api::rest::{ApiResult, AppState, AuthUser, UploadForm};
use crate::db::models::incident_models::{
    Evidence, EvidenceType, Incident, IncidentComment, IncidentFilter, IncidentStatistics,
    IncidentUpdate, NewIncident,
};
use crate::error::Error;
use crate::services::incidents::{BulkActionRequest, BulkOutcome, IncidentDetail, Transition};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

const MAX_EVIDENCE_UPLOAD: usize = 100 * 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub is_false_positive: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct EscalateRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub comment: String,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    pub date: Option<NaiveDate>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(search_incidents).post(create_incident))
        .route("/statistics", get(daily_statistics))
        .route("/bulk", post(bulk_action))
        .route(
            "/:id",
            get(get_incident).put(update_incident).delete(delete_incident),
        )
        .route("/:id/acknowledge", post(acknowledge))
        .route("/:id/investigate", post(investigate))
        .route("/:id/resolve", post(resolve))
        .route("/:id/false-alarm", post(false_alarm))
        .route("/:id/escalate", post(escalate))
        .route("/:id/assign", put(assign))
        .route("/:id/comments", post(add_comment))
        .route(
            "/:id/evidence",
            get(list_evidence)
                .post(upload_evidence)
                .layer(DefaultBodyLimit::max(MAX_EVIDENCE_UPLOAD)),
        )
}

/// Empty means guess from the file name
fn parse_evidence_type(value: Option<String>) -> Result<Option<EvidenceType>, Error> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(Error::Validation),
    }
}

async fn search_incidents(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(filter): Query<IncidentFilter>,
) -> ApiResult<Json<Vec<Incident>>> {
    Ok(Json(state.incidents.search(&filter).await?))
}

async fn create_incident(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<NewIncident>,
) -> ApiResult<(StatusCode, Json<Incident>)> {
    let incident = state.incidents.create(Some(&user), request).await?;
    Ok((StatusCode::CREATED, Json(incident)))
}

async fn get_incident(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<IncidentDetail>> {
    Ok(Json(state.incidents.detail(&id, &user).await?))
}

async fn update_incident(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(update): Json<IncidentUpdate>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.incidents.update(&id, &user, update).await?))
}

async fn delete_incident(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.incidents.delete(&id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn acknowledge(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.incidents.transition(&id, &user, Transition::Acknowledge).await?))
}

async fn investigate(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.incidents.transition(&id, &user, Transition::Investigate).await?))
}

async fn resolve(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    request: Option<Json<ResolveRequest>>,
) -> ApiResult<Json<Incident>> {
    let ResolveRequest {
        notes,
        is_false_positive,
    } = request.map(|Json(r)| r).unwrap_or_default();
    let transition = Transition::Resolve {
        notes,
        is_false_positive,
    };
    Ok(Json(state.incidents.transition(&id, &user, transition).await?))
}

async fn false_alarm(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.incidents.transition(&id, &user, Transition::FalseAlarm).await?))
}

async fn escalate(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    request: Option<Json<EscalateRequest>>,
) -> ApiResult<Json<Incident>> {
    let reason = request.map(|Json(r)| r.reason).unwrap_or_default();
    Ok(Json(
        state
            .incidents
            .transition(&id, &user, Transition::Escalate { reason })
            .await?,
    ))
}

async fn assign(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.incidents.assign(&id, &user, request.assigned_to).await?))
}

async fn add_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<IncidentComment>)> {
    let comment = state
        .incidents
        .add_comment(&id, &user, &request.comment, request.is_internal)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn bulk_action(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<BulkActionRequest>,
) -> ApiResult<Json<BulkOutcome>> {
    Ok(Json(state.incidents.bulk_action(&user, request).await?))
}

async fn list_evidence(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Evidence>>> {
    Ok(Json(state.incidents.evidence(&id).await?))
}

async fn upload_evidence(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Evidence>)> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let evidence_type = parse_evidence_type(form.fields.remove("evidence_type"))?;
    let description = form.fields.remove("description").unwrap_or_default();

    let evidence = state
        .incidents
        .add_evidence(&id, &user, upload, evidence_type, &description)
        .await?;
    Ok((StatusCode::CREATED, Json(evidence)))
}

async fn daily_statistics(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<StatisticsParams>,
) -> ApiResult<Json<IncidentStatistics>> {
    if !user.role.can_view_analytics() {
        return Err(Error::Authorization("Staff access required".to_string()).into());
    }
    let date = params.date.unwrap_or_else(|| state.incidents.today());
    Ok(Json(state.incidents.daily_statistics(date).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_type_field_is_optional() {
        assert_eq!(parse_evidence_type(None).unwrap(), None);
        assert_eq!(parse_evidence_type(Some(" ".into())).unwrap(), None);
        assert_eq!(
            parse_evidence_type(Some("Document".into())).unwrap(),
            Some(EvidenceType::Document)
        );
        assert!(matches!(
            parse_evidence_type(Some("hologram".into())),
            Err(Error::Validation(_))
        ));
    }
}
