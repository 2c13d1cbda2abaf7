use crate::api::rest::{ApiResult, AppState, AuthUser};
use crate::db::models::user_models::{
    AuthToken, Invitation, LoginCredentials, RegistrationRequest, User, UserRole,
};
use crate::error::Error;
use crate::security::auth::InvitationRequest;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post, put};
use axum::Router;
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token plus the account it belongs to
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub token: AuthToken,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

/// What the registration page shows for a pending invitation
#[derive(Debug, Serialize)]
pub struct InvitationPreview {
    pub email: String,
    pub role: UserRole,
    pub institution: String,
    pub department: String,
}

impl From<Invitation> for InvitationPreview {
    fn from(invitation: Invitation) -> Self {
        Self {
            email: invitation.email,
            role: invitation.role,
            institution: invitation.institution,
            department: invitation.department,
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/register/:token", get(preview_invitation))
        .route("/password-reset", post(request_password_reset))
        .route("/password-reset/confirm", post(confirm_password_reset))
        .route("/change-password", post(change_password))
        .route("/me", get(me))
        .route("/users", get(list_users))
        .route("/users/:id/role", put(update_role))
        .route("/users/:id/active", put(set_active))
        .route("/invitations", get(list_invitations).post(invite))
        .route("/invitations/:id", delete(revoke_invitation))
}

async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<LoginCredentials>,
) -> ApiResult<Json<SessionResponse>> {
    let (user, token) = state.auth_service.login(&credentials).await?;
    Ok(Json(SessionResponse { user, token }))
}

async fn preview_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<InvitationPreview>> {
    let invitation = state.auth_service.valid_invitation(&token).await?;
    Ok(Json(invitation.into()))
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegistrationRequest>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let (user, token) = state.auth_service.register(request).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse { user, token })))
}

async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> ApiResult<StatusCode> {
    state.auth_service.request_password_reset(&request.email).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(request): Json<ResetConfirmRequest>,
) -> ApiResult<StatusCode> {
    state
        .auth_service
        .confirm_password_reset(&request.token, &request.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    state
        .auth_service
        .change_password(&user.id, &request.current_password, &request.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

async fn list_users(State(state): State<AppState>, AuthUser(actor): AuthUser) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.auth_service.list_users(&actor).await?))
}

async fn update_role(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RoleRequest>,
) -> ApiResult<Json<User>> {
    let user = state.auth_service.update_role(&actor, &id, request.role).await?;
    Ok(Json(user))
}

async fn set_active(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ActiveRequest>,
) -> ApiResult<Json<User>> {
    let user = state.auth_service.set_active(&actor, &id, request.active).await?;
    Ok(Json(user))
}

async fn list_invitations(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<Json<Vec<Invitation>>> {
    if !actor.role.can_invite_users() {
        return Err(Error::Authorization("Only administrators can view invitations".to_string()).into());
    }
    Ok(Json(state.auth_service.invitations().await?))
}

async fn invite(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(request): Json<InvitationRequest>,
) -> ApiResult<(StatusCode, Json<Invitation>)> {
    let invitation = state.auth_service.invite(&actor, request).await?;
    info!("{} invited {} as {}", actor.email, invitation.email, invitation.role);
    Ok((StatusCode::CREATED, Json(invitation)))
}

async fn revoke_invitation(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.auth_service.revoke_invitation(&actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
