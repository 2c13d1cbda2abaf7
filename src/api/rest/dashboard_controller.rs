use crate::api::rest::{ApiResult, AppState, AuthUser};
use crate::notifications::ContactMessage;
use crate::services::dashboard::Dashboard;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use log::info;
use serde_json::{json, Value};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/api/dashboard", get(dashboard))
        .route("/api/contact", post(contact))
}

async fn dashboard(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Json<Dashboard>> {
    Ok(Json(state.dashboard.summary(&user).await?))
}

/// Public contact form
async fn contact(
    State(state): State<AppState>,
    Json(message): Json<ContactMessage>,
) -> ApiResult<Json<Value>> {
    state.notifier.send_contact(&message).await?;
    info!("Contact form received from {}", message.email);
    Ok(Json(json!({
        "message": "Thank you for your message. We will get back to you soon."
    })))
}
