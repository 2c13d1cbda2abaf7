use crate::config::ApiConfig;
use crate::db::check_pool;
use crate::db::models::user_models::User;
use crate::detector::FileUpload;
use crate::error::Error;
use crate::jobs::JobService;
use crate::notifications::EmailNotifier;
use crate::security::AuthService;
use crate::services::{
    AlertService, CameraService, DashboardService, IncidentService, ReportService,
};
use anyhow::Result;
use axum::{
    extract::{FromRequestParts, Multipart, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::info;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub mod alert_controller;
pub mod auth_controller;
pub mod camera_controller;
pub mod dashboard_controller;
pub mod incident_controller;
pub mod job_controller;
pub mod report_controller;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: Arc<PgPool>,
    pub auth_service: Arc<AuthService>,
    pub incidents: IncidentService,
    pub cameras: CameraService,
    pub alerts: Arc<AlertService>,
    pub reports: ReportService,
    pub jobs: Arc<JobService>,
    pub dashboard: DashboardService,
    pub notifier: EmailNotifier,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Validation(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            Error::Authorization(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) | Error::InvalidTransition(_) => StatusCode::CONFLICT,
            Error::Detector(_) | Error::Email(_) => StatusCode::BAD_GATEWAY,
            Error::Api(_) | Error::Config(_) | Error::Database(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return err.clone().into();
        }

        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Authenticated caller, resolved from the `Authorization: Bearer` header
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

        let user = state.auth_service.authenticate(token).await?;
        Ok(AuthUser(user))
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Overlay the keys of a JSON object onto a serialisable base value.
/// Used for partial updates of records that have no dedicated patch type.
pub fn merge_json<T: DeserializeOwned>(mut base: Value, patch: Value) -> Result<T, Error> {
    let Value::Object(fields) = patch else {
        return Err(Error::Validation("Request body must be a JSON object".to_string()));
    };
    if let Value::Object(target) = &mut base {
        for (key, value) in fields {
            target.insert(key, value);
        }
    }
    serde_json::from_value(base).map_err(|e| Error::Validation(format!("Invalid request: {}", e)))
}

/// Multipart body split into the uploaded file (fields `file`, `image`,
/// `video` or `evidence`) and the remaining text fields
pub struct UploadForm {
    pub file: Option<FileUpload>,
    pub fields: BTreeMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = UploadForm {
            file: None,
            fields: BTreeMap::new(),
        };

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| Error::Validation(format!("Malformed upload: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if matches!(name.as_str(), "file" | "image" | "video" | "evidence") {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("Failed to read upload: {}", e)))?;
                form.file = Some(FileUpload::new(&filename, &content_type, bytes.to_vec()));
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| Error::Validation(format!("Invalid form field {}: {}", name, e)))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn take_file(&mut self) -> Result<FileUpload, Error> {
        self.file
            .take()
            .ok_or_else(|| Error::Validation("No file provided".to_string()))
    }
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            state,
        })
    }

    pub fn router(&self) -> Router {
        use std::time::Duration;
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        Router::new()
            .route("/health", get(health))
            .nest("/api/auth", auth_controller::create_router())
            .nest("/api/cameras", camera_controller::create_router())
            .nest("/api/locations", camera_controller::location_router())
            .nest("/api/incidents", incident_controller::create_router())
            .nest("/api/alerts", alert_controller::create_router())
            .nest("/api/reports", report_controller::create_router())
            .nest("/api/detection", job_controller::create_router())
            .merge(dashboard_controller::create_router())
            .with_state(self.state.clone())
            .layer(cors)
    }

    pub async fn run(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(self.router().into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = check_pool(&state.db_pool).await;
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "database": database,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
