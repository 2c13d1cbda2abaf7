//! HTTP client for the external computer vision service.
//!
//! All analysis happens remotely. Transport failures are retried according to
//! [`RetryPolicy`]; HTTP error statuses are returned as-is without retrying.

use crate::config::DetectorConfig;
use log::{debug, error, info, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub mod retry;
pub mod types;

#[cfg(test)]
mod tests;

pub use retry::{with_retry, AttemptError, RetryPolicy};
pub use types::{
    DetectionResult, FileUpload, HealthStatus, ImageParams, JobSubmission, ServerState,
    SnapshotResult, StatusSnapshot, VideoParams,
};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Detector returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid detector response: {0}")]
    InvalidResponse(String),

    #[error("Invalid detector request: {0}")]
    InvalidRequest(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Client for the detection service
#[derive(Clone)]
pub struct DetectorClient {
    http: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
    request_timeout: Duration,
    upload_timeout: Duration,
    status_timeout: Duration,
}

impl DetectorClient {
    /// Create a new detector client
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| DetectorError::Client(format!("invalid API key header: {}", e)))?;
        headers.insert("X-API-Key", key);

        let http = reqwest::Client::builder()
            .user_agent(concat!("campus-guard/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| DetectorError::Client(e.to_string()))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        info!("Detector client initialized with base URL: {}", base_url);

        Ok(Self {
            http,
            base_url,
            policy: RetryPolicy::from_config(config),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            upload_timeout: Duration::from_secs(config.video_upload_timeout_secs),
            status_timeout: Duration::from_secs(config.job_status_timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Send the request built by `build`, rebuilding it for every attempt
    async fn execute<F>(&self, build: F) -> Result<Response, DetectorError>
    where
        F: Fn() -> Result<RequestBuilder, DetectorError>,
    {
        let response = with_retry(&self.policy, |_| {
            let request = build();
            async move {
                match request {
                    Ok(request) => request.send().await.map_err(AttemptError::from),
                    Err(e) => Err(AttemptError::Transport(e.to_string())),
                }
            }
        })
        .await?;

        debug!("Detector response: {} {}", response.url(), response.status());
        Ok(response)
    }

    fn multipart(upload: &FileUpload, fields: Vec<(String, String)>) -> Result<Form, DetectorError> {
        let mut part = Part::bytes(upload.bytes.clone()).file_name(upload.filename.clone());
        if !upload.content_type.is_empty() {
            part = part
                .mime_str(&upload.content_type)
                .map_err(|e| DetectorError::InvalidRequest(e.to_string()))?;
        }

        let form = fields
            .into_iter()
            .fold(Form::new().part("file", part), |form, (key, value)| {
                form.text(key, value)
            });
        Ok(form)
    }

    async fn status_error(response: Response) -> DetectorError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        DetectorError::Status { status, body }
    }

    /// Analyse a single image synchronously
    pub async fn process_image(
        &self,
        upload: &FileUpload,
        params: &ImageParams,
    ) -> Result<DetectionResult, DetectorError> {
        let url = self.url("/api/v1/process/image");
        let response = self
            .execute(|| {
                let form = Self::multipart(upload, params.form_fields())?;
                Ok(self
                    .http
                    .post(&url)
                    .timeout(self.request_timeout)
                    .multipart(form))
            })
            .await?;

        if response.status() != StatusCode::OK {
            let err = Self::status_error(response).await;
            error!("Image processing failed: {}", err);
            return Err(err);
        }

        let mut result: DetectionResult = response
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;
        result.server_url = self.base_url.clone();
        Ok(result)
    }

    /// Submit a video for asynchronous analysis
    pub async fn submit_video_job(
        &self,
        upload: &FileUpload,
        params: &VideoParams,
    ) -> Result<JobSubmission, DetectorError> {
        let url = self.url("/api/v1/jobs/process/video");
        let response = self
            .execute(|| {
                let form = Self::multipart(upload, params.form_fields())?;
                Ok(self
                    .http
                    .post(&url)
                    .timeout(self.upload_timeout)
                    .multipart(form))
            })
            .await?;

        if response.status() != StatusCode::OK {
            let err = Self::status_error(response).await;
            error!("Video job submission failed: {}", err);
            return Err(err);
        }

        let mut submission: JobSubmission = response
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;
        submission.submitted_to = self.base_url.clone();
        info!("Submitted video job {} to {}", submission.job_id, self.base_url);
        Ok(submission)
    }

    /// Current status of a remote job. Never fails: problems are reported as
    /// a snapshot with status `error`.
    pub async fn get_job_status(&self, job_id: &str) -> StatusSnapshot {
        let url = self.url(&format!("/api/v1/jobs/{}/status", job_id));
        let response = match self
            .execute(|| Ok(self.http.get(&url).timeout(self.status_timeout)))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Error checking job status for {}: {}", job_id, e);
                return StatusSnapshot::error(e.to_string());
            }
        };

        match response.status() {
            StatusCode::OK => match response.json::<StatusSnapshot>().await {
                Ok(snapshot) => snapshot,
                Err(e) => StatusSnapshot::error(format!("Invalid status response: {}", e)),
            },
            StatusCode::NOT_FOUND => StatusSnapshot::error(format!(
                "Job {} not found on processing server",
                job_id
            )),
            _ => {
                let err = Self::status_error(response).await;
                let message = format!("Job status check failed: {}", err);
                error!("{}", message);
                StatusSnapshot::error(message)
            }
        }
    }

    /// Full results of a finished job
    pub async fn get_job_results(&self, job_id: &str) -> Result<Value, DetectorError> {
        let url = self.url(&format!("/api/v1/jobs/{}/results", job_id));
        let response = self
            .execute(|| Ok(self.http.get(&url).timeout(self.request_timeout)))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(Self::status_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))
    }

    /// Ask the service to cancel a job. Best effort: any failure yields `false`.
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let url = self.url(&format!("/api/v1/jobs/{}/cancel", job_id));
        match self
            .execute(|| Ok(self.http.post(&url).timeout(self.status_timeout)))
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                error!("Error cancelling job {}: {}", job_id, e);
                false
            }
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let url = self.url("/health");
        match self
            .execute(|| Ok(self.http.get(&url).timeout(self.status_timeout)))
            .await
        {
            Ok(response) if response.status() == StatusCode::OK => HealthStatus {
                healthy: true,
                status: ServerState::Online,
                response: response.json().await.ok(),
                error: None,
            },
            Ok(response) => HealthStatus {
                healthy: false,
                status: ServerState::Error,
                response: response.text().await.ok().map(Value::String),
                error: None,
            },
            Err(e) => {
                warn!("Detector health check failed: {}", e);
                HealthStatus {
                    healthy: false,
                    status: ServerState::Offline,
                    response: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Detection models offered by the service; empty on any failure
    pub async fn available_models(&self) -> Vec<Value> {
        let url = self.url("/api/v1/models");
        let response = match self
            .execute(|| Ok(self.http.get(&url).timeout(self.status_timeout)))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Error getting models: {}", e);
                return Vec::new();
            }
        };

        if response.status() != StatusCode::OK {
            warn!("Failed to get models: {}", response.status());
            return Vec::new();
        }

        match response.json::<Value>().await {
            Ok(Value::Array(models)) => models,
            Ok(Value::Object(map)) => match map.get("models") {
                Some(Value::Array(models)) => models.clone(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}
