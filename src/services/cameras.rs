use crate::db::models::camera_models::{
    Camera, CameraGroup, CameraGroupDetail, CameraHealthLog, CameraStatistics, CameraStatus,
    CameraSummary, Location,
};
use crate::db::models::user_models::User;
use crate::db::repositories::cameras::CamerasRepository;
use crate::error::Error;
use crate::messaging::EventPublisher;
use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;

const CAMERA_TYPES: [&str; 7] = ["ip", "cctv", "usb", "thermal", "ptz", "dome", "bullet"];
const PROTOCOLS: [&str; 4] = ["rtsp", "http", "https", "onvif"];
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HEALTH_LOG_LIMIT: i64 = 100;

/// Group create/update payload
#[derive(Debug, Clone, Deserialize)]
pub struct GroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub camera_ids: Vec<Uuid>,
}

/// Host and port a camera should accept connections on.
/// The configured IP wins over the stream URL host; the URL port wins over the camera port.
pub fn health_check_address(camera: &Camera) -> Option<(String, u16)> {
    let default_port = u16::try_from(camera.port).ok()?;
    if let Some(ip) = camera.ip_address.as_deref().map(str::trim).filter(|ip| !ip.is_empty()) {
        return Some((ip.to_string(), default_port));
    }

    let url = Url::parse(&camera.stream_url).ok()?;
    let host = url
        .host_str()?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    Some((host, url.port().unwrap_or(default_port)))
}

fn require_staff(user: &User) -> Result<(), Error> {
    if user.role.can_manage_cases() {
        Ok(())
    } else {
        Err(Error::Authorization("Only staff can manage cameras".to_string()))
    }
}

pub fn validate_location(location: &Location) -> Result<(), Error> {
    if location.name.trim().is_empty() {
        return Err(Error::Validation("Location name is required".to_string()));
    }
    if !(1..=5).contains(&location.security_level) {
        return Err(Error::Validation("Security level must be between 1 and 5".to_string()));
    }
    if let Some(lat) = location.latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::Validation(format!("Invalid latitude: {}", lat)));
        }
    }
    if let Some(lon) = location.longitude {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::Validation(format!("Invalid longitude: {}", lon)));
        }
    }
    Ok(())
}

pub fn validate_camera(camera: &Camera) -> Result<(), Error> {
    if camera.name.trim().is_empty() {
        return Err(Error::Validation("Camera name is required".to_string()));
    }
    if !CAMERA_TYPES.contains(&camera.camera_type.as_str()) {
        return Err(Error::Validation(format!("Unknown camera type: {}", camera.camera_type)));
    }
    if !PROTOCOLS.contains(&camera.connection_protocol.as_str()) {
        return Err(Error::Validation(format!(
            "Unknown connection protocol: {}",
            camera.connection_protocol
        )));
    }
    if !(1..=65535).contains(&camera.port) {
        return Err(Error::Validation(format!("Invalid port: {}", camera.port)));
    }
    if !(1..=120).contains(&camera.fps) {
        return Err(Error::Validation(format!("Invalid frame rate: {}", camera.fps)));
    }
    if !camera.stream_url.is_empty() {
        Url::parse(&camera.stream_url)
            .map_err(|e| Error::Validation(format!("Invalid stream URL: {}", e)))?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct CameraService {
    cameras: CamerasRepository,
    publisher: EventPublisher,
}

impl CameraService {
    pub fn new(pool: Arc<PgPool>, publisher: EventPublisher) -> Self {
        Self {
            cameras: CamerasRepository::new(pool),
            publisher,
        }
    }

    pub async fn locations(&self) -> Result<Vec<Location>> {
        self.cameras.get_all_locations().await
    }

    pub async fn location(&self, id: &Uuid) -> Result<Location> {
        let location = self
            .cameras
            .get_location(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Location {} not found", id)))?;
        Ok(location)
    }

    pub async fn create_location(&self, actor: &User, location: Location) -> Result<Location> {
        require_staff(actor)?;
        validate_location(&location)?;
        self.cameras.create_location(&location).await
    }

    pub async fn update_location(&self, actor: &User, location: Location) -> Result<Location> {
        require_staff(actor)?;
        validate_location(&location)?;
        self.location(&location.id).await?;
        self.cameras.update_location(&location).await
    }

    pub async fn delete_location(&self, actor: &User, id: &Uuid) -> Result<()> {
        require_staff(actor)?;
        if !self.cameras.delete_location(id).await? {
            return Err(Error::NotFound(format!("Location {} not found", id)).into());
        }
        Ok(())
    }

    pub async fn list(&self, status: Option<CameraStatus>) -> Result<Vec<CameraSummary>> {
        self.cameras.get_all(status).await
    }

    pub async fn get(&self, id: &Uuid) -> Result<Camera> {
        let camera = self
            .cameras
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", id)))?;
        Ok(camera)
    }

    pub async fn create(&self, actor: &User, camera: Camera) -> Result<Camera> {
        require_staff(actor)?;
        validate_camera(&camera)?;
        self.location(&camera.location_id).await?;

        let camera = self.cameras.create(&camera).await?;
        info!("Camera {} added at location {}", camera.name, camera.location_id);
        Ok(camera)
    }

    /// Update camera settings. Status changes go through [`CameraService::set_status`].
    pub async fn update(&self, actor: &User, mut camera: Camera) -> Result<Camera> {
        require_staff(actor)?;
        validate_camera(&camera)?;
        let existing = self.get(&camera.id).await?;
        if existing.location_id != camera.location_id {
            self.location(&camera.location_id).await?;
        }
        if camera.password.is_empty() {
            camera.password = existing.password;
        }
        camera.status = existing.status;
        camera.updated_at = Utc::now();
        self.cameras.update(&camera).await
    }

    pub async fn delete(&self, actor: &User, id: &Uuid) -> Result<()> {
        require_staff(actor)?;
        if !self.cameras.delete(id).await? {
            return Err(Error::NotFound(format!("Camera {} not found", id)).into());
        }
        info!("Camera {} deleted by {}", id, actor.email);
        Ok(())
    }

    /// Change status and announce it when it actually changed
    pub async fn set_status(&self, id: &Uuid, status: CameraStatus) -> Result<Camera> {
        let previous = self
            .cameras
            .update_status(id, status)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", id)))?;

        if previous != status {
            info!("Camera {} status {} -> {}", id, previous, status);
            if let Err(e) = self.publisher.camera_status_changed(*id, previous, status).await {
                warn!("Failed to publish camera status for {}: {}", id, e);
            }
        }

        self.get(id).await
    }

    pub async fn statistics(&self) -> Result<CameraStatistics> {
        self.cameras.statistics().await
    }

    pub async fn groups(&self) -> Result<Vec<CameraGroup>> {
        self.cameras.get_groups().await
    }

    async fn group(&self, id: &Uuid) -> Result<CameraGroup> {
        let group = self
            .cameras
            .get_group(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera group {} not found", id)))?;
        Ok(group)
    }

    pub async fn group_detail(&self, id: &Uuid) -> Result<CameraGroupDetail> {
        let group = self.group(id).await?;
        let cameras = self.cameras.group_cameras(&group.id).await?;
        Ok(CameraGroupDetail::new(group, cameras))
    }

    async fn validate_group(&self, request: &GroupRequest) -> Result<()> {
        if request.name.trim().is_empty() {
            return Err(Error::Validation("Group name is required".to_string()).into());
        }
        for camera_id in &request.camera_ids {
            self.get(camera_id).await?;
        }
        Ok(())
    }

    pub async fn create_group(&self, actor: &User, request: GroupRequest) -> Result<CameraGroup> {
        require_staff(actor)?;
        self.validate_group(&request).await?;

        let mut group = CameraGroup::new(request.name.trim());
        group.description = request.description;
        group.camera_ids = request.camera_ids;
        self.cameras.create_group(&group).await
    }

    pub async fn update_group(&self, actor: &User, id: &Uuid, request: GroupRequest) -> Result<CameraGroup> {
        require_staff(actor)?;
        self.validate_group(&request).await?;

        let mut group = self.group(id).await?;
        group.name = request.name.trim().to_string();
        group.description = request.description;
        group.camera_ids = request.camera_ids;
        self.cameras.update_group(&group).await
    }

    pub async fn delete_group(&self, actor: &User, id: &Uuid) -> Result<()> {
        require_staff(actor)?;
        if !self.cameras.delete_group(id).await? {
            return Err(Error::NotFound(format!("Camera group {} not found", id)).into());
        }
        Ok(())
    }

    /// Try a TCP connection to the camera, record the result and update its status.
    /// Cameras under maintenance keep their status.
    pub async fn check_health(&self, actor: &User, id: &Uuid) -> Result<CameraHealthLog> {
        require_staff(actor)?;
        let camera = self.get(id).await?;

        let log = match health_check_address(&camera) {
            None => CameraHealthLog::unreachable(camera.id, vec!["No address configured".to_string()]),
            Some((host, port)) => {
                let started = Instant::now();
                match timeout(HEALTH_CHECK_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
                    Ok(Ok(_)) => {
                        CameraHealthLog::reachable(camera.id, started.elapsed().as_secs_f64() * 1000.0)
                    }
                    Ok(Err(e)) => CameraHealthLog::unreachable(
                        camera.id,
                        vec![format!("Connection to {}:{} failed: {}", host, port, e)],
                    ),
                    Err(_) => CameraHealthLog::unreachable(
                        camera.id,
                        vec![format!("Connection to {}:{} timed out", host, port)],
                    ),
                }
            }
        };

        let log = self.cameras.add_health_log(&log).await?;
        if camera.status != CameraStatus::Maintenance {
            self.set_status(&camera.id, log.status).await?;
        }
        info!(
            "Health check of {}: {} ({:.0} ms)",
            camera.name, log.status, log.response_time
        );
        Ok(log)
    }

    /// Newest first
    pub async fn health_logs(&self, id: &Uuid, limit: Option<i64>) -> Result<Vec<CameraHealthLog>> {
        let camera = self.get(id).await?;
        let limit = limit.unwrap_or(DEFAULT_HEALTH_LOG_LIMIT).clamp(1, 1000);
        self.cameras.health_logs(&camera.id, limit).await
    }
}
