use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Physical place a camera or report refers to
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    pub location_type: String,
    pub description: String,
    pub address: String,
    pub floor: String,
    pub room_number: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub institution: String,
    pub is_restricted: bool,
    /// 1 (low) to 5 (maximum)
    pub security_level: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Location {
    pub fn new(name: &str, location_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            location_type: location_type.to_string(),
            description: String::new(),
            address: String::new(),
            floor: String::new(),
            room_number: String::new(),
            latitude: None,
            longitude: None,
            institution: "University of Nigeria".to_string(),
            is_restricted: false,
            security_level: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Human readable "name, floor, room" string
    pub fn display_name(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if !self.floor.is_empty() {
            parts.push(format!("Floor {}", self.floor));
        }
        if !self.room_number.is_empty() {
            parts.push(format!("Room {}", self.room_number));
        }
        parts.join(", ")
    }
}

/// Camera status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "camera_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Active,
    Inactive,
    Maintenance,
    Offline,
    Error,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Active => "active",
            CameraStatus::Inactive => "inactive",
            CameraStatus::Maintenance => "maintenance",
            CameraStatus::Offline => "offline",
            CameraStatus::Error => "error",
        }
    }

    /// Statuses that should raise a camera alert
    pub fn is_fault(&self) -> bool {
        matches!(self, CameraStatus::Offline | CameraStatus::Error)
    }
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CameraStatus::Active),
            "inactive" => Ok(CameraStatus::Inactive),
            "maintenance" => Ok(CameraStatus::Maintenance),
            "offline" => Ok(CameraStatus::Offline),
            "error" => Ok(CameraStatus::Error),
            other => Err(format!("Unknown camera status: {}", other)),
        }
    }
}

/// Camera model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Camera {
    pub id: Uuid,
    pub name: String,
    pub location_id: Uuid,
    /// ip, cctv, usb, thermal, ptz, dome or bullet
    pub camera_type: String,
    pub status: CameraStatus,
    /// rtsp, http, https or onvif
    pub connection_protocol: String,
    pub stream_url: String,
    pub ip_address: Option<String>,
    pub port: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub resolution: String,
    pub fps: i32,
    pub has_night_vision: bool,
    pub has_audio: bool,
    pub is_active: bool,
    pub motion_detection_enabled: bool,
    pub recording_enabled: bool,
    pub detection_zones: serde_json::Value,
    pub manufacturer: String,
    pub model: String,
    pub last_maintenance: Option<NaiveDate>,
    pub next_maintenance: Option<NaiveDate>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Camera {
    pub fn new(name: &str, location_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            location_id,
            camera_type: "ip".to_string(),
            status: CameraStatus::Inactive,
            connection_protocol: "rtsp".to_string(),
            stream_url: String::new(),
            ip_address: None,
            port: 554,
            username: String::new(),
            password: String::new(),
            resolution: "1920x1080".to_string(),
            fps: 30,
            has_night_vision: false,
            has_audio: false,
            is_active: true,
            motion_detection_enabled: true,
            recording_enabled: true,
            detection_zones: serde_json::json!([]),
            manufacturer: String::new(),
            model: String::new(),
            last_maintenance: None,
            next_maintenance: None,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stream URL with credentials inserted after the scheme
    pub fn authenticated_stream_url(&self) -> String {
        if self.username.is_empty() {
            return self.stream_url.clone();
        }
        match self.stream_url.split_once("://") {
            Some((scheme, rest)) => {
                format!("{}://{}:{}@{}", scheme, self.username, self.password, rest)
            }
            None => self.stream_url.clone(),
        }
    }
}

/// Camera with its location name, as listed by the API
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CameraSummary {
    pub id: Uuid,
    pub name: String,
    pub status: CameraStatus,
    pub location_id: Uuid,
    pub location_name: String,
    pub is_active: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Count of cameras per status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraStatistics {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub maintenance: i64,
    pub offline: i64,
    pub error: i64,
}

impl CameraStatistics {
    pub fn add(&mut self, status: CameraStatus, count: i64) {
        self.total += count;
        match status {
            CameraStatus::Active => self.active += count,
            CameraStatus::Inactive => self.inactive += count,
            CameraStatus::Maintenance => self.maintenance += count,
            CameraStatus::Offline => self.offline += count,
            CameraStatus::Error => self.error += count,
        }
    }
}

/// Named set of cameras, e.g. a building or the perimeter
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CameraGroup {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub camera_ids: Vec<Uuid>,
}

impl CameraGroup {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            camera_ids: Vec::new(),
        }
    }
}

/// A group with its members split by health
#[derive(Debug, Clone, Serialize)]
pub struct CameraGroupDetail {
    #[serde(flatten)]
    pub group: CameraGroup,
    pub cameras: Vec<CameraSummary>,
    pub active_cameras: Vec<CameraSummary>,
    pub offline_cameras: Vec<CameraSummary>,
}

impl CameraGroupDetail {
    /// Active means enabled and streaming; offline covers offline and error
    pub fn new(group: CameraGroup, cameras: Vec<CameraSummary>) -> Self {
        let active_cameras = cameras
            .iter()
            .filter(|c| c.is_active && c.status == CameraStatus::Active)
            .cloned()
            .collect();
        let offline_cameras = cameras.iter().filter(|c| c.status.is_fault()).cloned().collect();
        Self {
            group,
            cameras,
            active_cameras,
            offline_cameras,
        }
    }
}

pub const HEALTHY_UPTIME: f64 = 95.0;
pub const HEALTHY_PACKET_LOSS: f64 = 5.0;
/// Milliseconds
pub const HEALTHY_RESPONSE_TIME: f64 = 1000.0;

/// One connectivity measurement of a camera
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CameraHealthLog {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub status: CameraStatus,
    pub uptime_percentage: f64,
    pub packet_loss: f64,
    /// Mbps
    pub bandwidth_usage: f64,
    /// Milliseconds
    pub response_time: f64,
    pub storage_usage: f64,
    pub errors: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl CameraHealthLog {
    /// The camera answered after `response_ms`
    pub fn reachable(camera_id: Uuid, response_ms: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id,
            status: CameraStatus::Active,
            uptime_percentage: 100.0,
            packet_loss: 0.0,
            bandwidth_usage: 0.0,
            response_time: response_ms,
            storage_usage: 0.0,
            errors: serde_json::json!([]),
            recorded_at: Utc::now(),
        }
    }

    /// The camera did not answer
    pub fn unreachable(camera_id: Uuid, errors: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id,
            status: CameraStatus::Offline,
            uptime_percentage: 0.0,
            packet_loss: 100.0,
            bandwidth_usage: 0.0,
            response_time: 9999.0,
            storage_usage: 0.0,
            errors: serde_json::json!(errors),
            recorded_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.uptime_percentage >= HEALTHY_UPTIME
            && self.packet_loss <= HEALTHY_PACKET_LOSS
            && self.response_time <= HEALTHY_RESPONSE_TIME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_inserted_after_scheme() {
        let mut camera = Camera::new("Gate", Uuid::new_v4());
        camera.stream_url = "rtsp://10.0.0.5:554/stream1".into();
        assert_eq!(camera.authenticated_stream_url(), "rtsp://10.0.0.5:554/stream1");

        camera.username = "admin".into();
        camera.password = "pw".into();
        assert_eq!(camera.authenticated_stream_url(), "rtsp://admin:pw@10.0.0.5:554/stream1");
    }

    #[test]
    fn only_offline_and_error_are_faults() {
        assert!(CameraStatus::Offline.is_fault());
        assert!(CameraStatus::Error.is_fault());
        assert!(!CameraStatus::Maintenance.is_fault());
        assert_eq!("maintenance".parse::<CameraStatus>().unwrap(), CameraStatus::Maintenance);
    }

    #[test]
    fn statistics_accumulate_by_status() {
        let mut stats = CameraStatistics::default();
        stats.add(CameraStatus::Active, 3);
        stats.add(CameraStatus::Offline, 1);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.offline, 1);
    }

    fn summary(status: CameraStatus, is_active: bool) -> CameraSummary {
        CameraSummary {
            id: Uuid::new_v4(),
            name: format!("{} camera", status),
            status,
            location_id: Uuid::new_v4(),
            location_name: "Library".into(),
            is_active,
            last_seen: None,
        }
    }

    #[test]
    fn group_detail_splits_active_and_offline() {
        let detail = CameraGroupDetail::new(
            CameraGroup::new("Perimeter"),
            vec![
                summary(CameraStatus::Active, true),
                summary(CameraStatus::Active, false),
                summary(CameraStatus::Offline, true),
                summary(CameraStatus::Error, false),
                summary(CameraStatus::Maintenance, true),
            ],
        );
        assert_eq!(detail.cameras.len(), 5);
        assert_eq!(detail.active_cameras.len(), 1);
        assert_eq!(detail.offline_cameras.len(), 2);
    }

    #[test]
    fn health_thresholds() {
        let camera = Uuid::new_v4();
        assert!(CameraHealthLog::reachable(camera, 120.0).is_healthy());
        assert!(CameraHealthLog::reachable(camera, 1000.0).is_healthy());
        assert!(!CameraHealthLog::reachable(camera, 1500.0).is_healthy());

        let mut lossy = CameraHealthLog::reachable(camera, 50.0);
        lossy.packet_loss = 5.5;
        assert!(!lossy.is_healthy());

        let mut flaky = CameraHealthLog::reachable(camera, 50.0);
        flaky.uptime_percentage = 94.9;
        assert!(!flaky.is_healthy());

        let down = CameraHealthLog::unreachable(camera, vec!["Connection refused".into()]);
        assert_eq!(down.status, CameraStatus::Offline);
        assert!(!down.is_healthy());
        assert_eq!(down.errors[0], "Connection refused");
    }
}
