use crate::error::Error;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of security event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "incident_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Motion,
    Person,
    Vehicle,
    Face,
    Weapon,
    Crowd,
    Loitering,
    Trespassing,
    AbandonedObject,
    Violence,
    UnauthorizedAccess,
    Theft,
    Vandalism,
    Other,
}

impl IncidentType {
    pub const ALL: [IncidentType; 14] = [
        IncidentType::Motion,
        IncidentType::Person,
        IncidentType::Vehicle,
        IncidentType::Face,
        IncidentType::Weapon,
        IncidentType::Crowd,
        IncidentType::Loitering,
        IncidentType::Trespassing,
        IncidentType::AbandonedObject,
        IncidentType::Violence,
        IncidentType::UnauthorizedAccess,
        IncidentType::Theft,
        IncidentType::Vandalism,
        IncidentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::Motion => "motion",
            IncidentType::Person => "person",
            IncidentType::Vehicle => "vehicle",
            IncidentType::Face => "face",
            IncidentType::Weapon => "weapon",
            IncidentType::Crowd => "crowd",
            IncidentType::Loitering => "loitering",
            IncidentType::Trespassing => "trespassing",
            IncidentType::AbandonedObject => "abandoned_object",
            IncidentType::Violence => "violence",
            IncidentType::UnauthorizedAccess => "unauthorized_access",
            IncidentType::Theft => "theft",
            IncidentType::Vandalism => "vandalism",
            IncidentType::Other => "other",
        }
    }

    /// Human readable label used in messages
    pub fn label(&self) -> &'static str {
        match self {
            IncidentType::Motion => "Motion Detected",
            IncidentType::Person => "Person Detected",
            IncidentType::Vehicle => "Vehicle Detected",
            IncidentType::Face => "Face Recognized",
            IncidentType::Weapon => "Weapon Detected",
            IncidentType::Crowd => "Crowd Detected",
            IncidentType::Loitering => "Loitering Detected",
            IncidentType::Trespassing => "Trespassing Detected",
            IncidentType::AbandonedObject => "Abandoned Object",
            IncidentType::Violence => "Violence Detected",
            IncidentType::UnauthorizedAccess => "Unauthorized Access",
            IncidentType::Theft => "Theft/Suspicious Activity",
            IncidentType::Vandalism => "Vandalism",
            IncidentType::Other => "Other",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IncidentType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown incident type: {}", s))
    }
}

/// Severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[sqlx(type_name = "incident_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IncidentSeverity {
    pub const ALL: [IncidentSeverity; 4] = [
        IncidentSeverity::Low,
        IncidentSeverity::Medium,
        IncidentSeverity::High,
        IncidentSeverity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSeverity::Low => "low",
            IncidentSeverity::Medium => "medium",
            IncidentSeverity::High => "high",
            IncidentSeverity::Critical => "critical",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IncidentSeverity::Low => "Low",
            IncidentSeverity::Medium => "Medium",
            IncidentSeverity::High => "High",
            IncidentSeverity::Critical => "Critical",
        }
    }

    /// 1 for low up to 4 for critical
    pub fn rank(&self) -> i32 {
        match self {
            IncidentSeverity::Low => 1,
            IncidentSeverity::Medium => 2,
            IncidentSeverity::High => 3,
            IncidentSeverity::Critical => 4,
        }
    }
}

impl fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IncidentSeverity::ALL
            .iter()
            .find(|level| level.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown severity: {}", s))
    }
}

/// Incident lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "incident_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Detected,
    Acknowledged,
    Investigating,
    Resolved,
    FalseAlarm,
    Escalated,
}

impl IncidentStatus {
    pub const ALL: [IncidentStatus; 6] = [
        IncidentStatus::Detected,
        IncidentStatus::Acknowledged,
        IncidentStatus::Investigating,
        IncidentStatus::Resolved,
        IncidentStatus::FalseAlarm,
        IncidentStatus::Escalated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Detected => "detected",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::FalseAlarm => "false_alarm",
            IncidentStatus::Escalated => "escalated",
        }
    }

    /// Resolved and false alarm incidents are closed
    pub fn is_open(&self) -> bool {
        !matches!(self, IncidentStatus::Resolved | IncidentStatus::FalseAlarm)
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IncidentStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown incident status: {}", s))
    }
}

/// Audit trail action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "incident_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IncidentAction {
    Created,
    Updated,
    Acknowledged,
    Assigned,
    Resolved,
    Escalated,
    CommentAdded,
    EvidenceAdded,
    StatusChanged,
    SeverityChanged,
    FalseAlarm,
}

/// Incident model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Incident {
    pub id: Uuid,
    /// Display identifier, e.g. `INC-20240101-0001`
    pub incident_id: String,
    pub title: String,
    pub description: String,
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    pub status: IncidentStatus,
    pub camera_id: Option<Uuid>,
    /// Set when the incident came from an uploaded video rather than a live camera
    pub source_video: Option<String>,
    pub location_description: String,
    pub gps_coordinates: String,
    pub confidence_score: f64,
    pub detection_metadata: serde_json::Value,
    pub assigned_to: Option<Uuid>,
    pub acknowledged_by: Option<Uuid>,
    pub resolved_by: Option<Uuid>,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub is_false_positive: bool,
    pub requires_police_report: bool,
    pub police_report_number: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// Materialise a new incident from its creation request
    pub fn from_new(new: NewIncident, incident_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id,
            title: new.title,
            description: new.description,
            incident_type: new.incident_type,
            severity: new.severity,
            status: IncidentStatus::Detected,
            camera_id: new.camera_id,
            source_video: new.source_video,
            location_description: new.location_description,
            gps_coordinates: String::new(),
            confidence_score: new.confidence_score.clamp(0.0, 1.0),
            detection_metadata: new.detection_metadata,
            assigned_to: new.assigned_to,
            acknowledged_by: None,
            resolved_by: None,
            detected_at: new.detected_at.unwrap_or(now),
            acknowledged_at: None,
            resolved_at: None,
            tags: new.tags,
            is_false_positive: false,
            requires_police_report: false,
            police_report_number: String::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn reject(&self, action: &str) -> Error {
        Error::InvalidTransition(format!(
            "Cannot {} incident {} in status {}",
            action, self.incident_id, self.status
        ))
    }

    pub fn can_be_acknowledged(&self) -> bool {
        self.status == IncidentStatus::Detected
    }

    pub fn can_be_resolved(&self) -> bool {
        matches!(
            self.status,
            IncidentStatus::Detected
                | IncidentStatus::Acknowledged
                | IncidentStatus::Investigating
                | IncidentStatus::Escalated
        )
    }

    pub fn acknowledge(&mut self, user: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        if !self.can_be_acknowledged() {
            return Err(self.reject("acknowledge"));
        }
        self.status = IncidentStatus::Acknowledged;
        self.acknowledged_by = Some(user);
        self.acknowledged_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn start_investigation(&mut self, user: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            IncidentStatus::Detected => {
                self.acknowledged_by = Some(user);
                self.acknowledged_at = Some(now);
            }
            IncidentStatus::Acknowledged => {}
            _ => return Err(self.reject("investigate")),
        }
        self.status = IncidentStatus::Investigating;
        if self.assigned_to.is_none() {
            self.assigned_to = Some(user);
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn resolve(
        &mut self,
        user: Uuid,
        notes: &str,
        is_false_positive: bool,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        if !self.can_be_resolved() {
            return Err(self.reject("resolve"));
        }
        self.status = IncidentStatus::Resolved;
        self.resolved_by = Some(user);
        self.resolved_at = Some(now);
        self.notes = notes.to_string();
        self.is_false_positive = is_false_positive;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_false_alarm(&mut self, user: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        if !self.status.is_open() {
            return Err(self.reject("mark as false alarm"));
        }
        self.status = IncidentStatus::FalseAlarm;
        self.resolved_by = Some(user);
        self.resolved_at = Some(now);
        self.is_false_positive = true;
        self.updated_at = now;
        Ok(())
    }

    pub fn escalate(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        if !self.status.is_open() {
            return Err(self.reject("escalate"));
        }
        self.status = IncidentStatus::Escalated;
        self.requires_police_report = true;
        self.updated_at = now;
        Ok(())
    }

    /// Minutes between detection and acknowledgement
    pub fn response_minutes(&self) -> Option<f64> {
        self.acknowledged_at
            .map(|at| (at - self.detected_at).num_seconds() as f64 / 60.0)
    }

    /// Minutes between detection and resolution
    pub fn resolution_minutes(&self) -> Option<f64> {
        self.resolved_at
            .map(|at| (at - self.detected_at).num_seconds() as f64 / 60.0)
    }
}

/// Request to create an incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIncident {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    #[serde(default)]
    pub camera_id: Option<Uuid>,
    #[serde(default)]
    pub source_video: Option<String>,
    #[serde(default)]
    pub location_description: String,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default = "empty_object")]
    pub detection_metadata: serde_json::Value,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub detected_at: Option<DateTime<Utc>>,
    /// Preassigned display id; generated as `INC-...` when absent
    #[serde(default)]
    pub display_id: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

/// Editable incident fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub incident_type: Option<IncidentType>,
    pub severity: Option<IncidentSeverity>,
    pub location_description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
    pub police_report_number: Option<String>,
}

/// Search criteria for incidents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<IncidentSeverity>,
    pub incident_type: Option<IncidentType>,
    pub camera_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Matched against title, description and display id
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IncidentComment {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub user_id: Uuid,
    pub comment: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IncidentActionLog {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: IncidentAction,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl IncidentActionLog {
    pub fn new(
        incident_id: Uuid,
        user_id: Option<Uuid>,
        action: IncidentAction,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id,
            user_id,
            action,
            details,
            created_at: Utc::now(),
        }
    }
}

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "mkv", "flv", "webm"];
const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "wav", "ogg", "m4a", "flac"];
const DOCUMENT_EXTENSIONS: [&str; 5] = ["pdf", "doc", "docx", "txt", "odt"];

/// Kind of file attached to an incident
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "evidence_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    #[default]
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Image => "image",
            EvidenceType::Video => "video",
            EvidenceType::Audio => "audio",
            EvidenceType::Document => "document",
            EvidenceType::Other => "other",
        }
    }

    /// Guess from a file name's extension
    pub fn from_filename(name: &str) -> Self {
        let extension = file_extension(name);
        let extension = extension.as_str();
        if IMAGE_EXTENSIONS.contains(&extension) {
            EvidenceType::Image
        } else if VIDEO_EXTENSIONS.contains(&extension) {
            EvidenceType::Video
        } else if AUDIO_EXTENSIONS.contains(&extension) {
            EvidenceType::Audio
        } else if DOCUMENT_EXTENSIONS.contains(&extension) {
            EvidenceType::Document
        } else {
            EvidenceType::Other
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(EvidenceType::Image),
            "video" => Ok(EvidenceType::Video),
            "audio" => Ok(EvidenceType::Audio),
            "document" => Ok(EvidenceType::Document),
            "other" => Ok(EvidenceType::Other),
            other => Err(format!("Unknown evidence type: {}", other)),
        }
    }
}

/// Lowercase extension without the dot, empty when there is none
fn file_extension(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Additional file attached to an incident by staff
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Evidence {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub evidence_type: EvidenceType,
    pub file_path: String,
    pub original_filename: String,
    pub file_size: i64,
    pub description: String,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

impl Evidence {
    pub fn extension(&self) -> String {
        file_extension(&self.original_filename)
    }

    pub fn is_image(&self) -> bool {
        IMAGE_EXTENSIONS.contains(&self.extension().as_str())
    }

    pub fn is_video(&self) -> bool {
        VIDEO_EXTENSIONS.contains(&self.extension().as_str())
    }
}

/// Aggregated incident figures for a single day
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentStatistics {
    pub date: Option<NaiveDate>,
    pub total_incidents: i64,
    pub by_type: HashMap<String, i64>,
    pub by_severity: HashMap<String, i64>,
    pub by_status: HashMap<String, i64>,
    pub avg_response_minutes: Option<f64>,
    pub avg_resolution_minutes: Option<f64>,
    pub false_positive_rate: f64,
    pub most_active_camera: Option<Uuid>,
}

impl IncidentStatistics {
    /// Compute statistics for `date` from the incidents detected on it
    pub fn from_incidents(date: NaiveDate, incidents: &[Incident]) -> Self {
        let mut stats = IncidentStatistics {
            date: Some(date),
            total_incidents: incidents.len() as i64,
            ..Default::default()
        };

        let mut camera_counts: HashMap<Uuid, i64> = HashMap::new();
        let mut response = Vec::new();
        let mut resolution = Vec::new();
        let mut false_positives = 0;

        for incident in incidents {
            *stats.by_type.entry(incident.incident_type.to_string()).or_default() += 1;
            *stats.by_severity.entry(incident.severity.to_string()).or_default() += 1;
            *stats.by_status.entry(incident.status.to_string()).or_default() += 1;

            if let Some(camera) = incident.camera_id {
                *camera_counts.entry(camera).or_default() += 1;
            }
            if let Some(minutes) = incident.response_minutes() {
                response.push(minutes);
            }
            if let Some(minutes) = incident.resolution_minutes() {
                resolution.push(minutes);
            }
            if incident.is_false_positive {
                false_positives += 1;
            }
        }

        stats.avg_response_minutes = average(&response);
        stats.avg_resolution_minutes = average(&resolution);
        if !incidents.is_empty() {
            stats.false_positive_rate = false_positives as f64 / incidents.len() as f64 * 100.0;
        }
        stats.most_active_camera = camera_counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(camera, _)| camera);

        stats
    }
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Format a daily display id such as `INC-20240101-0007`
pub fn format_daily_id(prefix: &str, date: NaiveDate, sequence: u32) -> String {
    format!("{}-{}-{:04}", prefix, date.format("%Y%m%d"), sequence)
}

/// Next sequence number after the highest id issued today
pub fn next_daily_sequence(last_id: Option<&str>) -> u32 {
    last_id
        .and_then(|id| id.rsplit('-').next())
        .and_then(|n| n.parse::<u32>().ok())
        .map(|n| n + 1)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn incident(status: IncidentStatus) -> Incident {
        let new = NewIncident {
            title: "Motion at gate".into(),
            description: String::new(),
            incident_type: IncidentType::Motion,
            severity: IncidentSeverity::Medium,
            camera_id: None,
            source_video: None,
            location_description: String::new(),
            confidence_score: 0.9,
            detection_metadata: serde_json::json!({}),
            assigned_to: None,
            tags: vec![],
            detected_at: None,
            display_id: None,
        };
        let mut incident = Incident::from_new(new, "INC-20240101-0001".into(), Utc::now());
        incident.status = status;
        incident
    }

    #[test]
    fn acknowledge_only_from_detected() {
        let user = Uuid::new_v4();
        let mut open = incident(IncidentStatus::Detected);
        open.acknowledge(user, Utc::now()).unwrap();
        assert_eq!(open.status, IncidentStatus::Acknowledged);
        assert_eq!(open.acknowledged_by, Some(user));

        let mut resolved = incident(IncidentStatus::Resolved);
        let err = resolved.acknowledge(user, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
        assert_eq!(resolved.status, IncidentStatus::Resolved);
    }

    #[test]
    fn investigation_assigns_when_unassigned() {
        let user = Uuid::new_v4();
        let mut inc = incident(IncidentStatus::Acknowledged);
        inc.start_investigation(user, Utc::now()).unwrap();
        assert_eq!(inc.status, IncidentStatus::Investigating);
        assert_eq!(inc.assigned_to, Some(user));

        let mut escalated = incident(IncidentStatus::Escalated);
        assert!(escalated.start_investigation(user, Utc::now()).is_err());
    }

    #[test]
    fn closed_incidents_reject_every_transition() {
        let user = Uuid::new_v4();
        for status in [IncidentStatus::Resolved, IncidentStatus::FalseAlarm] {
            let mut inc = incident(status);
            assert!(inc.acknowledge(user, Utc::now()).is_err());
            assert!(inc.start_investigation(user, Utc::now()).is_err());
            assert!(inc.resolve(user, "", false, Utc::now()).is_err());
            assert!(inc.mark_false_alarm(user, Utc::now()).is_err());
            assert!(inc.escalate(Utc::now()).is_err());
        }
    }

    #[test]
    fn escalated_incident_can_still_be_resolved() {
        let user = Uuid::new_v4();
        let mut inc = incident(IncidentStatus::Investigating);
        inc.escalate(Utc::now()).unwrap();
        assert!(inc.requires_police_report);
        inc.resolve(user, "handed to police", false, Utc::now()).unwrap();
        assert_eq!(inc.status, IncidentStatus::Resolved);
        assert_eq!(inc.notes, "handed to police");
    }

    #[test]
    fn false_alarm_flags_false_positive() {
        let mut inc = incident(IncidentStatus::Detected);
        inc.mark_false_alarm(Uuid::new_v4(), Utc::now()).unwrap();
        assert!(inc.is_false_positive);
        assert!(!inc.status.is_open());
    }

    #[test]
    fn severity_is_ordered() {
        assert!(IncidentSeverity::Low < IncidentSeverity::Medium);
        assert!(IncidentSeverity::High < IncidentSeverity::Critical);
        assert_eq!(IncidentSeverity::Critical.rank(), 4);
        assert_eq!("abandoned_object".parse::<IncidentType>().unwrap(), IncidentType::AbandonedObject);
    }

    #[test]
    fn daily_ids_increment() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(next_daily_sequence(None), 1);
        assert_eq!(next_daily_sequence(Some("INC-20240309-0041")), 42);
        assert_eq!(format_daily_id("INC", date, 42), "INC-20240309-0042");
    }

    #[test]
    fn statistics_cover_times_and_false_positives() {
        let date = Utc::now().date_naive();
        let camera = Uuid::new_v4();

        let mut first = incident(IncidentStatus::Detected);
        first.camera_id = Some(camera);
        first.acknowledged_at = Some(first.detected_at + Duration::minutes(10));
        first.resolved_at = Some(first.detected_at + Duration::minutes(30));

        let mut second = incident(IncidentStatus::FalseAlarm);
        second.camera_id = Some(camera);
        second.is_false_positive = true;
        second.severity = IncidentSeverity::High;

        let stats = IncidentStatistics::from_incidents(date, &[first, second]);
        assert_eq!(stats.total_incidents, 2);
        assert_eq!(stats.by_severity.get("high"), Some(&1));
        assert_eq!(stats.by_status.get("false_alarm"), Some(&1));
        assert_eq!(stats.avg_response_minutes, Some(10.0));
        assert_eq!(stats.avg_resolution_minutes, Some(30.0));
        assert_eq!(stats.false_positive_rate, 50.0);
        assert_eq!(stats.most_active_camera, Some(camera));
    }

    #[test]
    fn evidence_kind_follows_the_extension() {
        assert_eq!(EvidenceType::from_filename("gate.JPG"), EvidenceType::Image);
        assert_eq!(EvidenceType::from_filename("clip.webm"), EvidenceType::Video);
        assert_eq!(EvidenceType::from_filename("call.wav"), EvidenceType::Audio);
        assert_eq!(EvidenceType::from_filename("statement.pdf"), EvidenceType::Document);
        assert_eq!(EvidenceType::from_filename("dump"), EvidenceType::Other);
        assert_eq!(" Video ".parse::<EvidenceType>().unwrap(), EvidenceType::Video);
        assert!("hologram".parse::<EvidenceType>().is_err());

        let evidence = Evidence {
            id: Uuid::new_v4(),
            incident_id: Uuid::new_v4(),
            evidence_type: EvidenceType::Other,
            file_path: "/media/incident_evidence/x/clip.MOV".into(),
            original_filename: "clip.MOV".into(),
            file_size: 10,
            description: String::new(),
            uploaded_by: None,
            uploaded_at: Utc::now(),
        };
        assert_eq!(evidence.extension(), "mov");
        assert!(evidence.is_video());
        assert!(!evidence.is_image());
    }
}
