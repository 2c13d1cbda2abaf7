use crate::db::models::job_models::JobPriority;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// File sent to the detector as the multipart `file` field
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(filename: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

fn flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

/// Parameters for synchronous image analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageParams {
    pub confidence_threshold: f64,
    pub return_image: bool,
    /// Comma separated, e.g. `person,vehicle,face`
    pub detection_types: String,
    pub enable_advanced_features: bool,
    /// Extra form fields passed through verbatim
    pub extra: BTreeMap<String, String>,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            return_image: false,
            detection_types: "person,vehicle,face".to_string(),
            enable_advanced_features: false,
            extra: BTreeMap::new(),
        }
    }
}

impl ImageParams {
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("confidence_threshold".to_string(), self.confidence_threshold.to_string()),
            ("return_image".to_string(), flag(self.return_image)),
            ("detection_types".to_string(), self.detection_types.clone()),
            ("enable_advanced_features".to_string(), flag(self.enable_advanced_features)),
        ];
        push_extra(&mut fields, &self.extra);
        fields
    }
}

/// Parameters for an asynchronous video job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoParams {
    pub confidence_threshold: f64,
    pub frame_sample_rate: i32,
    pub analyze_motion: bool,
    pub return_summary_only: bool,
    pub enable_advanced_features: bool,
    pub priority: JobPriority,
    pub crowd_detection: bool,
    pub min_people_count: i32,
    pub vehicle_counting: bool,
    pub counting_line_position: f64,
    pub extra: BTreeMap<String, String>,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            frame_sample_rate: 5,
            analyze_motion: true,
            return_summary_only: true,
            enable_advanced_features: false,
            priority: JobPriority::Normal,
            crowd_detection: false,
            min_people_count: 3,
            vehicle_counting: false,
            counting_line_position: 0.5,
            extra: BTreeMap::new(),
        }
    }
}

impl VideoParams {
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("confidence_threshold".to_string(), self.confidence_threshold.to_string()),
            ("frame_sample_rate".to_string(), self.frame_sample_rate.to_string()),
            ("analyze_motion".to_string(), flag(self.analyze_motion)),
            ("return_summary_only".to_string(), flag(self.return_summary_only)),
            ("enable_advanced_features".to_string(), flag(self.enable_advanced_features)),
            ("priority".to_string(), self.priority.wire_value().to_string()),
        ];
        if self.crowd_detection {
            fields.push(("crowd_detection".to_string(), flag(true)));
            fields.push(("min_people_count".to_string(), self.min_people_count.to_string()));
        }
        if self.vehicle_counting {
            fields.push(("vehicle_counting".to_string(), flag(true)));
            fields.push((
                "counting_line_position".to_string(),
                self.counting_line_position.to_string(),
            ));
        }
        push_extra(&mut fields, &self.extra);
        fields
    }
}

fn push_extra(fields: &mut Vec<(String, String)>, extra: &BTreeMap<String, String>) {
    for (key, value) in extra {
        if !fields.iter().any(|(existing, _)| existing == key) {
            fields.push((key.clone(), value.clone()));
        }
    }
}

/// Answer to an image analysis request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub detections: Vec<Value>,
    #[serde(default)]
    pub detection_summary: Value,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub image_size: Option<Value>,
    /// Base URL of the server that produced the result
    #[serde(default)]
    pub server_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DetectionResult {
    /// Count of detections whose `class_name` (or `class`) equals `class`
    pub fn count_of(&self, class: &str) -> usize {
        self.detections
            .iter()
            .filter(|d| {
                d.get("class_name")
                    .or_else(|| d.get("class"))
                    .and_then(Value::as_str)
                    .map_or(false, |name| name.eq_ignore_ascii_case(class))
            })
            .count()
    }
}

/// Answer to a video job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub submitted_to: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result block of a completed job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotResult {
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub video_info: Option<Value>,
    #[serde(default)]
    pub summary: Option<Value>,
}

/// One observation of a remote job's status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub result: Option<SnapshotResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusSnapshot {
    pub const ERROR: &'static str = "error";

    /// Snapshot standing in for a failed status request
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Self::ERROR.to_string(),
            progress: None,
            message: message.into(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.eq_ignore_ascii_case(Self::ERROR)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Online,
    Error,
    Offline,
}

/// Detector health as seen from this service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub status: ServerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
        fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn video_fields_include_optional_features_only_when_enabled() {
        let mut params = VideoParams::default();
        let fields = params.form_fields();
        assert_eq!(field(&fields, "priority"), Some("1"));
        assert_eq!(field(&fields, "analyze_motion"), Some("true"));
        assert_eq!(field(&fields, "return_summary_only"), Some("true"));
        assert_eq!(field(&fields, "min_people_count"), None);

        params.crowd_detection = true;
        params.vehicle_counting = true;
        params.priority = JobPriority::Urgent;
        let fields = params.form_fields();
        assert_eq!(field(&fields, "crowd_detection"), Some("true"));
        assert_eq!(field(&fields, "min_people_count"), Some("3"));
        assert_eq!(field(&fields, "counting_line_position"), Some("0.5"));
        assert_eq!(field(&fields, "priority"), Some("3"));
    }

    #[test]
    fn extras_never_override_named_fields() {
        let mut params = ImageParams::default();
        params.extra.insert("detection_types".into(), "weapon".into());
        params.extra.insert("blur_faces".into(), "true".into());
        let fields = params.form_fields();
        assert_eq!(field(&fields, "detection_types"), Some("person,vehicle,face"));
        assert_eq!(field(&fields, "blur_faces"), Some("true"));
        assert_eq!(field(&fields, "return_image"), Some("false"));
    }

    #[test]
    fn status_snapshot_parses_completed_payload() {
        let snapshot: StatusSnapshot = serde_json::from_value(serde_json::json!({
            "status": "completed",
            "progress": 100.0,
            "completed_at": "2024-01-01T10:00:00Z",
            "result": {
                "processing_time": 12.5,
                "summary": {"motion_statistics": {"total_events": 3}}
            }
        }))
        .unwrap();
        assert!(!snapshot.is_error());
        let result = snapshot.result.unwrap();
        assert_eq!(result.processing_time, Some(12.5));
        assert_eq!(result.summary.unwrap()["motion_statistics"]["total_events"], 3);
    }

    #[test]
    fn detection_counts_by_class() {
        let result: DetectionResult = serde_json::from_value(serde_json::json!({
            "detections": [
                {"class_name": "person"},
                {"class_name": "Person"},
                {"class": "car"}
            ],
            "model": "yolo"
        }))
        .unwrap();
        assert_eq!(result.count_of("person"), 2);
        assert_eq!(result.count_of("car"), 1);
        assert_eq!(result.extra["model"], "yolo");
    }
}
