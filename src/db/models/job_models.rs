use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Remote video job status, mirrored locally
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Submitted,
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled jobs never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "submitted" => Ok(JobStatus::Submitted),
            "pending" | "queued" => Ok(JobStatus::Pending),
            "processing" | "running" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// Processing priority, sent to the detector as 0-3
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Default)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl JobPriority {
    pub fn wire_value(&self) -> i16 {
        *self as i16
    }

    pub fn from_wire(value: i16) -> Option<Self> {
        match value {
            0 => Some(JobPriority::Low),
            1 => Some(JobPriority::Normal),
            2 => Some(JobPriority::High),
            3 => Some(JobPriority::Urgent),
            _ => None,
        }
    }
}

/// Asynchronous video analysis request
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoProcessingJob {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    /// Opaque identifier assigned by the detection service
    pub job_id: String,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub confidence_threshold: f64,
    pub frame_sample_rate: i32,
    pub analyze_motion: bool,
    pub summary_only: bool,
    pub crowd_detection: bool,
    pub min_people_count: i32,
    pub vehicle_counting: bool,
    pub counting_line_position: f64,
    pub server_url: String,
    pub status: JobStatus,
    /// 0 to 100
    pub progress: f64,
    pub message: String,
    pub priority: JobPriority,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub processing_time: Option<f64>,
    pub video_info: Option<serde_json::Value>,
    pub summary: Option<serde_json::Value>,
    pub error: String,
}

impl VideoProcessingJob {
    pub fn new(job_id: &str, user_id: Option<Uuid>, original_filename: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            job_id: job_id.to_string(),
            original_filename: original_filename.to_string(),
            file_size: 0,
            mime_type: String::new(),
            confidence_threshold: 0.5,
            frame_sample_rate: 5,
            analyze_motion: true,
            summary_only: true,
            crowd_detection: false,
            min_people_count: 3,
            vehicle_counting: false,
            counting_line_position: 0.5,
            server_url: String::new(),
            status: JobStatus::Submitted,
            progress: 0.0,
            message: String::new(),
            priority: JobPriority::Normal,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_checked: None,
            processing_time: None,
            video_info: None,
            summary: None,
            error: String::new(),
        }
    }

    /// Time spent so far, or the total once completed
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        let start = self.started_at?;
        Some(self.completed_at.unwrap_or(now) - start)
    }

    pub fn is_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now - self.submitted_at > max_age
    }
}

/// Result of a synchronous image analysis
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageProcessingResult {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub job_id: String,
    pub server_url: String,
    /// completed or failed
    pub status: String,
    pub processing_time: Option<f64>,
    pub detection_count: i32,
    pub image_size: String,
    pub detections: serde_json::Value,
    pub detection_summary: serde_json::Value,
    pub confidence_threshold: f64,
    pub detection_types: String,
    pub error_message: String,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Daily processing figures across image and video analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessingStatistics {
    pub total_image_requests: i64,
    pub successful_image_requests: i64,
    pub failed_image_requests: i64,
    pub avg_image_processing_time: Option<f64>,
    pub total_video_requests: i64,
    pub successful_video_requests: i64,
    pub failed_video_requests: i64,
    pub avg_video_processing_time: Option<f64>,
    pub total_detections: i64,
    pub person_detections: i64,
    pub vehicle_detections: i64,
}

impl ProcessingStatistics {
    /// Percentage of finished requests that succeeded
    pub fn success_rate(&self) -> f64 {
        let succeeded = self.successful_image_requests + self.successful_video_requests;
        let finished = succeeded + self.failed_image_requests + self.failed_video_requests;
        if finished == 0 {
            0.0
        } else {
            succeeded as f64 / finished as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Submitted.is_active());
        assert!(JobStatus::Processing.is_active());
    }

    #[test]
    fn remote_status_aliases_parse() {
        assert_eq!("canceled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert_eq!("QUEUED".parse::<JobStatus>().unwrap(), JobStatus::Pending);
        assert!("error".parse::<JobStatus>().is_err());
    }

    #[test]
    fn priority_wire_values() {
        assert_eq!(JobPriority::Urgent.wire_value(), 3);
        assert_eq!(JobPriority::from_wire(0), Some(JobPriority::Low));
        assert_eq!(JobPriority::from_wire(4), None);
        assert_eq!(JobPriority::default(), JobPriority::Normal);
    }

    #[test]
    fn success_rate_ignores_in_flight() {
        let stats = ProcessingStatistics {
            successful_image_requests: 3,
            failed_video_requests: 1,
            total_video_requests: 4,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), 75.0);
        assert_eq!(ProcessingStatistics::default().success_rate(), 0.0);
    }
}
