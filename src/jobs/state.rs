//! Local mirror of remote job state.
//!
//! The detector is authoritative: each observation overwrites what we know,
//! except that a job in a terminal status is never touched again.

use crate::db::models::incident_models::{IncidentSeverity, IncidentType, NewIncident};
use crate::db::models::job_models::{JobStatus, VideoProcessingJob};
use crate::detector::StatusSnapshot;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use serde_json::{json, Value};

/// Motion or crowd counts above this make the incident high severity
pub const HIGH_SEVERITY_THRESHOLD: i64 = 10;

const MOTION_CONFIDENCE: f64 = 0.8;
const CROWD_CONFIDENCE: f64 = 0.7;

/// What applying a snapshot did to the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The job was already terminal
    Ignored,
    /// Still running
    Progressed,
    Completed,
    Failed,
    Cancelled,
}

impl SnapshotOutcome {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            SnapshotOutcome::Completed | SnapshotOutcome::Failed | SnapshotOutcome::Cancelled
        )
    }
}

/// Apply one status observation to `job`
pub fn apply_snapshot(
    job: &mut VideoProcessingJob,
    snapshot: &StatusSnapshot,
    now: DateTime<Utc>,
) -> SnapshotOutcome {
    if job.status.is_terminal() {
        return SnapshotOutcome::Ignored;
    }

    job.last_checked = Some(now);

    if snapshot.is_error() {
        job.status = JobStatus::Failed;
        job.error = if snapshot.message.is_empty() {
            "Job not found on processing server".to_string()
        } else {
            snapshot.message.clone()
        };
        job.completed_at.get_or_insert(now);
        return SnapshotOutcome::Failed;
    }

    match snapshot.status.parse::<JobStatus>() {
        Ok(status) => job.status = status,
        Err(e) => warn!("Job {}: {}; keeping status {}", job.job_id, e, job.status),
    }
    job.progress = snapshot.progress.unwrap_or(0.0).clamp(0.0, 100.0);
    job.message = snapshot.message.clone();

    if let Some(started) = snapshot.started_at.as_deref().and_then(parse_timestamp) {
        job.started_at = Some(started);
    }
    if let Some(completed) = snapshot.completed_at.as_deref().and_then(parse_timestamp) {
        job.completed_at = Some(completed);
    }

    if let Some(result) = &snapshot.result {
        job.processing_time = result.processing_time;
        job.video_info = result.video_info.clone();
        job.summary = result.summary.clone();
    }

    if let Some(error) = snapshot.error.as_deref().filter(|e| !e.is_empty()) {
        job.error = error.to_string();
    }

    match job.status {
        JobStatus::Completed => {
            job.progress = 100.0;
            job.completed_at.get_or_insert(now);
            SnapshotOutcome::Completed
        }
        JobStatus::Failed => {
            job.completed_at.get_or_insert(now);
            SnapshotOutcome::Failed
        }
        JobStatus::Cancelled => {
            job.completed_at.get_or_insert(now);
            SnapshotOutcome::Cancelled
        }
        _ => SnapshotOutcome::Progressed,
    }
}

/// ISO 8601 with or without offset; naive values are taken as UTC
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn count_at(summary: &Value, section: &str, field: &str) -> i64 {
    let value = &summary[section][field];
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v as i64))
        .unwrap_or(0)
}

fn severity_for(count: i64) -> IncidentSeverity {
    if count > HIGH_SEVERITY_THRESHOLD {
        IncidentSeverity::High
    } else {
        IncidentSeverity::Medium
    }
}

fn short_id(job_id: &str) -> String {
    job_id.chars().take(8).collect::<String>().to_uppercase()
}

/// Incidents implied by a completed job's summary
pub fn derive_incidents(job: &VideoProcessingJob) -> Vec<NewIncident> {
    let Some(summary) = job.summary.as_ref() else {
        return Vec::new();
    };

    let video_duration = job
        .video_info
        .as_ref()
        .map(|info| info["duration"].clone())
        .unwrap_or(Value::Null);
    let location = format!("Video analysis: {}", job.original_filename);
    let mut incidents = Vec::new();

    let motion_events = count_at(summary, "motion_statistics", "total_events");
    if motion_events > 0 {
        incidents.push(NewIncident {
            title: format!("Video Analysis: {} motion events detected", motion_events),
            description: format!(
                "Video analysis detected {} motion events in {}",
                motion_events, job.original_filename
            ),
            incident_type: IncidentType::Motion,
            severity: severity_for(motion_events),
            camera_id: None,
            source_video: Some(job.job_id.clone()),
            location_description: location.clone(),
            confidence_score: MOTION_CONFIDENCE,
            detection_metadata: json!({
                "video_job_id": job.job_id,
                "motion_events": motion_events,
                "video_duration": video_duration,
                "detection_counts": summary.get("detection_counts").cloned().unwrap_or(Value::Null),
            }),
            assigned_to: None,
            tags: vec!["video".to_string(), "motion".to_string()],
            detected_at: job.completed_at,
            display_id: Some(format!("VID-{}", short_id(&job.job_id))),
        });
    }

    if count_at(summary, "crowd_statistics", "active_crowds") > 0 {
        let people = count_at(summary, "crowd_statistics", "total_people_in_crowds");
        incidents.push(NewIncident {
            title: format!("Crowd detected: {} people", people),
            description: format!(
                "Video analysis detected crowd activity in {}",
                job.original_filename
            ),
            incident_type: IncidentType::Crowd,
            severity: severity_for(people),
            camera_id: None,
            source_video: Some(job.job_id.clone()),
            location_description: location,
            confidence_score: CROWD_CONFIDENCE,
            detection_metadata: json!({
                "video_job_id": job.job_id,
                "crowd_statistics": summary["crowd_statistics"].clone(),
                "video_duration": video_duration,
            }),
            assigned_to: None,
            tags: vec!["video".to_string(), "crowd".to_string()],
            detected_at: job.completed_at,
            display_id: Some(format!("CROWD-{}", short_id(&job.job_id))),
        });
    }

    incidents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::SnapshotResult;

    fn job() -> VideoProcessingJob {
        VideoProcessingJob::new("abcdef12-3456-7890", None, "lobby.mp4")
    }

    fn snapshot(status: &str) -> StatusSnapshot {
        StatusSnapshot {
            status: status.to_string(),
            progress: Some(40.0),
            message: "working".to_string(),
            started_at: Some("2024-01-01T10:00:00Z".to_string()),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    fn completed_with(summary: Value) -> VideoProcessingJob {
        let mut job = job();
        let mut done = snapshot("completed");
        done.result = Some(SnapshotResult {
            processing_time: Some(12.5),
            video_info: Some(json!({"duration": 60.0})),
            summary: Some(summary),
        });
        assert_eq!(apply_snapshot(&mut job, &done, Utc::now()), SnapshotOutcome::Completed);
        job
    }

    #[test]
    fn progress_is_mirrored() {
        let mut job = job();
        let outcome = apply_snapshot(&mut job, &snapshot("processing"), Utc::now());

        assert_eq!(outcome, SnapshotOutcome::Progressed);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 40.0);
        assert_eq!(job.message, "working");
        assert_eq!(job.started_at.unwrap().to_rfc3339(), "2024-01-01T10:00:00+00:00");
        assert!(job.last_checked.is_some());
    }

    #[test]
    fn terminal_job_is_never_modified() {
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            let mut job = job();
            job.status = status;
            job.progress = 55.0;

            let outcome = apply_snapshot(&mut job, &snapshot("processing"), Utc::now());
            assert_eq!(outcome, SnapshotOutcome::Ignored);
            assert_eq!(job.status, status);
            assert_eq!(job.progress, 55.0);
            assert!(job.last_checked.is_none());

            assert_eq!(
                apply_snapshot(&mut job, &StatusSnapshot::error("gone"), Utc::now()),
                SnapshotOutcome::Ignored
            );
            assert_eq!(job.status, status);
        }
    }

    #[test]
    fn error_snapshot_fails_the_job() {
        let mut job = job();
        let outcome = apply_snapshot(
            &mut job,
            &StatusSnapshot::error("Job x not found on processing server"),
            Utc::now(),
        );

        assert_eq!(outcome, SnapshotOutcome::Failed);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error, "Job x not found on processing server");
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn applying_the_same_snapshot_twice_is_idempotent() {
        let mut job = job();
        let observed = snapshot("processing");
        apply_snapshot(&mut job, &observed, Utc::now());
        let first = (job.status, job.progress, job.started_at, job.message.clone());
        apply_snapshot(&mut job, &observed, Utc::now());

        assert_eq!(first, (job.status, job.progress, job.started_at, job.message.clone()));
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let parsed = parse_timestamp("2024-01-01T10:00:00.250").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T10:00:00.250+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn no_motion_means_no_incident() {
        let job = completed_with(json!({"motion_statistics": {"total_events": 0}}));
        assert!(derive_incidents(&job).is_empty());
        assert!(derive_incidents(&self::job()).is_empty());
    }

    #[test]
    fn motion_severity_thresholds() {
        for (events, expected) in [
            (1, IncidentSeverity::Medium),
            (10, IncidentSeverity::Medium),
            (11, IncidentSeverity::High),
        ] {
            let job = completed_with(json!({"motion_statistics": {"total_events": events}}));
            let incidents = derive_incidents(&job);

            assert_eq!(incidents.len(), 1);
            let motion = &incidents[0];
            assert_eq!(motion.severity, expected);
            assert_eq!(motion.incident_type, IncidentType::Motion);
            assert_eq!(motion.display_id.as_deref(), Some("VID-ABCDEF12"));
            assert_eq!(motion.confidence_score, 0.8);
            assert_eq!(motion.source_video.as_deref(), Some("abcdef12-3456-7890"));
            assert_eq!(
                motion.title,
                format!("Video Analysis: {} motion events detected", events)
            );
        }
    }

    #[test]
    fn crowd_incident_is_derived() {
        let job = completed_with(json!({
            "motion_statistics": {"total_events": 3},
            "crowd_statistics": {"active_crowds": 2, "total_people_in_crowds": 14}
        }));
        let incidents = derive_incidents(&job);

        assert_eq!(incidents.len(), 2);
        let crowd = &incidents[1];
        assert_eq!(crowd.incident_type, IncidentType::Crowd);
        assert_eq!(crowd.severity, IncidentSeverity::High);
        assert_eq!(crowd.title, "Crowd detected: 14 people");
        assert_eq!(crowd.display_id.as_deref(), Some("CROWD-ABCDEF12"));
        assert_eq!(crowd.confidence_score, 0.7);
    }
}
