//! Video and image analysis jobs delegated to the detector.

use crate::db::models::incident_models::{Incident, IncidentAction, IncidentActionLog};
use crate::db::models::job_models::{
    ImageProcessingResult, JobStatus, ProcessingStatistics, VideoProcessingJob,
};
use crate::db::models::user_models::{User, UserRole};
use crate::db::repositories::incidents::IncidentsRepository;
use crate::db::repositories::jobs::JobsRepository;
use crate::db::repositories::users::UsersRepository;
use crate::detector::{DetectorClient, FileUpload, ImageParams, StatusSnapshot, VideoParams};
use crate::error::Error;
use crate::messaging::EventPublisher;
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub mod monitor;
pub mod state;

pub use monitor::JobMonitor;
pub use state::{apply_snapshot, derive_incidents, SnapshotOutcome};

const DEFAULT_LIST_LIMIT: i64 = 50;

/// A job together with the incidents it produced
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: VideoProcessingJob,
    pub is_active: bool,
    pub incidents: Vec<Incident>,
}

/// Compact status view for polling clients
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub error: String,
    pub summary: Option<Value>,
}

impl From<&VideoProcessingJob> for JobStatusReport {
    fn from(job: &VideoProcessingJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            is_active: job.status.is_active(),
            error: job.error.clone(),
            summary: job.summary.clone(),
        }
    }
}

/// Failure message for a job past the age ceiling, `None` while it is younger
pub fn timed_out(job: &VideoProcessingJob, max_age: Duration, now: DateTime<Utc>) -> Option<String> {
    if job.status.is_active() && job.is_older_than(max_age, now) {
        Some(format!(
            "Job timed out (older than {} hours)",
            max_age.num_hours()
        ))
    } else {
        None
    }
}

fn ensure_access(job: &VideoProcessingJob, user: &User) -> Result<(), Error> {
    if job.user_id == Some(user.id) || user.role == UserRole::Admin {
        Ok(())
    } else {
        Err(Error::Authorization(
            "You do not have permission to access this job".to_string(),
        ))
    }
}

pub(crate) fn validate_upload(upload: &FileUpload, kind: &str) -> Result<(), Error> {
    if upload.bytes.is_empty() {
        return Err(Error::Validation(format!("No {} file provided", kind)));
    }
    if !upload.content_type.is_empty() && !upload.content_type.starts_with(&format!("{}/", kind)) {
        return Err(Error::Validation(format!(
            "Expected a {} file, got {}",
            kind, upload.content_type
        )));
    }
    Ok(())
}

/// Submission, tracking and cancellation of analysis jobs
#[derive(Clone)]
pub struct JobService {
    jobs: JobsRepository,
    users: UsersRepository,
    detector: DetectorClient,
    publisher: EventPublisher,
    max_job_age: Duration,
}

impl JobService {
    pub fn new(
        pool: Arc<PgPool>,
        detector: DetectorClient,
        publisher: EventPublisher,
        max_job_age_hours: i64,
    ) -> Self {
        Self {
            jobs: JobsRepository::new(pool.clone()),
            users: UsersRepository::new(pool),
            detector,
            publisher,
            max_job_age: Duration::hours(max_job_age_hours),
        }
    }

    pub fn detector(&self) -> &DetectorClient {
        &self.detector
    }

    /// Send a video to the detector and record the accepted job
    pub async fn submit(
        &self,
        user: &User,
        upload: FileUpload,
        params: VideoParams,
    ) -> Result<VideoProcessingJob> {
        validate_upload(&upload, "video")?;

        let submission = self.detector.submit_video_job(&upload, &params).await?;

        let mut job = VideoProcessingJob::new(&submission.job_id, Some(user.id), &upload.filename);
        job.file_size = upload.size() as i64;
        job.mime_type = upload.content_type.clone();
        job.confidence_threshold = params.confidence_threshold;
        job.frame_sample_rate = params.frame_sample_rate;
        job.analyze_motion = params.analyze_motion;
        job.summary_only = params.return_summary_only;
        job.crowd_detection = params.crowd_detection;
        job.min_people_count = params.min_people_count;
        job.vehicle_counting = params.vehicle_counting;
        job.counting_line_position = params.counting_line_position;
        job.priority = params.priority;
        job.server_url = submission.submitted_to.clone();
        job.message = if submission.message.is_empty() {
            "Job submitted".to_string()
        } else {
            submission.message.clone()
        };

        let job = self.jobs.create(&job).await?;
        info!(
            "User {} submitted video {} as job {}",
            user.email, job.original_filename, job.job_id
        );
        Ok(job)
    }

    /// Analyse an image synchronously and keep the outcome
    pub async fn process_image(
        &self,
        user: &User,
        upload: FileUpload,
        params: ImageParams,
    ) -> Result<ImageProcessingResult> {
        validate_upload(&upload, "image")?;

        let submitted_at = Utc::now();
        let mut record = ImageProcessingResult {
            id: Uuid::new_v4(),
            user_id: Some(user.id),
            original_filename: upload.filename.clone(),
            file_size: upload.size() as i64,
            mime_type: upload.content_type.clone(),
            job_id: String::new(),
            server_url: self.detector.base_url().to_string(),
            status: "failed".to_string(),
            processing_time: None,
            detection_count: 0,
            image_size: String::new(),
            detections: json!([]),
            detection_summary: json!({}),
            confidence_threshold: params.confidence_threshold,
            detection_types: params.detection_types.clone(),
            error_message: String::new(),
            submitted_at,
            completed_at: None,
        };

        let outcome = self.detector.process_image(&upload, &params).await;
        record.completed_at = Some(Utc::now());

        let detector_error = match outcome {
            Ok(result) => {
                record.status = "completed".to_string();
                record.job_id = result.job_id.clone().unwrap_or_default();
                record.server_url = result.server_url.clone();
                record.processing_time = result.processing_time;
                record.detection_count = result.detections.len() as i32;
                record.image_size = match &result.image_size {
                    Some(Value::String(size)) => size.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                record.detections = Value::Array(result.detections);
                record.detection_summary = result.detection_summary;
                None
            }
            Err(e) => {
                error!("Image analysis of {} failed: {}", upload.filename, e);
                record.error_message = e.to_string();
                Some(e)
            }
        };

        self.jobs.create_image_result(&record).await?;

        match detector_error {
            Some(e) => Err(Error::from(e).into()),
            None => Ok(record),
        }
    }

    pub async fn image_history(&self, user: &User, limit: Option<i64>) -> Result<Vec<ImageProcessingResult>> {
        self.jobs
            .image_results_for_user(&user.id, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await
    }

    pub async fn list(
        &self,
        user: &User,
        status: Option<JobStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<VideoProcessingJob>> {
        self.jobs
            .get_for_user(&user.id, status, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await
    }

    async fn load(&self, id: &Uuid) -> Result<VideoProcessingJob> {
        let job = self
            .jobs
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Video job {} not found", id)))?;
        Ok(job)
    }

    pub async fn detail(&self, id: &Uuid, user: &User) -> Result<JobDetail> {
        let job = self.load(id).await?;
        ensure_access(&job, user)?;

        let incidents = self.jobs.incidents_for_job(&job.id).await?;
        Ok(JobDetail {
            is_active: job.status.is_active(),
            job,
            incidents,
        })
    }

    pub async fn job_status_report(&self, id: &Uuid, user: &User) -> Result<JobStatusReport> {
        let job = self.load(id).await?;
        ensure_access(&job, user)?;
        Ok(JobStatusReport::from(&job))
    }

    /// Pull the current remote status of an active job on demand.
    /// Unlike the monitor, an unreachable detector leaves the job untouched.
    pub async fn refresh(&self, id: &Uuid, user: &User) -> Result<JobDetail> {
        let job = self.load(id).await?;
        ensure_access(&job, user)?;

        if job.status.is_active() {
            let snapshot = self.detector.get_job_status(&job.job_id).await;
            if snapshot.is_error() {
                warn!(
                    "Could not update job {} from detector: {}",
                    job.job_id, snapshot.message
                );
            } else {
                self.apply(&job, &snapshot).await?;
            }
        }

        self.detail(id, user).await
    }

    /// Remote cancel is best effort; the local row is cancelled regardless
    pub async fn cancel(&self, id: &Uuid, user: &User) -> Result<VideoProcessingJob> {
        let job = self.load(id).await?;
        ensure_access(&job, user)?;

        if job.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "Job cannot be cancelled (status: {})",
                job.status
            ))
            .into());
        }

        if !self.detector.cancel_job(&job.job_id).await {
            warn!("Could not cancel job {} on processing server", job.job_id);
        }

        if self.jobs.mark_cancelled(&job.id).await? {
            info!("Job {} cancelled by {}", job.job_id, user.email);
        }

        let cancelled = self.load(id).await?;
        if cancelled.status == JobStatus::Cancelled {
            self.publish_finished(&cancelled, Vec::new()).await;
        }
        Ok(cancelled)
    }

    /// One monitoring step for a single job
    pub async fn check_single_job(&self, job: &VideoProcessingJob) -> Result<SnapshotOutcome> {
        if let Some(message) = timed_out(job, self.max_job_age, Utc::now()) {
            warn!("Job {}: {}", job.job_id, message);
            self.fail_job(job, &message).await?;
            return Ok(SnapshotOutcome::Failed);
        }

        let snapshot = self.detector.get_job_status(&job.job_id).await;
        self.apply(job, &snapshot).await
    }

    /// Force a job to failed unless it already finished
    pub async fn fail_job(&self, job: &VideoProcessingJob, message: &str) -> Result<()> {
        if self.jobs.mark_failed(&job.id, message).await? {
            if let Some(failed) = self.jobs.get_by_id(&job.id).await? {
                self.publish_finished(&failed, Vec::new()).await;
            }
        }
        Ok(())
    }

    /// Apply `snapshot` under a row lock, creating derived incidents on completion
    async fn apply(&self, job: &VideoProcessingJob, snapshot: &StatusSnapshot) -> Result<SnapshotOutcome> {
        let assignee = self.incident_assignee(job).await?;

        let mut tx = self
            .jobs
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let Some(mut current) = JobsRepository::lock_in(&mut tx, &job.id).await? else {
            return Err(Error::NotFound(format!("Video job {} not found", job.id)).into());
        };

        let outcome = apply_snapshot(&mut current, snapshot, Utc::now());
        if outcome == SnapshotOutcome::Ignored {
            return Ok(outcome);
        }

        JobsRepository::save_state_in(&mut tx, &current).await?;

        let mut incidents = Vec::new();
        if outcome == SnapshotOutcome::Completed {
            for mut new in derive_incidents(&current) {
                new.assigned_to = assignee;
                let incident = IncidentsRepository::create_in(&mut tx, new).await?;
                JobsRepository::link_incident_in(&mut tx, &current.id, &incident.id).await?;
                IncidentsRepository::log_action_in(
                    &mut tx,
                    &IncidentActionLog::new(
                        incident.id,
                        None,
                        IncidentAction::Created,
                        json!({"video_job_id": current.job_id}),
                    ),
                )
                .await?;
                incidents.push(incident);
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit job update: {}", e)))?;

        if outcome.is_final() {
            info!(
                "Job {} finished as {} with {} incidents",
                current.job_id,
                current.status,
                incidents.len()
            );
        }

        for incident in &incidents {
            if let Err(e) = self.publisher.incident_created(incident).await {
                warn!("Failed to publish incident {}: {}", incident.incident_id, e);
            }
        }
        if outcome.is_final() {
            self.publish_finished(&current, incidents.iter().map(|i| i.id).collect())
                .await;
        }

        Ok(outcome)
    }

    /// The job owner, if they may work incidents
    async fn incident_assignee(&self, job: &VideoProcessingJob) -> Result<Option<Uuid>> {
        let Some(owner_id) = job.user_id else {
            return Ok(None);
        };
        let owner = self.users.get_by_id(&owner_id).await?;
        Ok(owner
            .filter(|owner| owner.active && owner.role.can_acknowledge_incidents())
            .map(|owner| owner.id))
    }

    async fn publish_finished(&self, job: &VideoProcessingJob, incidents: Vec<Uuid>) {
        if let Err(e) = self.publisher.job_finished(job, incidents).await {
            warn!("Failed to publish job {} event: {}", job.job_id, e);
        }
    }

    pub async fn count_active(&self, user_id: Option<Uuid>) -> Result<i64> {
        self.jobs.count_active(user_id).await
    }

    pub async fn active_jobs(&self) -> Result<Vec<VideoProcessingJob>> {
        self.jobs.get_active().await
    }

    /// Processing figures for one UTC day
    pub async fn processing_statistics(&self, date: NaiveDate) -> Result<ProcessingStatistics> {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        self.jobs.statistics(start, start + Duration::days(1)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_submitted_hours_ago(hours: i64) -> VideoProcessingJob {
        let mut job = VideoProcessingJob::new("remote-1", None, "gate.mp4");
        job.submitted_at = Utc::now() - Duration::hours(hours);
        job
    }

    #[test]
    fn jobs_past_the_age_ceiling_time_out() {
        let ceiling = Duration::hours(6);
        let now = Utc::now();

        assert_eq!(timed_out(&job_submitted_hours_ago(1), ceiling, now), None);
        assert_eq!(
            timed_out(&job_submitted_hours_ago(7), ceiling, now).as_deref(),
            Some("Job timed out (older than 6 hours)")
        );
    }

    #[test]
    fn finished_jobs_never_time_out() {
        let mut job = job_submitted_hours_ago(48);
        job.status = JobStatus::Completed;
        assert_eq!(timed_out(&job, Duration::hours(6), Utc::now()), None);
    }

    #[test]
    fn only_owner_or_admin_can_access_job() {
        let owner = User::new("owner@campus.edu", String::new(), UserRole::Viewer);
        let manager = User::new("manager@campus.edu", String::new(), UserRole::Manager);
        let admin = User::new("admin@campus.edu", String::new(), UserRole::Admin);
        let job = VideoProcessingJob::new("remote-1", Some(owner.id), "gate.mp4");

        assert!(ensure_access(&job, &owner).is_ok());
        assert!(ensure_access(&job, &admin).is_ok());
        assert!(matches!(
            ensure_access(&job, &manager),
            Err(Error::Authorization(_))
        ));
    }

    #[test]
    fn uploads_are_validated() {
        let empty = FileUpload::new("a.mp4", "video/mp4", Vec::new());
        let wrong_kind = FileUpload::new("a.png", "image/png", vec![1, 2, 3]);
        let video = FileUpload::new("a.mp4", "video/mp4", vec![1, 2, 3]);

        assert!(matches!(validate_upload(&empty, "video"), Err(Error::Validation(_))));
        assert!(matches!(validate_upload(&wrong_kind, "video"), Err(Error::Validation(_))));
        assert!(validate_upload(&video, "video").is_ok());
        assert!(validate_upload(&wrong_kind, "image").is_ok());
    }
}
