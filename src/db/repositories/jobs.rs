use crate::{
    db::models::{
        incident_models::Incident,
        job_models::{ImageProcessingResult, JobStatus, ProcessingStatistics, VideoProcessingJob},
    },
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, user_id, job_id, original_filename, file_size, mime_type, \
     confidence_threshold, frame_sample_rate, analyze_motion, summary_only, crowd_detection, \
     min_people_count, vehicle_counting, counting_line_position, server_url, status, progress, \
     message, priority, submitted_at, started_at, completed_at, last_checked, processing_time, \
     video_info, summary, error";

const IMAGE_RESULT_COLUMNS: &str = "id, user_id, original_filename, file_size, mime_type, job_id, \
     server_url, status, processing_time, detection_count, image_size, detections, \
     detection_summary, confidence_threshold, detection_types, error_message, submitted_at, \
     completed_at";

/// Video jobs, their derived incidents and image analysis results
#[derive(Clone)]
pub struct JobsRepository {
    pool: Arc<PgPool>,
}

impl JobsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Record a job accepted by the detector
    pub async fn create(&self, job: &VideoProcessingJob) -> Result<VideoProcessingJob> {
        info!("Recording video job {} for {}", job.job_id, job.original_filename);

        let result = sqlx::query_as::<_, VideoProcessingJob>(&format!(
            r#"
            INSERT INTO video_processing_jobs (id, user_id, job_id, original_filename, file_size,
                mime_type, confidence_threshold, frame_sample_rate, analyze_motion, summary_only,
                crowd_detection, min_people_count, vehicle_counting, counting_line_position,
                server_url, status, progress, message, priority, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20)
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(job.id)
        .bind(job.user_id)
        .bind(&job.job_id)
        .bind(&job.original_filename)
        .bind(job.file_size)
        .bind(&job.mime_type)
        .bind(job.confidence_threshold)
        .bind(job.frame_sample_rate)
        .bind(job.analyze_motion)
        .bind(job.summary_only)
        .bind(job.crowd_detection)
        .bind(job.min_people_count)
        .bind(job.vehicle_counting)
        .bind(job.counting_line_position)
        .bind(&job.server_url)
        .bind(job.status)
        .bind(job.progress)
        .bind(&job.message)
        .bind(job.priority)
        .bind(job.submitted_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create video job: {}", e)))?;

        Ok(result)
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<VideoProcessingJob>> {
        let result = sqlx::query_as::<_, VideoProcessingJob>(&format!(
            "SELECT {} FROM video_processing_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get video job: {}", e)))?;

        Ok(result)
    }

    pub async fn get_for_user(
        &self,
        user_id: &Uuid,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<VideoProcessingJob>> {
        let result = sqlx::query_as::<_, VideoProcessingJob>(&format!(
            r#"
            SELECT {} FROM video_processing_jobs
            WHERE user_id = $1 AND ($2::job_status IS NULL OR status = $2)
            ORDER BY submitted_at DESC
            LIMIT $3
            "#,
            JOB_COLUMNS
        ))
        .bind(user_id)
        .bind(status)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list video jobs: {}", e)))?;

        Ok(result)
    }

    /// All jobs that are not terminal, oldest first
    pub async fn get_active(&self) -> Result<Vec<VideoProcessingJob>> {
        let result = sqlx::query_as::<_, VideoProcessingJob>(&format!(
            r#"
            SELECT {} FROM video_processing_jobs
            WHERE status IN ('submitted', 'pending', 'processing')
            ORDER BY submitted_at
            "#,
            JOB_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get active jobs: {}", e)))?;

        Ok(result)
    }

    pub async fn count_active(&self, user_id: Option<Uuid>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM video_processing_jobs
            WHERE status IN ('submitted', 'pending', 'processing')
              AND ($1::uuid IS NULL OR user_id = $1)
            "#,
        )
        .bind(user_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count active jobs: {}", e)))?;

        Ok(count)
    }

    /// Re-read a job under a row lock inside an open transaction
    pub async fn lock_in(conn: &mut PgConnection, id: &Uuid) -> Result<Option<VideoProcessingJob>> {
        let result = sqlx::query_as::<_, VideoProcessingJob>(&format!(
            "SELECT {} FROM video_processing_jobs WHERE id = $1 FOR UPDATE",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to lock video job: {}", e)))?;

        Ok(result)
    }

    /// Persist the fields mirrored from the detector
    pub async fn save_state_in(conn: &mut PgConnection, job: &VideoProcessingJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE video_processing_jobs
            SET status = $1, progress = $2, message = $3, started_at = $4, completed_at = $5,
                last_checked = $6, processing_time = $7, video_info = $8, summary = $9, error = $10
            WHERE id = $11
            "#,
        )
        .bind(job.status)
        .bind(job.progress)
        .bind(&job.message)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.last_checked)
        .bind(job.processing_time)
        .bind(&job.video_info)
        .bind(&job.summary)
        .bind(&job.error)
        .bind(job.id)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to save video job state: {}", e)))?;

        Ok(())
    }

    pub async fn save_state(&self, job: &VideoProcessingJob) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::Database(format!("Failed to acquire connection: {}", e)))?;
        Self::save_state_in(&mut conn, job).await
    }

    /// Fail a job unless it already reached a terminal status
    pub async fn mark_failed(&self, id: &Uuid, error: &str) -> Result<bool> {
        info!("Marking video job {} as failed: {}", id, error);

        let result = sqlx::query(
            r#"
            UPDATE video_processing_jobs
            SET status = 'failed', error = $1, completed_at = NOW(), last_checked = NOW()
            WHERE id = $2 AND status IN ('submitted', 'pending', 'processing')
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to mark job failed: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel a job unless it already reached a terminal status
    pub async fn mark_cancelled(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE video_processing_jobs
            SET status = 'cancelled', completed_at = NOW()
            WHERE id = $1 AND status IN ('submitted', 'pending', 'processing')
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to cancel job: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn link_incident_in(conn: &mut PgConnection, job_id: &Uuid, incident_id: &Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_incidents (job_id, incident_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(job_id)
        .bind(incident_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to link incident to job: {}", e)))?;

        Ok(())
    }

    pub async fn incidents_for_job(&self, job_id: &Uuid) -> Result<Vec<Incident>> {
        let result = sqlx::query_as::<_, Incident>(
            r#"
            SELECT i.* FROM incidents i
            JOIN job_incidents ji ON ji.incident_id = i.id
            WHERE ji.job_id = $1
            ORDER BY i.detected_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get job incidents: {}", e)))?;

        Ok(result)
    }

    pub async fn create_image_result(&self, result: &ImageProcessingResult) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO image_processing_results ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
            IMAGE_RESULT_COLUMNS
        ))
        .bind(result.id)
        .bind(result.user_id)
        .bind(&result.original_filename)
        .bind(result.file_size)
        .bind(&result.mime_type)
        .bind(&result.job_id)
        .bind(&result.server_url)
        .bind(&result.status)
        .bind(result.processing_time)
        .bind(result.detection_count)
        .bind(&result.image_size)
        .bind(&result.detections)
        .bind(&result.detection_summary)
        .bind(result.confidence_threshold)
        .bind(&result.detection_types)
        .bind(&result.error_message)
        .bind(result.submitted_at)
        .bind(result.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to store image result: {}", e)))?;

        Ok(())
    }

    pub async fn image_results_for_user(&self, user_id: &Uuid, limit: i64) -> Result<Vec<ImageProcessingResult>> {
        let result = sqlx::query_as::<_, ImageProcessingResult>(&format!(
            "SELECT {} FROM image_processing_results WHERE user_id = $1 ORDER BY submitted_at DESC LIMIT $2",
            IMAGE_RESULT_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list image results: {}", e)))?;

        Ok(result)
    }

    /// Aggregate image and video processing within `[start, end)`
    pub async fn statistics(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ProcessingStatistics> {
        let result = sqlx::query_as::<_, ProcessingStatistics>(
            r#"
            WITH images AS (
                SELECT * FROM image_processing_results
                WHERE submitted_at >= $1 AND submitted_at < $2
            ),
            videos AS (
                SELECT * FROM video_processing_jobs
                WHERE submitted_at >= $1 AND submitted_at < $2
            ),
            classes AS (
                SELECT d->>'class_name' AS class_name
                FROM images,
                     jsonb_array_elements(
                         CASE WHEN jsonb_typeof(images.detections) = 'array'
                              THEN images.detections ELSE '[]'::jsonb END
                     ) AS d
            )
            SELECT
                (SELECT COUNT(*) FROM images) AS total_image_requests,
                (SELECT COUNT(*) FROM images WHERE status = 'completed') AS successful_image_requests,
                (SELECT COUNT(*) FROM images WHERE status = 'failed') AS failed_image_requests,
                (SELECT AVG(processing_time) FROM images WHERE status = 'completed') AS avg_image_processing_time,
                (SELECT COUNT(*) FROM videos) AS total_video_requests,
                (SELECT COUNT(*) FROM videos WHERE status = 'completed') AS successful_video_requests,
                (SELECT COUNT(*) FROM videos WHERE status = 'failed') AS failed_video_requests,
                (SELECT AVG(processing_time) FROM videos WHERE status = 'completed') AS avg_video_processing_time,
                (SELECT COALESCE(SUM(detection_count), 0) FROM images) AS total_detections,
                (SELECT COUNT(*) FROM classes WHERE class_name = 'person') AS person_detections,
                (SELECT COUNT(*) FROM classes WHERE class_name IN ('car', 'truck', 'bus', 'motorcycle', 'vehicle')) AS vehicle_detections
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to compute processing statistics: {}", e)))?;

        Ok(result)
    }
}
