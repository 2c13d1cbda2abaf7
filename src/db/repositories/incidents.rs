use crate::{
    db::models::incident_models::{
        format_daily_id, next_daily_sequence, Evidence, Incident, IncidentActionLog,
        IncidentComment, IncidentFilter, IncidentSeverity, NewIncident,
    },
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const INCIDENT_COLUMNS: &str = "id, incident_id, title, description, incident_type, severity, status, \
     camera_id, source_video, location_description, gps_coordinates, confidence_score, \
     detection_metadata, assigned_to, acknowledged_by, resolved_by, detected_at, acknowledged_at, \
     resolved_at, tags, is_false_positive, requires_police_report, police_report_number, notes, \
     created_at, updated_at";

const EVIDENCE_COLUMNS: &str = "id, incident_id, evidence_type, file_path, original_filename, \
     file_size, description, uploaded_by, uploaded_at";

const DISPLAY_PREFIX: &str = "INC";
const DEFAULT_PAGE_SIZE: i64 = 50;

/// Incidents repository for incidents, comments and the action log
#[derive(Clone)]
pub struct IncidentsRepository {
    pool: Arc<PgPool>,
}

impl IncidentsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create an incident, assigning the next `INC-YYYYMMDD-NNNN` id unless one is given
    pub async fn create(&self, new: NewIncident) -> Result<Incident> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let incident = Self::create_in(&mut tx, new).await?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit incident: {}", e)))?;

        Ok(incident)
    }

    /// Insert inside an open transaction
    pub async fn create_in(conn: &mut PgConnection, new: NewIncident) -> Result<Incident> {
        let now = Utc::now();
        let display_id = match new.display_id.clone() {
            Some(id) => id,
            None => Self::next_display_id(conn, now.date_naive()).await?,
        };
        let incident = Incident::from_new(new, display_id, now);

        info!("Creating incident {}: {}", incident.incident_id, incident.title);

        let result = sqlx::query_as::<_, Incident>(&format!(
            r#"
            INSERT INTO incidents (id, incident_id, title, description, incident_type, severity, status,
                                   camera_id, source_video, location_description, gps_coordinates,
                                   confidence_score, detection_metadata, assigned_to, detected_at,
                                   tags, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {}
            "#,
            INCIDENT_COLUMNS
        ))
        .bind(incident.id)
        .bind(&incident.incident_id)
        .bind(&incident.title)
        .bind(&incident.description)
        .bind(incident.incident_type)
        .bind(incident.severity)
        .bind(incident.status)
        .bind(incident.camera_id)
        .bind(&incident.source_video)
        .bind(&incident.location_description)
        .bind(&incident.gps_coordinates)
        .bind(incident.confidence_score)
        .bind(&incident.detection_metadata)
        .bind(incident.assigned_to)
        .bind(incident.detected_at)
        .bind(&incident.tags)
        .bind(incident.created_at)
        .bind(incident.updated_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to create incident: {}", e)))?;

        Ok(result)
    }

    /// Serialised per day with a transaction-scoped advisory lock
    async fn next_display_id(conn: &mut PgConnection, date: NaiveDate) -> Result<String> {
        let day_prefix = format!("{}-{}-", DISPLAY_PREFIX, date.format("%Y%m%d"));

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&day_prefix)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to lock incident sequence: {}", e)))?;

        let last: Option<String> = sqlx::query_scalar(
            "SELECT incident_id FROM incidents WHERE incident_id LIKE $1 ORDER BY incident_id DESC LIMIT 1",
        )
        .bind(format!("{}%", day_prefix))
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to read incident sequence: {}", e)))?;

        Ok(format_daily_id(
            DISPLAY_PREFIX,
            date,
            next_daily_sequence(last.as_deref()),
        ))
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Incident>> {
        let result = sqlx::query_as::<_, Incident>(&format!(
            "SELECT {} FROM incidents WHERE id = $1",
            INCIDENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get incident by ID: {}", e)))?;

        Ok(result)
    }

    pub async fn get_by_display_id(&self, incident_id: &str) -> Result<Option<Incident>> {
        let result = sqlx::query_as::<_, Incident>(&format!(
            "SELECT {} FROM incidents WHERE incident_id = $1",
            INCIDENT_COLUMNS
        ))
        .bind(incident_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get incident: {}", e)))?;

        Ok(result)
    }

    /// Persist every mutable field, including state machine fields
    pub async fn update(&self, incident: &Incident) -> Result<Incident> {
        let result = sqlx::query_as::<_, Incident>(&format!(
            r#"
            UPDATE incidents
            SET title = $1, description = $2, incident_type = $3, severity = $4, status = $5,
                location_description = $6, assigned_to = $7, acknowledged_by = $8, resolved_by = $9,
                acknowledged_at = $10, resolved_at = $11, tags = $12, is_false_positive = $13,
                requires_police_report = $14, police_report_number = $15, notes = $16,
                updated_at = $17
            WHERE id = $18
            RETURNING {}
            "#,
            INCIDENT_COLUMNS
        ))
        .bind(&incident.title)
        .bind(&incident.description)
        .bind(incident.incident_type)
        .bind(incident.severity)
        .bind(incident.status)
        .bind(&incident.location_description)
        .bind(incident.assigned_to)
        .bind(incident.acknowledged_by)
        .bind(incident.resolved_by)
        .bind(incident.acknowledged_at)
        .bind(incident.resolved_at)
        .bind(&incident.tags)
        .bind(incident.is_false_positive)
        .bind(incident.requires_police_report)
        .bind(&incident.police_report_number)
        .bind(&incident.notes)
        .bind(Utc::now())
        .bind(incident.id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update incident: {}", e)))?;

        Ok(result)
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM incidents WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete incident: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Search incidents, newest first. Unset filters match everything.
    pub async fn search(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let result = sqlx::query_as::<_, Incident>(&format!(
            r#"
            SELECT {} FROM incidents
            WHERE ($1::incident_status IS NULL OR status = $1)
              AND ($2::incident_severity IS NULL OR severity = $2)
              AND ($3::incident_type IS NULL OR incident_type = $3)
              AND ($4::uuid IS NULL OR camera_id = $4)
              AND ($5::uuid IS NULL OR assigned_to = $5)
              AND ($6::timestamptz IS NULL OR detected_at >= $6)
              AND ($7::timestamptz IS NULL OR detected_at <= $7)
              AND ($8::text IS NULL OR title ILIKE $8 OR description ILIKE $8 OR incident_id ILIKE $8)
            ORDER BY detected_at DESC
            LIMIT $9 OFFSET $10
            "#,
            INCIDENT_COLUMNS
        ))
        .bind(filter.status)
        .bind(filter.severity)
        .bind(filter.incident_type)
        .bind(filter.camera_id)
        .bind(filter.assigned_to)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(search)
        .bind(filter.limit.unwrap_or(DEFAULT_PAGE_SIZE))
        .bind(filter.offset.unwrap_or(0))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to search incidents: {}", e)))?;

        Ok(result)
    }

    /// Incidents detected within `[start, end)`
    pub async fn detected_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Incident>> {
        let result = sqlx::query_as::<_, Incident>(&format!(
            "SELECT {} FROM incidents WHERE detected_at >= $1 AND detected_at < $2 ORDER BY detected_at",
            INCIDENT_COLUMNS
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get incidents for period: {}", e)))?;

        Ok(result)
    }

    /// Open incidents grouped by severity
    pub async fn open_counts_by_severity(&self) -> Result<Vec<(IncidentSeverity, i64)>> {
        let rows = sqlx::query_as::<_, (IncidentSeverity, i64)>(
            r#"
            SELECT severity, COUNT(*) FROM incidents
            WHERE status NOT IN ('resolved', 'false_alarm')
            GROUP BY severity
            ORDER BY severity
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count open incidents: {}", e)))?;

        Ok(rows)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Incident>> {
        let result = sqlx::query_as::<_, Incident>(&format!(
            "SELECT {} FROM incidents ORDER BY detected_at DESC LIMIT $1",
            INCIDENT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get recent incidents: {}", e)))?;

        Ok(result)
    }

    pub async fn add_comment(&self, comment: &IncidentComment) -> Result<IncidentComment> {
        let result = sqlx::query_as::<_, IncidentComment>(
            r#"
            INSERT INTO incident_comments (id, incident_id, user_id, comment, is_internal, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, incident_id, user_id, comment, is_internal, created_at, updated_at
            "#,
        )
        .bind(comment.id)
        .bind(comment.incident_id)
        .bind(comment.user_id)
        .bind(&comment.comment)
        .bind(comment.is_internal)
        .bind(comment.created_at)
        .bind(comment.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to add comment: {}", e)))?;

        Ok(result)
    }

    pub async fn comments(&self, incident_id: &Uuid) -> Result<Vec<IncidentComment>> {
        let result = sqlx::query_as::<_, IncidentComment>(
            r#"
            SELECT id, incident_id, user_id, comment, is_internal, created_at, updated_at
            FROM incident_comments
            WHERE incident_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(incident_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get comments: {}", e)))?;

        Ok(result)
    }

    pub async fn log_action(&self, log: &IncidentActionLog) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::Database(format!("Failed to acquire connection: {}", e)))?;
        Self::log_action_in(&mut conn, log).await
    }

    pub async fn log_action_in(conn: &mut PgConnection, log: &IncidentActionLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incident_action_logs (id, incident_id, user_id, action, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.id)
        .bind(log.incident_id)
        .bind(log.user_id)
        .bind(log.action)
        .bind(&log.details)
        .bind(log.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to log incident action: {}", e)))?;

        Ok(())
    }

    pub async fn action_logs(&self, incident_id: &Uuid) -> Result<Vec<IncidentActionLog>> {
        let result = sqlx::query_as::<_, IncidentActionLog>(
            r#"
            SELECT id, incident_id, user_id, action, details, created_at
            FROM incident_action_logs
            WHERE incident_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(incident_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get action logs: {}", e)))?;

        Ok(result)
    }

    /// Store an evidence row together with its audit entry
    pub async fn add_evidence(&self, evidence: &Evidence, log: &IncidentActionLog) -> Result<Evidence> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let result = sqlx::query_as::<_, Evidence>(&format!(
            "INSERT INTO incident_evidence ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            EVIDENCE_COLUMNS, EVIDENCE_COLUMNS
        ))
        .bind(evidence.id)
        .bind(evidence.incident_id)
        .bind(evidence.evidence_type)
        .bind(&evidence.file_path)
        .bind(&evidence.original_filename)
        .bind(evidence.file_size)
        .bind(&evidence.description)
        .bind(evidence.uploaded_by)
        .bind(evidence.uploaded_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to add evidence: {}", e)))?;

        Self::log_action_in(&mut tx, log).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit evidence: {}", e)))?;

        info!("Evidence {} added to incident {}", result.id, result.incident_id);
        Ok(result)
    }

    /// Newest first
    pub async fn evidence(&self, incident_id: &Uuid) -> Result<Vec<Evidence>> {
        let result = sqlx::query_as::<_, Evidence>(&format!(
            "SELECT {} FROM incident_evidence WHERE incident_id = $1 ORDER BY uploaded_at DESC",
            EVIDENCE_COLUMNS
        ))
        .bind(incident_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get evidence: {}", e)))?;

        Ok(result)
    }
}
