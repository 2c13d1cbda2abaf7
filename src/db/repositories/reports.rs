use crate::{
    db::models::report_models::{
        IncidentReport, ReportCategory, ReportImage, ReportStatus, ReportUpdate,
    },
    error::Error,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const REPORT_COLUMNS: &str = "id, title, description, reporter_id, category_id, location_id, status, \
     priority, anonymous, incident_date, created_at, updated_at";

const IMAGE_COLUMNS: &str =
    "id, report_id, file_path, caption, ai_analysis, analysis_requested, analyzed_at, uploaded_at";

/// User-submitted reports, their categories, images and updates
#[derive(Clone)]
pub struct ReportsRepository {
    pool: Arc<PgPool>,
}

impl ReportsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn create_category(&self, category: &ReportCategory) -> Result<ReportCategory> {
        let result = sqlx::query_as::<_, ReportCategory>(
            r#"
            INSERT INTO report_categories (id, name, description, icon)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, icon
            "#,
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.icon)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create report category: {}", e)))?;

        Ok(result)
    }

    pub async fn get_categories(&self) -> Result<Vec<ReportCategory>> {
        let result = sqlx::query_as::<_, ReportCategory>(
            "SELECT id, name, description, icon FROM report_categories ORDER BY name",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list report categories: {}", e)))?;

        Ok(result)
    }

    pub async fn create(&self, report: &IncidentReport) -> Result<IncidentReport> {
        info!("Creating report: {}", report.title);

        let result = sqlx::query_as::<_, IncidentReport>(&format!(
            r#"
            INSERT INTO incident_reports ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            REPORT_COLUMNS, REPORT_COLUMNS
        ))
        .bind(report.id)
        .bind(&report.title)
        .bind(&report.description)
        .bind(report.reporter_id)
        .bind(report.category_id)
        .bind(report.location_id)
        .bind(report.status)
        .bind(report.priority)
        .bind(report.anonymous)
        .bind(report.incident_date)
        .bind(report.created_at)
        .bind(report.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create report: {}", e)))?;

        Ok(result)
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<IncidentReport>> {
        let result = sqlx::query_as::<_, IncidentReport>(&format!(
            "SELECT {} FROM incident_reports WHERE id = $1",
            REPORT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get report: {}", e)))?;

        Ok(result)
    }

    /// Newest first; restricted to one reporter when `reporter_id` is set
    pub async fn list(
        &self,
        reporter_id: Option<Uuid>,
        status: Option<ReportStatus>,
        limit: i64,
    ) -> Result<Vec<IncidentReport>> {
        let result = sqlx::query_as::<_, IncidentReport>(&format!(
            r#"
            SELECT {} FROM incident_reports
            WHERE ($1::uuid IS NULL OR reporter_id = $1)
              AND ($2::report_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            REPORT_COLUMNS
        ))
        .bind(reporter_id)
        .bind(status)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list reports: {}", e)))?;

        Ok(result)
    }

    pub async fn update(&self, report: &IncidentReport) -> Result<IncidentReport> {
        let result = sqlx::query_as::<_, IncidentReport>(&format!(
            r#"
            UPDATE incident_reports
            SET title = $1, description = $2, category_id = $3, location_id = $4, status = $5,
                priority = $6, anonymous = $7, incident_date = $8, updated_at = $9
            WHERE id = $10
            RETURNING {}
            "#,
            REPORT_COLUMNS
        ))
        .bind(&report.title)
        .bind(&report.description)
        .bind(report.category_id)
        .bind(report.location_id)
        .bind(report.status)
        .bind(report.priority)
        .bind(report.anonymous)
        .bind(report.incident_date)
        .bind(Utc::now())
        .bind(report.id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update report: {}", e)))?;

        Ok(result)
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM incident_reports WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete report: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn add_update(&self, update: &ReportUpdate) -> Result<ReportUpdate> {
        let result = sqlx::query_as::<_, ReportUpdate>(
            r#"
            INSERT INTO report_updates (id, report_id, updated_by, status_change, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, report_id, updated_by, status_change, notes, created_at
            "#,
        )
        .bind(update.id)
        .bind(update.report_id)
        .bind(update.updated_by)
        .bind(update.status_change)
        .bind(&update.notes)
        .bind(update.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to add report update: {}", e)))?;

        Ok(result)
    }

    pub async fn updates(&self, report_id: &Uuid) -> Result<Vec<ReportUpdate>> {
        let result = sqlx::query_as::<_, ReportUpdate>(
            r#"
            SELECT id, report_id, updated_by, status_change, notes, created_at
            FROM report_updates WHERE report_id = $1 ORDER BY created_at
            "#,
        )
        .bind(report_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get report updates: {}", e)))?;

        Ok(result)
    }

    pub async fn add_image(&self, image: &ReportImage) -> Result<ReportImage> {
        let result = sqlx::query_as::<_, ReportImage>(&format!(
            r#"
            INSERT INTO report_images ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            IMAGE_COLUMNS, IMAGE_COLUMNS
        ))
        .bind(image.id)
        .bind(image.report_id)
        .bind(&image.file_path)
        .bind(&image.caption)
        .bind(&image.ai_analysis)
        .bind(image.analysis_requested)
        .bind(image.analyzed_at)
        .bind(image.uploaded_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to add report image: {}", e)))?;

        Ok(result)
    }

    pub async fn images(&self, report_id: &Uuid) -> Result<Vec<ReportImage>> {
        let result = sqlx::query_as::<_, ReportImage>(&format!(
            "SELECT {} FROM report_images WHERE report_id = $1 ORDER BY uploaded_at",
            IMAGE_COLUMNS
        ))
        .bind(report_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get report images: {}", e)))?;

        Ok(result)
    }

    pub async fn image_counts(&self, report_ids: &[Uuid]) -> Result<Vec<(Uuid, i64)>> {
        let result = sqlx::query_as::<_, (Uuid, i64)>(
            "SELECT report_id, COUNT(*) FROM report_images WHERE report_id = ANY($1) GROUP BY report_id",
        )
        .bind(report_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count report images: {}", e)))?;

        Ok(result)
    }

    pub async fn save_image_analysis(&self, image: &ReportImage) -> Result<()> {
        sqlx::query(
            "UPDATE report_images SET ai_analysis = $1, analysis_requested = $2, analyzed_at = $3 WHERE id = $4",
        )
        .bind(&image.ai_analysis)
        .bind(image.analysis_requested)
        .bind(image.analyzed_at)
        .bind(image.id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to save image analysis: {}", e)))?;

        Ok(())
    }
}
