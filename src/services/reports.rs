use crate::db::models::report_models::{
    IncidentReport, ReportCategory, ReportImage, ReportPriority, ReportStatus, ReportUpdate,
    ReportView,
};
use crate::db::models::user_models::User;
use crate::db::repositories::reports::ReportsRepository;
use crate::db::repositories::users::UsersRepository;
use crate::detector::{DetectorClient, FileUpload, ImageParams};
use crate::error::Error;
use crate::jobs::validate_upload;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Report submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub location_id: Option<Uuid>,
    #[serde(default)]
    pub priority: ReportPriority,
    #[serde(default)]
    pub anonymous: bool,
    pub incident_date: DateTime<Utc>,
}

/// Report with images and its update log
#[derive(Debug, Clone, Serialize)]
pub struct ReportDetail {
    #[serde(flatten)]
    pub view: ReportView,
    pub images: Vec<ReportImage>,
    pub updates: Vec<ReportUpdate>,
    pub can_edit: bool,
}

/// Keep only characters that are safe in a stored file name
pub(crate) fn safe_file_name(name: &str) -> String {
    let cleaned: String = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

fn validate_report(title: &str, description: &str, incident_date: DateTime<Utc>) -> Result<(), Error> {
    if title.trim().is_empty() || description.trim().is_empty() {
        return Err(Error::Validation("Title and description are required".to_string()));
    }
    if incident_date > Utc::now() {
        return Err(Error::Validation("Incident date cannot be in the future".to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ReportService {
    reports: ReportsRepository,
    users: UsersRepository,
    detector: DetectorClient,
    media_root: PathBuf,
}

impl ReportService {
    pub fn new(pool: Arc<PgPool>, detector: DetectorClient, media_root: impl Into<PathBuf>) -> Self {
        Self {
            reports: ReportsRepository::new(pool.clone()),
            users: UsersRepository::new(pool),
            detector,
            media_root: media_root.into(),
        }
    }

    pub async fn categories(&self) -> Result<Vec<ReportCategory>> {
        self.reports.get_categories().await
    }

    pub async fn create_category(&self, actor: &User, name: &str, description: &str, icon: &str) -> Result<ReportCategory> {
        if !actor.role.can_process_reports() {
            return Err(Error::Authorization("Only staff can add report categories".to_string()).into());
        }
        if name.trim().is_empty() {
            return Err(Error::Validation("Category name is required".to_string()).into());
        }
        let category = ReportCategory {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
        };
        self.reports.create_category(&category).await
    }

    pub async fn create(&self, reporter: &User, new: NewReport) -> Result<IncidentReport> {
        validate_report(&new.title, &new.description, new.incident_date)?;

        let mut report = IncidentReport::new(reporter.id, new.title.trim(), &new.description, new.incident_date);
        report.category_id = new.category_id;
        report.location_id = new.location_id;
        report.priority = new.priority;
        report.anonymous = new.anonymous;

        self.reports.create(&report).await
    }

    /// Report visible to `viewer`; hidden reports read as missing
    async fn visible(&self, viewer: &User, id: &Uuid) -> Result<IncidentReport> {
        let report = self
            .reports
            .get_by_id(id)
            .await?
            .filter(|r| r.is_visible_to(viewer))
            .ok_or_else(|| Error::NotFound(format!("Report {} not found", id)))?;
        Ok(report)
    }

    async fn views(&self, reports: Vec<IncidentReport>) -> Result<Vec<ReportView>> {
        let ids: Vec<Uuid> = reports.iter().map(|r| r.id).collect();
        let counts: HashMap<Uuid, i64> = self.reports.image_counts(&ids).await?.into_iter().collect();

        let mut reporters: HashMap<Uuid, Option<User>> = HashMap::new();
        let mut views = Vec::with_capacity(reports.len());
        for report in reports {
            if !report.anonymous && !reporters.contains_key(&report.reporter_id) {
                let user = self.users.get_by_id(&report.reporter_id).await?;
                reporters.insert(report.reporter_id, user);
            }
            let reporter = reporters.get(&report.reporter_id).and_then(|u| u.as_ref());
            views.push(ReportView {
                reporter_display: report.display_reporter(reporter),
                image_count: counts.get(&report.id).copied().unwrap_or(0) as usize,
                report,
            });
        }
        Ok(views)
    }

    /// Staff see every report, viewers their own
    pub async fn list(&self, viewer: &User, status: Option<ReportStatus>, limit: i64) -> Result<Vec<ReportView>> {
        let reporter = if viewer.role.can_view_all_reports() {
            None
        } else {
            Some(viewer.id)
        };
        let reports = self.reports.list(reporter, status, limit.clamp(1, 500)).await?;
        self.views(reports).await
    }

    pub async fn detail(&self, viewer: &User, id: &Uuid) -> Result<ReportDetail> {
        let report = self.visible(viewer, id).await?;
        let can_edit = report.reporter_id == viewer.id && report.status == ReportStatus::Pending;
        let images = self.reports.images(id).await?;
        let updates = self.reports.updates(id).await?;
        let view = self
            .views(vec![report])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("Report view missing".to_string()))?;

        Ok(ReportDetail {
            view,
            images,
            updates,
            can_edit,
        })
    }

    /// Reporters may edit their own report while it is pending
    pub async fn edit(&self, viewer: &User, id: &Uuid, changes: NewReport) -> Result<IncidentReport> {
        let mut report = self.visible(viewer, id).await?;
        if report.reporter_id != viewer.id || report.status != ReportStatus::Pending {
            return Err(Error::Authorization("Only pending reports can be edited by their reporter".to_string()).into());
        }
        validate_report(&changes.title, &changes.description, changes.incident_date)?;

        report.title = changes.title.trim().to_string();
        report.description = changes.description;
        report.category_id = changes.category_id;
        report.location_id = changes.location_id;
        report.priority = changes.priority;
        report.anonymous = changes.anonymous;
        report.incident_date = changes.incident_date;
        self.reports.update(&report).await
    }

    /// Staff status change or note. Every call appends to the update log.
    pub async fn update_status(
        &self,
        actor: &User,
        id: &Uuid,
        status: Option<ReportStatus>,
        notes: &str,
    ) -> Result<ReportUpdate> {
        if !actor.role.can_process_reports() {
            return Err(Error::Authorization("Only staff can process reports".to_string()).into());
        }
        let mut report = self.visible(actor, id).await?;
        let notes = notes.trim();

        let update = match status.filter(|s| *s != report.status) {
            Some(new_status) => {
                let old_status = report.status;
                report.status = new_status;
                self.reports.update(&report).await?;
                info!("Report {} moved from {} to {} by {}", report.id, old_status, new_status, actor.email);
                ReportUpdate {
                    id: Uuid::new_v4(),
                    report_id: report.id,
                    updated_by: Some(actor.id),
                    status_change: Some(new_status),
                    notes: if notes.is_empty() {
                        format!("Status changed from {} to {}", old_status, new_status)
                    } else {
                        notes.to_string()
                    },
                    created_at: Utc::now(),
                }
            }
            None if !notes.is_empty() => ReportUpdate {
                id: Uuid::new_v4(),
                report_id: report.id,
                updated_by: Some(actor.id),
                status_change: None,
                notes: notes.to_string(),
                created_at: Utc::now(),
            },
            None => return Err(Error::Validation("Nothing to update".to_string()).into()),
        };

        self.reports.add_update(&update).await
    }

    pub async fn delete(&self, actor: &User, id: &Uuid) -> Result<()> {
        let report = self.visible(actor, id).await?;
        let own_pending = report.reporter_id == actor.id && report.status == ReportStatus::Pending;
        if !own_pending && !actor.role.can_invite_users() {
            return Err(Error::Authorization("You cannot delete this report".to_string()).into());
        }

        self.reports.delete(id).await?;
        let dir = self.media_root.join("report_images").join(id.to_string());
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!("Failed to remove images of report {}: {}", id, e);
            }
        }
        Ok(())
    }

    /// Store an uploaded image on disk and attach it to the report
    pub async fn add_image(&self, viewer: &User, id: &Uuid, upload: FileUpload, caption: &str) -> Result<ReportImage> {
        let report = self.visible(viewer, id).await?;
        validate_upload(&upload, "image")?;

        let image_id = Uuid::new_v4();
        let dir = self.media_root.join("report_images").join(report.id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Internal(format!("Failed to create {}: {}", dir.display(), e)))?;
        let path = dir.join(format!("{}_{}", image_id, safe_file_name(&upload.filename)));
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|e| Error::Internal(format!("Failed to store image: {}", e)))?;

        let image = ReportImage {
            id: image_id,
            report_id: report.id,
            file_path: path.to_string_lossy().into_owned(),
            caption: caption.to_string(),
            ai_analysis: json!({}),
            analysis_requested: false,
            analyzed_at: None,
            uploaded_at: Utc::now(),
        };
        self.reports.add_image(&image).await
    }

    /// Run the detector over the report's images. Already analysed images
    /// are skipped unless `reanalyze` is set. Returns how many succeeded.
    pub async fn analyze_images(&self, actor: &User, id: &Uuid, reanalyze: bool, params: ImageParams) -> Result<usize> {
        if !actor.role.can_process_reports() {
            return Err(Error::Authorization("Only staff can analyse report images".to_string()).into());
        }
        let report = self.visible(actor, id).await?;

        let mut analysed = 0;
        for mut image in self.reports.images(&report.id).await? {
            if image.has_analysis() && !reanalyze {
                continue;
            }

            let bytes = match tokio::fs::read(&image.file_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Cannot read image {} of report {}: {}", image.id, report.id, e);
                    continue;
                }
            };
            let name = Path::new(&image.file_path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("image.jpg")
                .to_string();
            let upload = FileUpload::new(&name, "image/jpeg", bytes);

            image.analysis_requested = true;
            match self.detector.process_image(&upload, &params).await {
                Ok(result) => {
                    image.ai_analysis = serde_json::to_value(&result)?;
                    image.analyzed_at = Some(Utc::now());
                    analysed += 1;
                }
                Err(e) => error!("Error analysing image {} of report {}: {}", image.id, report.id, e),
            }
            self.reports.save_image_analysis(&image).await?;
        }

        info!("Analysed {} image(s) of report {}", analysed, report.id);
        Ok(analysed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn stored_names_are_sanitised() {
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("gate cam #1.jpg"), "gate_cam__1.jpg");
        assert_eq!(safe_file_name(".."), "image");
        assert_eq!(safe_file_name(""), "image");
    }

    #[test]
    fn reports_need_text_and_a_past_date() {
        let now = Utc::now();
        assert!(validate_report("Broken lock", "Lab 3 door", now - Duration::hours(1)).is_ok());
        assert!(validate_report(" ", "Lab 3 door", now).is_err());
        assert!(matches!(
            validate_report("Broken lock", "Lab 3 door", now + Duration::days(1)),
            Err(Error::Validation(_))
        ));
    }
}
