use super::user_models::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "report_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Processing,
    Resolved,
    Closed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Processing => "processing",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "report_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReportPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportCategory {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub icon: String,
}

/// User-submitted incident report
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IncidentReport {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub reporter_id: Uuid,
    pub category_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub status: ReportStatus,
    pub priority: ReportPriority,
    pub anonymous: bool,
    pub incident_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IncidentReport {
    pub fn new(reporter_id: Uuid, title: &str, description: &str, incident_date: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.to_string(),
            reporter_id,
            category_id: None,
            location_id: None,
            status: ReportStatus::Pending,
            priority: ReportPriority::Medium,
            anonymous: false,
            incident_date,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reporter name as shown to other users
    pub fn display_reporter(&self, reporter: Option<&User>) -> String {
        if self.anonymous {
            return "Anonymous".to_string();
        }
        reporter.map_or_else(|| "Unknown".to_string(), |user| user.full_name())
    }

    /// Staff see every report, everyone else only their own
    pub fn is_visible_to(&self, user: &User) -> bool {
        user.role.can_view_all_reports() || self.reporter_id == user.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportImage {
    pub id: Uuid,
    pub report_id: Uuid,
    pub file_path: String,
    pub caption: String,
    pub ai_analysis: serde_json::Value,
    pub analysis_requested: bool,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
}

impl ReportImage {
    pub fn has_analysis(&self) -> bool {
        self.ai_analysis
            .as_object()
            .map_or(false, |map| !map.is_empty())
    }
}

/// Status change or note appended to a report
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportUpdate {
    pub id: Uuid,
    pub report_id: Uuid,
    pub updated_by: Option<Uuid>,
    pub status_change: Option<ReportStatus>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// Report as returned by the API, with the reporter resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportView {
    #[serde(flatten)]
    pub report: IncidentReport,
    pub reporter_display: String,
    pub image_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::user_models::UserRole;

    #[test]
    fn anonymous_reports_hide_the_reporter() {
        let mut user = User::new("student@campus.edu", "hash".into(), UserRole::Viewer);
        user.first_name = "Ada".into();
        user.last_name = "Obi".into();
        let mut report = IncidentReport::new(user.id, "Broken lock", "Lab door", Utc::now());

        assert_eq!(report.display_reporter(Some(&user)), "Ada Obi");
        report.anonymous = true;
        assert_eq!(report.display_reporter(Some(&user)), "Anonymous");
    }

    #[test]
    fn viewers_only_see_their_own_reports() {
        let owner = User::new("a@campus.edu", "h".into(), UserRole::Viewer);
        let other = User::new("b@campus.edu", "h".into(), UserRole::Viewer);
        let manager = User::new("m@campus.edu", "h".into(), UserRole::Manager);
        let report = IncidentReport::new(owner.id, "t", "d", Utc::now());

        assert!(report.is_visible_to(&owner));
        assert!(!report.is_visible_to(&other));
        assert!(report.is_visible_to(&manager));
    }
}
