use crate::db::models::camera_models::CameraStatistics;
use crate::db::models::incident_models::Incident;
use crate::db::models::report_models::{ReportStatus, ReportView};
use crate::db::models::user_models::{User, UserRole};
use crate::jobs::JobService;
use crate::services::alerts::AlertService;
use crate::services::cameras::CameraService;
use crate::services::incidents::IncidentService;
use crate::services::reports::ReportService;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const RECENT_LIMIT: i64 = 10;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReportCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub resolved: usize,
}

impl ReportCounts {
    pub fn from_views(reports: &[ReportView]) -> Self {
        let count = |status| reports.iter().filter(|r| r.report.status == status).count();
        Self {
            total: reports.len(),
            pending: count(ReportStatus::Pending),
            processing: count(ReportStatus::Processing),
            resolved: count(ReportStatus::Resolved),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewerDashboard {
    pub report_counts: ReportCounts,
    pub recent_reports: Vec<ReportView>,
    pub unread_alerts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffDashboard {
    pub role: UserRole,
    pub cameras: CameraStatistics,
    pub open_incidents_by_severity: BTreeMap<String, i64>,
    pub incidents_today: i64,
    pub active_jobs: i64,
    pub unread_alerts: i64,
    pub recent_incidents: Vec<Incident>,
    pub pending_reports: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dashboard {
    Viewer(ViewerDashboard),
    Staff(StaffDashboard),
}

/// Role-aware landing summary
#[derive(Clone)]
pub struct DashboardService {
    incidents: IncidentService,
    cameras: CameraService,
    reports: ReportService,
    jobs: Arc<JobService>,
    alerts: Arc<AlertService>,
}

impl DashboardService {
    pub fn new(
        incidents: IncidentService,
        cameras: CameraService,
        reports: ReportService,
        jobs: Arc<JobService>,
        alerts: Arc<AlertService>,
    ) -> Self {
        Self {
            incidents,
            cameras,
            reports,
            jobs,
            alerts,
        }
    }

    pub async fn summary(&self, user: &User) -> Result<Dashboard> {
        let unread_alerts = self.alerts.unread_count(user).await?;

        if !user.role.can_view_analytics() {
            let mine = self.reports.list(user, None, 500).await?;
            let report_counts = ReportCounts::from_views(&mine);
            return Ok(Dashboard::Viewer(ViewerDashboard {
                report_counts,
                recent_reports: mine.into_iter().take(RECENT_LIMIT as usize).collect(),
                unread_alerts,
            }));
        }

        let pending_reports = self
            .reports
            .list(user, Some(ReportStatus::Pending), 500)
            .await?
            .len();

        Ok(Dashboard::Staff(StaffDashboard {
            role: user.role,
            cameras: self.cameras.statistics().await?,
            open_incidents_by_severity: self.incidents.open_counts_by_severity().await?.into_iter().collect(),
            incidents_today: self.incidents.count_today().await?,
            active_jobs: self.jobs.count_active(None).await?,
            unread_alerts,
            recent_incidents: self.incidents.recent(RECENT_LIMIT).await?,
            pending_reports,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::report_models::IncidentReport;
    use chrono::Utc;
    use uuid::Uuid;

    fn view(status: ReportStatus) -> ReportView {
        let mut report = IncidentReport::new(Uuid::new_v4(), "Lost badge", "Near the library", Utc::now());
        report.status = status;
        ReportView {
            report,
            reporter_display: "Anonymous".into(),
            image_count: 0,
        }
    }

    #[test]
    fn report_counts_by_status() {
        let views = vec![
            view(ReportStatus::Pending),
            view(ReportStatus::Pending),
            view(ReportStatus::Resolved),
            view(ReportStatus::Closed),
        ];
        assert_eq!(
            ReportCounts::from_views(&views),
            ReportCounts {
                total: 4,
                pending: 2,
                processing: 0,
                resolved: 1,
            }
        );
    }

    #[test]
    fn dashboard_is_tagged_by_kind() {
        let dashboard = Dashboard::Viewer(ViewerDashboard {
            report_counts: ReportCounts::default(),
            recent_reports: Vec::new(),
            unread_alerts: 3,
        });
        let value = serde_json::to_value(&dashboard).unwrap();
        assert_eq!(value["kind"], "viewer");
        assert_eq!(value["unread_alerts"], 3);
    }
}
