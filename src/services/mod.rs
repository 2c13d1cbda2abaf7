pub mod alert_dispatcher;
pub mod alerts;
pub mod cameras;
pub mod dashboard;
pub mod incidents;
pub mod reports;

pub use alert_dispatcher::{AlertDispatcher, AlertMaintenance};
pub use alerts::AlertService;
pub use cameras::CameraService;
pub use dashboard::DashboardService;
pub use incidents::IncidentService;
pub use reports::ReportService;
