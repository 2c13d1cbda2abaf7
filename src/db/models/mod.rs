pub mod alert_models;
pub mod camera_models;
pub mod incident_models;
pub mod job_models;
pub mod report_models;
pub mod user_models;
