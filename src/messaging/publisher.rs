use crate::db::models::camera_models::CameraStatus;
use crate::db::models::incident_models::{Incident, IncidentStatus};
use crate::db::models::job_models::VideoProcessingJob;
use crate::messaging::broker::{MessageBroker, MessageBrokerTrait};
use crate::messaging::event::{
    CameraStatusChanged, EventType, IncidentCreated, IncidentStatusChanged, JobFinished,
};
use anyhow::Result;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

/// Helper for publishing domain events
#[derive(Clone)]
pub struct EventPublisher {
    message_broker: Arc<MessageBroker>,
}

impl EventPublisher {
    pub fn new(message_broker: Arc<MessageBroker>) -> Self {
        Self { message_broker }
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.message_broker
    }

    pub async fn incident_created(&self, incident: &Incident) -> Result<()> {
        let payload = IncidentCreated {
            incident_id: incident.id,
            display_id: incident.incident_id.clone(),
            camera_id: incident.camera_id,
            source_video: incident.source_video.clone(),
        };

        self.message_broker
            .publish(EventType::IncidentCreated, Some(incident.id), payload)
            .await?;

        info!("Published incident created event for {}", incident.incident_id);
        Ok(())
    }

    pub async fn incident_status_changed(
        &self,
        incident: &Incident,
        old_status: IncidentStatus,
        user_id: Option<Uuid>,
    ) -> Result<()> {
        let payload = IncidentStatusChanged {
            incident_id: incident.id,
            old_status,
            new_status: incident.status,
            user_id,
        };

        self.message_broker
            .publish(EventType::IncidentStatusChanged, Some(incident.id), payload)
            .await
    }

    pub async fn camera_status_changed(
        &self,
        camera_id: Uuid,
        old_status: CameraStatus,
        new_status: CameraStatus,
    ) -> Result<()> {
        let payload = CameraStatusChanged {
            camera_id,
            old_status,
            new_status,
        };

        self.message_broker
            .publish(EventType::CameraStatusChanged, Some(camera_id), payload)
            .await?;

        info!("Published camera status changed event for {}: {} -> {}", camera_id, old_status, new_status);
        Ok(())
    }

    /// Completed or failed video job
    pub async fn job_finished(&self, job: &VideoProcessingJob, incidents: Vec<Uuid>) -> Result<()> {
        let event_type = if job.error.is_empty() {
            EventType::JobCompleted
        } else {
            EventType::JobFailed
        };
        let payload = JobFinished {
            job_id: job.job_id.clone(),
            status: job.status,
            incidents,
            error: job.error.clone(),
        };

        self.message_broker
            .publish(event_type, Some(job.id), payload)
            .await
    }
}
