use crate::db::models::camera_models::CameraStatus;
use crate::db::models::incident_models::IncidentStatus;
use crate::db::models::job_models::JobStatus;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Event types supported by the system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    // Incident events
    IncidentCreated,
    IncidentStatusChanged,

    // Camera events
    CameraStatusChanged,

    // Video job events
    JobCompleted,
    JobFailed,

    // System events
    SystemStartup,
    SystemShutdown,

    // Custom event
    Custom(String),
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncidentCreated => write!(f, "incident.created"),
            Self::IncidentStatusChanged => write!(f, "incident.status_changed"),
            Self::CameraStatusChanged => write!(f, "camera.status_changed"),
            Self::JobCompleted => write!(f, "job.completed"),
            Self::JobFailed => write!(f, "job.failed"),
            Self::SystemStartup => write!(f, "system.startup"),
            Self::SystemShutdown => write!(f, "system.shutdown"),
            Self::Custom(name) => write!(f, "custom.{}", name),
        }
    }
}

/// Event message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique event ID
    pub id: Uuid,
    pub event_type: EventType,
    /// Entity the event is about (incident, camera, job)
    pub source_id: Option<Uuid>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

impl EventMessage {
    pub fn new<T: Serialize>(
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            source_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Get the routing key for the event
    pub fn routing_key(&self) -> String {
        match &self.source_id {
            Some(id) => format!("{}.{}", self.event_type, id),
            None => self.event_type.to_string(),
        }
    }

    /// Decode the payload into its typed form
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentCreated {
    pub incident_id: Uuid,
    pub display_id: String,
    pub camera_id: Option<Uuid>,
    /// Incidents from uploaded videos carry the job id here
    pub source_video: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentStatusChanged {
    pub incident_id: Uuid,
    pub old_status: IncidentStatus,
    pub new_status: IncidentStatus,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatusChanged {
    pub camera_id: Uuid,
    pub old_status: CameraStatus,
    pub new_status: CameraStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFinished {
    pub job_id: String,
    pub status: JobStatus,
    pub incidents: Vec<Uuid>,
    #[serde(default)]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_keys_are_dotted() {
        let camera = Uuid::new_v4();
        let event = EventMessage::new(
            EventType::CameraStatusChanged,
            Some(camera),
            CameraStatusChanged {
                camera_id: camera,
                old_status: CameraStatus::Active,
                new_status: CameraStatus::Offline,
            },
        )
        .unwrap();

        assert_eq!(event.routing_key(), format!("camera.status_changed.{}", camera));
        assert_eq!(EventType::Custom("drill".into()).to_string(), "custom.drill");

        let payload: CameraStatusChanged = event.payload_as().unwrap();
        assert_eq!(payload.new_status, CameraStatus::Offline);
    }
}
