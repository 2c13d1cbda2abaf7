use crate::db::models::incident_models::{
    Evidence, EvidenceType, Incident, IncidentAction, IncidentActionLog, IncidentComment,
    IncidentFilter, IncidentStatistics, IncidentUpdate, NewIncident,
};
use crate::db::models::user_models::User;
use crate::db::repositories::incidents::IncidentsRepository;
use crate::db::repositories::users::UsersRepository;
use crate::detector::FileUpload;
use crate::error::Error;
use crate::messaging::EventPublisher;
use crate::services::reports::safe_file_name;
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Incident with its discussion and audit trail
#[derive(Debug, Clone, Serialize)]
pub struct IncidentDetail {
    #[serde(flatten)]
    pub incident: Incident,
    pub comments: Vec<IncidentComment>,
    pub action_logs: Vec<IncidentActionLog>,
    pub evidence: Vec<Evidence>,
}

/// Lifecycle step requested by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Transition {
    Acknowledge,
    Investigate,
    Resolve {
        #[serde(default)]
        notes: String,
        #[serde(default)]
        is_false_positive: bool,
    },
    FalseAlarm,
    Escalate {
        #[serde(default)]
        reason: String,
    },
}

/// One action applied to many incidents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkAction {
    Acknowledge,
    Assign {
        user_id: Option<Uuid>,
    },
    Resolve {
        #[serde(default)]
        notes: String,
    },
    FalseAlarm,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkActionRequest {
    pub incident_ids: Vec<Uuid>,
    #[serde(flatten)]
    pub action: BulkAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub requested: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Missing incidents and refused transitions are skipped; anything else aborts the batch
fn is_skippable(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<Error>(),
        Some(Error::NotFound(_)) | Some(Error::InvalidTransition(_))
    )
}

fn require_staff(user: &User) -> Result<(), Error> {
    if user.role.can_acknowledge_incidents() {
        Ok(())
    } else {
        Err(Error::Authorization(
            "Only security staff can work incidents".to_string(),
        ))
    }
}

/// Field changes as `{field: {old, new}}`
fn apply_update(incident: &mut Incident, update: IncidentUpdate) -> Map<String, Value> {
    let mut changes = Map::new();

    macro_rules! set {
        ($field:ident) => {
            if let Some(value) = update.$field {
                if incident.$field != value {
                    changes.insert(
                        stringify!($field).to_string(),
                        json!({"old": incident.$field, "new": value}),
                    );
                    incident.$field = value;
                }
            }
        };
    }

    set!(title);
    set!(description);
    set!(incident_type);
    set!(severity);
    set!(location_description);
    set!(tags);
    set!(notes);
    set!(police_report_number);

    changes
}

fn transition_action(transition: &Transition) -> IncidentAction {
    match transition {
        Transition::Acknowledge => IncidentAction::Acknowledged,
        Transition::Investigate => IncidentAction::StatusChanged,
        Transition::Resolve { .. } => IncidentAction::Resolved,
        Transition::FalseAlarm => IncidentAction::FalseAlarm,
        Transition::Escalate { .. } => IncidentAction::Escalated,
    }
}

/// Start and end of a calendar day in a fixed UTC offset
pub fn day_bounds(date: NaiveDate, utc_offset_minutes: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc() - Duration::minutes(utc_offset_minutes as i64);
    (start, start + Duration::days(1))
}

#[derive(Clone)]
pub struct IncidentService {
    incidents: IncidentsRepository,
    users: UsersRepository,
    publisher: EventPublisher,
    utc_offset_minutes: i32,
    media_root: PathBuf,
}

impl IncidentService {
    pub fn new(
        pool: Arc<PgPool>,
        publisher: EventPublisher,
        utc_offset_minutes: i32,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            incidents: IncidentsRepository::new(pool.clone()),
            users: UsersRepository::new(pool),
            publisher,
            utc_offset_minutes,
            media_root: media_root.into(),
        }
    }

    async fn log(&self, incident: &Incident, user: Option<Uuid>, action: IncidentAction, details: Value) {
        let log = IncidentActionLog::new(incident.id, user, action, details);
        if let Err(e) = self.incidents.log_action(&log).await {
            warn!("Failed to log {:?} for {}: {}", action, incident.incident_id, e);
        }
    }

    /// Record a manually reported or detected incident.
    /// Live camera detections are announced to the alerting pipeline.
    pub async fn create(&self, actor: Option<&User>, new: NewIncident) -> Result<Incident> {
        if let Some(user) = actor {
            require_staff(user)?;
        }
        if new.title.trim().is_empty() {
            return Err(Error::Validation("Incident title is required".to_string()).into());
        }
        if !(0.0..=1.0).contains(&new.confidence_score) {
            return Err(Error::Validation("Confidence score must be between 0 and 1".to_string()).into());
        }

        let incident = self.incidents.create(new).await?;
        let actor_id = actor.map(|u| u.id);
        self.log(&incident, actor_id, IncidentAction::Created, json!({"title": incident.title}))
            .await;

        if incident.camera_id.is_some() && incident.source_video.is_none() {
            if let Err(e) = self.publisher.incident_created(&incident).await {
                warn!("Failed to publish incident {}: {}", incident.incident_id, e);
            }
        }

        Ok(incident)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Incident> {
        let incident = self
            .incidents
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Incident {} not found", id)))?;
        Ok(incident)
    }

    /// Internal comments are only shown to staff
    pub async fn detail(&self, id: &Uuid, viewer: &User) -> Result<IncidentDetail> {
        let incident = self.get(id).await?;
        let staff = viewer.role.can_acknowledge_incidents();

        let comments = self
            .incidents
            .comments(id)
            .await?
            .into_iter()
            .filter(|c| staff || !c.is_internal)
            .collect();
        let action_logs = if staff {
            self.incidents.action_logs(id).await?
        } else {
            Vec::new()
        };
        let evidence = self.incidents.evidence(id).await?;

        Ok(IncidentDetail {
            incident,
            comments,
            action_logs,
            evidence,
        })
    }

    pub async fn search(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        self.incidents.search(filter).await
    }

    pub async fn update(&self, id: &Uuid, actor: &User, update: IncidentUpdate) -> Result<Incident> {
        require_staff(actor)?;
        let mut incident = self.get(id).await?;

        let changes = apply_update(&mut incident, update);
        if changes.is_empty() {
            return Ok(incident);
        }

        let updated = self.incidents.update(&incident).await?;
        let action = if changes.contains_key("severity") {
            IncidentAction::SeverityChanged
        } else {
            IncidentAction::Updated
        };
        self.log(&updated, Some(actor.id), action, Value::Object(changes)).await;

        Ok(updated)
    }

    /// Apply a guarded lifecycle transition
    pub async fn transition(&self, id: &Uuid, actor: &User, transition: Transition) -> Result<Incident> {
        require_staff(actor)?;
        let mut incident = self.get(id).await?;
        let old_status = incident.status;
        let now = Utc::now();

        let mut details = json!({"old_status": old_status});
        match &transition {
            Transition::Acknowledge => incident.acknowledge(actor.id, now)?,
            Transition::Investigate => incident.start_investigation(actor.id, now)?,
            Transition::Resolve {
                notes,
                is_false_positive,
            } => {
                incident.resolve(actor.id, notes, *is_false_positive, now)?;
                details["notes"] = json!(notes);
            }
            Transition::FalseAlarm => incident.mark_false_alarm(actor.id, now)?,
            Transition::Escalate { reason } => {
                incident.escalate(now)?;
                details["reason"] = json!(reason);
            }
        }
        details["new_status"] = json!(incident.status);

        let updated = self.incidents.update(&incident).await?;
        self.log(&updated, Some(actor.id), transition_action(&transition), details)
            .await;

        info!(
            "Incident {} moved from {} to {} by {}",
            updated.incident_id, old_status, updated.status, actor.email
        );

        if let Err(e) = self
            .publisher
            .incident_status_changed(&updated, old_status, Some(actor.id))
            .await
        {
            warn!("Failed to publish status change for {}: {}", updated.incident_id, e);
        }

        Ok(updated)
    }

    /// Assign to a staff member, or clear the assignment
    pub async fn assign(&self, id: &Uuid, actor: &User, assignee: Option<Uuid>) -> Result<Incident> {
        require_staff(actor)?;
        let mut incident = self.get(id).await?;

        if let Some(assignee_id) = assignee {
            let assignee = self
                .users
                .get_by_id(&assignee_id)
                .await?
                .filter(|u| u.active)
                .ok_or_else(|| Error::Validation(format!("User {} cannot be assigned", assignee_id)))?;
            require_staff(&assignee)?;
        }

        let previous = incident.assigned_to;
        incident.assigned_to = assignee;
        let updated = self.incidents.update(&incident).await?;
        self.log(
            &updated,
            Some(actor.id),
            IncidentAction::Assigned,
            json!({"old": previous, "new": assignee}),
        )
        .await;

        Ok(updated)
    }

    pub async fn add_comment(
        &self,
        id: &Uuid,
        author: &User,
        text: &str,
        is_internal: bool,
    ) -> Result<IncidentComment> {
        if text.trim().is_empty() {
            return Err(Error::Validation("Comment cannot be empty".to_string()).into());
        }
        let incident = self.get(id).await?;
        if is_internal {
            require_staff(author)?;
        }

        let now = Utc::now();
        let comment = IncidentComment {
            id: Uuid::new_v4(),
            incident_id: incident.id,
            user_id: author.id,
            comment: text.trim().to_string(),
            is_internal,
            created_at: now,
            updated_at: now,
        };
        let comment = self.incidents.add_comment(&comment).await?;
        self.log(
            &incident,
            Some(author.id),
            IncidentAction::CommentAdded,
            json!({"comment_id": comment.id, "is_internal": is_internal}),
        )
        .await;

        Ok(comment)
    }

    /// Store an evidence file under `incident_evidence/<incident>/` in the media root.
    /// The type is guessed from the extension when not given.
    pub async fn add_evidence(
        &self,
        id: &Uuid,
        actor: &User,
        upload: FileUpload,
        evidence_type: Option<EvidenceType>,
        description: &str,
    ) -> Result<Evidence> {
        require_staff(actor)?;
        if upload.bytes.is_empty() {
            return Err(Error::Validation("No evidence file provided".to_string()).into());
        }
        let incident = self.get(id).await?;

        let evidence_id = Uuid::new_v4();
        let dir = self
            .media_root
            .join("incident_evidence")
            .join(incident.id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Internal(format!("Failed to create {}: {}", dir.display(), e)))?;
        let path = dir.join(format!("{}_{}", evidence_id, safe_file_name(&upload.filename)));
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|e| Error::Internal(format!("Failed to store evidence: {}", e)))?;

        let evidence = Evidence {
            id: evidence_id,
            incident_id: incident.id,
            evidence_type: evidence_type.unwrap_or_else(|| EvidenceType::from_filename(&upload.filename)),
            file_path: path.to_string_lossy().into_owned(),
            original_filename: upload.filename.clone(),
            file_size: upload.bytes.len() as i64,
            description: description.trim().to_string(),
            uploaded_by: Some(actor.id),
            uploaded_at: Utc::now(),
        };
        let log = IncidentActionLog::new(
            incident.id,
            Some(actor.id),
            IncidentAction::EvidenceAdded,
            json!({
                "evidence_id": evidence.id,
                "evidence_type": evidence.evidence_type,
                "filename": evidence.original_filename,
            }),
        );

        let stored = match self.incidents.add_evidence(&evidence, &log).await {
            Ok(stored) => stored,
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove orphaned evidence {}: {}", path.display(), remove);
                }
                return Err(e);
            }
        };
        info!(
            "Evidence {} ({}) added to {} by {}",
            stored.id, stored.evidence_type, incident.incident_id, actor.email
        );
        Ok(stored)
    }

    pub async fn evidence(&self, id: &Uuid) -> Result<Vec<Evidence>> {
        let incident = self.get(id).await?;
        self.incidents.evidence(&incident.id).await
    }

    /// Apply one action to each listed incident in turn
    pub async fn bulk_action(&self, actor: &User, request: BulkActionRequest) -> Result<BulkOutcome> {
        require_staff(actor)?;
        if request.incident_ids.is_empty() {
            return Err(Error::Validation("No incidents selected".to_string()).into());
        }
        if matches!(request.action, BulkAction::Delete) && !actor.role.can_invite_users() {
            return Err(Error::Authorization("Only administrators can delete incidents".to_string()).into());
        }

        let mut outcome = BulkOutcome {
            requested: request.incident_ids.len(),
            ..Default::default()
        };
        for id in &request.incident_ids {
            let result = match &request.action {
                BulkAction::Acknowledge => self.transition(id, actor, Transition::Acknowledge).await.map(|_| ()),
                BulkAction::Assign { user_id } => self.assign(id, actor, *user_id).await.map(|_| ()),
                BulkAction::Resolve { notes } => self
                    .transition(
                        id,
                        actor,
                        Transition::Resolve {
                            notes: notes.clone(),
                            is_false_positive: false,
                        },
                    )
                    .await
                    .map(|_| ()),
                BulkAction::FalseAlarm => self.transition(id, actor, Transition::FalseAlarm).await.map(|_| ()),
                BulkAction::Delete => self.delete(id, actor).await,
            };

            match result {
                Ok(()) => outcome.updated += 1,
                Err(e) if is_skippable(&e) => {
                    warn!("Bulk {:?} skipped incident {}: {}", request.action, id, e);
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Bulk {:?} by {}: {} updated, {} skipped",
            request.action, actor.email, outcome.updated, outcome.skipped
        );
        Ok(outcome)
    }

    pub async fn delete(&self, id: &Uuid, actor: &User) -> Result<()> {
        if !actor.role.can_invite_users() {
            return Err(Error::Authorization("Only administrators can delete incidents".to_string()).into());
        }
        if !self.incidents.delete(id).await? {
            return Err(Error::NotFound(format!("Incident {} not found", id)).into());
        }
        info!("Incident {} deleted by {}", id, actor.email);
        Ok(())
    }

    /// Figures for one local calendar day
    pub async fn daily_statistics(&self, date: NaiveDate) -> Result<IncidentStatistics> {
        let (start, end) = day_bounds(date, self.utc_offset_minutes);
        let incidents = self.incidents.detected_between(start, end).await?;
        Ok(IncidentStatistics::from_incidents(date, &incidents))
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Incident>> {
        self.incidents.recent(limit).await
    }

    pub async fn open_counts_by_severity(&self) -> Result<Vec<(String, i64)>> {
        Ok(self
            .incidents
            .open_counts_by_severity()
            .await?
            .into_iter()
            .map(|(severity, count)| (severity.to_string(), count))
            .collect())
    }

    /// Current calendar date at the configured offset
    pub fn today(&self) -> NaiveDate {
        (Utc::now() + Duration::minutes(self.utc_offset_minutes as i64)).date_naive()
    }

    pub async fn count_today(&self) -> Result<i64> {
        let (start, end) = day_bounds(self.today(), self.utc_offset_minutes);
        Ok(self.incidents.detected_between(start, end).await?.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::incident_models::{IncidentSeverity, IncidentStatus, IncidentType};
    use crate::db::models::user_models::UserRole;
    use crate::db::test_pool;
    use crate::messaging::create_message_broker;

    fn incident() -> Incident {
        let new = NewIncident {
            title: "Loitering near lab".into(),
            description: String::new(),
            incident_type: IncidentType::Loitering,
            severity: IncidentSeverity::Low,
            camera_id: None,
            source_video: None,
            location_description: "Lab B".into(),
            confidence_score: 0.6,
            detection_metadata: json!({}),
            assigned_to: None,
            tags: vec![],
            detected_at: None,
            display_id: None,
        };
        Incident::from_new(new, "INC-20240101-0001".into(), Utc::now())
    }

    #[test]
    fn update_records_only_real_changes() {
        let mut inc = incident();
        let changes = apply_update(
            &mut inc,
            IncidentUpdate {
                title: Some("Loitering near lab".into()),
                severity: Some(IncidentSeverity::High),
                tags: Some(vec!["night".into()]),
                ..Default::default()
            },
        );

        assert_eq!(inc.severity, IncidentSeverity::High);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["severity"], json!({"old": "low", "new": "high"}));
        assert!(!changes.contains_key("title"));
    }

    #[test]
    fn viewers_cannot_work_incidents() {
        let viewer = User::new("v@campus.edu", String::new(), UserRole::Viewer);
        let manager = User::new("m@campus.edu", String::new(), UserRole::Manager);
        assert!(matches!(require_staff(&viewer), Err(Error::Authorization(_))));
        assert!(require_staff(&manager).is_ok());
    }

    #[test]
    fn transitions_deserialize_from_action_tag() {
        let resolve: Transition =
            serde_json::from_value(json!({"action": "resolve", "notes": "done"})).unwrap();
        assert!(matches!(resolve, Transition::Resolve { ref notes, is_false_positive: false } if notes == "done"));

        let ack: Transition = serde_json::from_value(json!({"action": "acknowledge"})).unwrap();
        assert_eq!(transition_action(&ack), IncidentAction::Acknowledged);
    }

    #[test]
    fn local_day_bounds_shift_by_offset() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let (start, end) = day_bounds(date, 60);
        assert_eq!(start.to_rfc3339(), "2024-04-30T23:00:00+00:00");
        assert_eq!(end - start, Duration::days(1));
    }

    #[test]
    fn bulk_request_carries_the_action_tag() {
        let id = Uuid::new_v4();
        let request: BulkActionRequest = serde_json::from_value(json!({
            "incident_ids": [id],
            "action": "resolve",
            "notes": "cleared by patrol",
        }))
        .unwrap();
        assert_eq!(request.incident_ids, vec![id]);
        assert!(matches!(request.action, BulkAction::Resolve { ref notes } if notes == "cleared by patrol"));

        let request: BulkActionRequest =
            serde_json::from_value(json!({"incident_ids": [], "action": "assign", "user_id": null})).unwrap();
        assert!(matches!(request.action, BulkAction::Assign { user_id: None }));
    }

    #[test]
    fn only_missing_or_refused_incidents_are_skipped() {
        assert!(is_skippable(&anyhow::Error::from(Error::NotFound("x".into()))));
        assert!(is_skippable(&anyhow::Error::from(Error::InvalidTransition("x".into()))));
        assert!(!is_skippable(&anyhow::Error::from(Error::Database("x".into()))));
    }

    #[tokio::test]
    async fn bulk_actions_skip_what_cannot_change_and_evidence_is_logged() {
        let Some(pool) = test_pool().await else { return };
        let media_root = std::env::temp_dir().join(format!("campus-guard-{}", Uuid::new_v4().simple()));
        let service = IncidentService::new(
            pool.clone(),
            EventPublisher::new(create_message_broker()),
            0,
            &media_root,
        );
        let manager = UsersRepository::new(pool)
            .create(&User::new(
                &format!("duty-{}@campus.test", Uuid::new_v4().simple()),
                String::new(),
                UserRole::Manager,
            ))
            .await
            .unwrap();

        let first = service.create(Some(&manager), incident_request()).await.unwrap();
        let second = service.create(Some(&manager), incident_request()).await.unwrap();
        service
            .transition(&second.id, &manager, Transition::FalseAlarm)
            .await
            .unwrap();

        let outcome = service
            .bulk_action(
                &manager,
                BulkActionRequest {
                    incident_ids: vec![first.id, second.id, Uuid::new_v4()],
                    action: BulkAction::Acknowledge,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BulkOutcome {
                requested: 3,
                updated: 1,
                skipped: 2
            }
        );
        assert_eq!(service.get(&first.id).await.unwrap().status, IncidentStatus::Acknowledged);

        let delete = BulkActionRequest {
            incident_ids: vec![first.id],
            action: BulkAction::Delete,
        };
        assert!(service.bulk_action(&manager, delete).await.is_err());

        let evidence = service
            .add_evidence(
                &first.id,
                &manager,
                FileUpload::new("statement.pdf", "application/pdf", b"%PDF-1.4".to_vec()),
                None,
                " witness statement ",
            )
            .await
            .unwrap();
        assert_eq!(evidence.evidence_type, EvidenceType::Document);
        assert_eq!(evidence.file_size, 8);
        assert_eq!(evidence.description, "witness statement");
        assert!(evidence.file_path.starts_with(&*media_root.to_string_lossy()));
        assert_eq!(tokio::fs::read(&evidence.file_path).await.unwrap(), b"%PDF-1.4");

        let detail = service.detail(&first.id, &manager).await.unwrap();
        assert_eq!(detail.evidence.len(), 1);
        assert!(detail
            .action_logs
            .iter()
            .any(|log| log.action == IncidentAction::EvidenceAdded));

        let empty = FileUpload::new("nothing.jpg", "image/jpeg", Vec::new());
        assert!(service.add_evidence(&first.id, &manager, empty, None, "").await.is_err());

        let _ = tokio::fs::remove_dir_all(&media_root).await;
    }

    fn incident_request() -> NewIncident {
        NewIncident {
            title: "Door propped open".into(),
            description: String::new(),
            incident_type: IncidentType::Other,
            severity: IncidentSeverity::Medium,
            camera_id: None,
            source_video: None,
            location_description: "Library annex".into(),
            confidence_score: 0.5,
            detection_metadata: json!({}),
            assigned_to: None,
            tags: vec![],
            detected_at: None,
            display_id: None,
        }
    }
}
