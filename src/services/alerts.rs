use crate::config::AlertsConfig;
use crate::db::models::alert_models::{
    Alert, AlertRule, AlertType, ConditionOperator, NotificationPreference, TriggerContext,
    TriggerType, CHANNEL_EMAIL, CHANNEL_IN_APP,
};
use crate::db::models::camera_models::{Camera, CameraStatus};
use crate::db::models::incident_models::Incident;
use crate::db::models::user_models::{User, UserRole};
use crate::db::repositories::alerts::AlertsRepository;
use crate::db::repositories::cameras::CamerasRepository;
use crate::db::repositories::users::UsersRepository;
use crate::error::Error;
use crate::notifications::{emails, Mailer};
use crate::services::incidents::day_bounds;
use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use log::{error, info, warn};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const EMAIL_HTML_KEY: &str = "email_html";

/// Push an alert through each channel it has not been delivered on yet.
/// Returns whether every channel is now delivered.
pub async fn deliver(alert: &mut Alert, recipient: Option<&User>, mailer: &dyn Mailer) -> bool {
    let now = Utc::now();

    for channel in alert.undelivered_channels() {
        match channel.as_str() {
            CHANNEL_EMAIL => {
                let Some(user) = recipient else {
                    alert.mark_failed(&channel, Some("Recipient no longer exists"), now);
                    continue;
                };
                let html = alert
                    .metadata
                    .get(EMAIL_HTML_KEY)
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let email = emails::alert(&user.email, &alert.title, &alert.message, html);

                match mailer.send(&email).await {
                    Ok(()) => {
                        alert.mark_delivered(&channel, now);
                        info!("Email sent for alert {} to {}", alert.alert_id, user.email);
                    }
                    Err(e) => {
                        error!("Failed to send email for alert {}: {}", alert.alert_id, e);
                        alert.mark_failed(&channel, Some(&e.to_string()), now);
                    }
                }
            }
            // Stored rows are the in-app notification
            CHANNEL_IN_APP => alert.mark_delivered(&channel, now),
            other => {
                warn!("Alert {} has unsupported channel {}", alert.alert_id, other);
                alert.mark_failed(other, Some("Unsupported channel"), now);
            }
        }
    }

    alert.undelivered_channels().is_empty()
}

/// Creates, delivers and maintains per-recipient alerts
pub struct AlertService {
    alerts: AlertsRepository,
    users: UsersRepository,
    cameras: CamerasRepository,
    mailer: Arc<dyn Mailer>,
    utc_offset_minutes: i32,
}

impl AlertService {
    pub fn new(pool: Arc<PgPool>, mailer: Arc<dyn Mailer>, config: &AlertsConfig) -> Self {
        Self {
            alerts: AlertsRepository::new(pool.clone()),
            users: UsersRepository::new(pool.clone()),
            cameras: CamerasRepository::new(pool),
            mailer,
            utc_offset_minutes: config.utc_offset_minutes,
        }
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(Utc.fix());
        Utc::now().with_timezone(&offset)
    }

    /// Camera and a printable location for it
    async fn camera_context(&self, camera_id: Option<Uuid>) -> Result<Option<(Camera, String)>> {
        let Some(id) = camera_id else {
            return Ok(None);
        };
        let Some(camera) = self.cameras.get_by_id(&id).await? else {
            return Ok(None);
        };
        let location = self
            .cameras
            .get_location(&camera.location_id)
            .await?
            .map(|l| l.display_name())
            .unwrap_or_else(|| "Unknown location".to_string());
        Ok(Some((camera, location)))
    }

    /// Explicit recipients, else users holding one of the rule's roles,
    /// else every active admin and manager
    pub async fn recipients(&self, rule: &AlertRule) -> Result<Vec<User>> {
        if !rule.specific_recipients.is_empty() {
            return self.users.get_active_by_ids(&rule.specific_recipients).await;
        }

        let roles: Vec<UserRole> = rule
            .recipient_roles
            .iter()
            .filter_map(|r| r.parse().ok())
            .collect();
        if roles.is_empty() {
            self.users
                .get_active_by_roles(&[UserRole::Admin, UserRole::Manager])
                .await
        } else {
            self.users.get_active_by_roles(&roles).await
        }
    }

    /// Alerts for an incident from a live camera. Incidents from uploaded
    /// videos never alert.
    pub async fn create_incident_alert(&self, incident: &Incident) -> Result<Vec<Alert>> {
        if incident.source_video.is_some() {
            info!("Skipping alerts for incident from video upload: {}", incident.incident_id);
            return Ok(Vec::new());
        }

        let camera = self.camera_context(incident.camera_id).await?;
        let ctx = TriggerContext {
            incident: Some(incident),
            camera: camera.as_ref().map(|(c, _)| c),
            camera_location: camera.as_ref().map(|(_, l)| l.as_str()),
            camera_status: None,
        };
        let now = self.local_now();
        let (day_start, _) = day_bounds(now.date_naive(), self.utc_offset_minutes);
        let rules = self.alerts.get_rules(true).await?;

        let mut tx = self.alerts.begin().await?;
        AlertsRepository::lock_subject_in(&mut tx, &incident.id).await?;
        let history =
            AlertsRepository::history_in(&mut tx, Some(incident.id), incident.camera_id, day_start)
                .await?;

        let mut created = Vec::new();
        for rule in rules.iter().filter(|r| r.should_trigger(&ctx, now, &history)) {
            let message = rule.format_message(&ctx, now);
            let email_html = (!rule.email_template.trim().is_empty())
                .then(|| rule.format_email(&ctx, now));

            for recipient in self.recipients(rule).await? {
                let preference = self.alerts.get_or_create_preference(&recipient.id).await?;
                if !preference.should_receive_alert(
                    incident.incident_type.as_str(),
                    incident.severity.as_str(),
                    now.time(),
                ) {
                    continue;
                }
                let channels = preference.accepted_channels(&rule.channels);
                if channels.is_empty() {
                    continue;
                }

                let mut alert = Alert::new(
                    String::new(),
                    AlertType::IncidentDetected,
                    recipient.id,
                    format!("Incident {}: {}", incident.incident_id, incident.title),
                    message.clone(),
                    channels,
                );
                alert.incident_id = Some(incident.id);
                alert.camera_id = incident.camera_id;
                alert.rule_id = Some(rule.id);
                alert.metadata = json!({
                    "severity": incident.severity,
                    "incident_id": incident.incident_id,
                    "incident_type": incident.incident_type,
                    "camera_id": incident.camera_id,
                    "camera_name": ctx.camera.map(|c| c.name.clone()),
                    "rule_id": rule.id,
                    "rule_name": rule.name,
                });
                if let Some(html) = &email_html {
                    alert.metadata[EMAIL_HTML_KEY] = json!(html);
                }

                created.push(AlertsRepository::create_in(&mut tx, &alert).await?);
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit alerts: {}", e)))?;

        self.send_created(&mut created).await;

        info!("Created {} alerts for incident {}", created.len(), incident.incident_id);
        Ok(created)
    }

    /// Email-only alerts when a camera goes offline or errors
    pub async fn create_camera_status_alert(
        &self,
        camera_id: &Uuid,
        status: CameraStatus,
        reason: &str,
    ) -> Result<Vec<Alert>> {
        if !status.is_fault() {
            return Ok(Vec::new());
        }
        let Some((camera, location)) = self.camera_context(Some(*camera_id)).await? else {
            warn!("Camera {} disappeared before its status alert", camera_id);
            return Ok(Vec::new());
        };

        let ctx = TriggerContext {
            incident: None,
            camera: Some(&camera),
            camera_location: Some(&location),
            camera_status: Some(status),
        };
        let now = self.local_now();
        let (day_start, _) = day_bounds(now.date_naive(), self.utc_offset_minutes);
        let rules: Vec<AlertRule> = self
            .alerts
            .get_rules(true)
            .await?
            .into_iter()
            .filter(|r| {
                r.trigger_type == TriggerType::CameraStatus
                    && r.condition_operator == ConditionOperator::Equals
                    && r.condition_value == status.as_str()
            })
            .collect();

        let mut tx = self.alerts.begin().await?;
        AlertsRepository::lock_subject_in(&mut tx, &camera.id).await?;
        let history = AlertsRepository::history_in(&mut tx, None, Some(camera.id), day_start).await?;

        let title = format!("Camera {} is {}", camera.name, status);
        let message = format!("Camera {} at {} is {}. {}", camera.name, location, status, reason)
            .trim_end()
            .to_string();

        let mut created = Vec::new();
        for rule in rules.iter().filter(|r| r.should_trigger(&ctx, now, &history)) {
            for recipient in self.recipients(rule).await? {
                let preference = self.alerts.get_or_create_preference(&recipient.id).await?;
                if !preference.email_enabled {
                    continue;
                }

                let mut alert = Alert::new(
                    String::new(),
                    AlertType::CameraOffline,
                    recipient.id,
                    title.clone(),
                    message.clone(),
                    vec![CHANNEL_EMAIL.to_string()],
                );
                alert.camera_id = Some(camera.id);
                alert.rule_id = Some(rule.id);
                alert.metadata = json!({
                    "severity": "high",
                    "camera_id": camera.id,
                    "camera_name": camera.name,
                    "status": status,
                    "reason": reason,
                });

                created.push(AlertsRepository::create_in(&mut tx, &alert).await?);
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit alerts: {}", e)))?;

        self.send_created(&mut created).await;

        info!("Created {} alerts for camera {} ({})", created.len(), camera.name, status);
        Ok(created)
    }

    /// Deliver freshly committed alerts. A failure on one alert is logged and
    /// left for the retry loop; the rest are still sent.
    pub async fn send_created(&self, created: &mut [Alert]) -> usize {
        let mut delivered = 0;
        for alert in created.iter_mut() {
            match self.send_alert(alert).await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to deliver alert {}: {}", alert.alert_id, e),
            }
        }
        delivered
    }

    /// Deliver and persist the outcome
    pub async fn send_alert(&self, alert: &mut Alert) -> Result<bool> {
        let recipient = self.users.get_by_id(&alert.recipient_id).await?;
        let delivered = deliver(alert, recipient.as_ref(), self.mailer.as_ref()).await;
        self.alerts.update_delivery(alert).await?;

        if delivered {
            info!("Alert {} sent successfully", alert.alert_id);
        } else {
            warn!("Alert {} not fully delivered", alert.alert_id);
        }
        Ok(delivered)
    }

    /// Resend failed alerts with retries left. Returns how many went through.
    pub async fn retry_failed_alerts(&self) -> Result<usize> {
        let mut retried = 0;
        for mut alert in self.alerts.get_retryable().await? {
            alert.increment_retry(Utc::now());
            match self.send_alert(&mut alert).await {
                Ok(true) => retried += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to retry alert {}: {}", alert.alert_id, e),
            }
        }

        info!("Retried {} failed alerts", retried);
        Ok(retried)
    }

    /// Manual retry of one alert
    pub async fn retry_alert(&self, actor: &User, id: &Uuid) -> Result<Alert> {
        if !actor.role.can_acknowledge_incidents() {
            return Err(Error::Authorization("Only staff can retry alerts".to_string()).into());
        }
        let mut alert = self
            .alerts
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Alert {} not found", id)))?;
        if !alert.can_retry() {
            return Err(Error::InvalidTransition(format!(
                "Alert {} cannot be retried (status {:?}, {} retries)",
                alert.alert_id, alert.status, alert.retry_count
            ))
            .into());
        }

        alert.increment_retry(Utc::now());
        self.send_alert(&mut alert).await?;
        Ok(alert)
    }

    pub async fn cleanup_old_alerts(&self, days_old: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days_old);
        let count = self.alerts.delete_older_than(cutoff).await?;
        info!("Deleted {} alerts older than {} days", count, days_old);
        Ok(count)
    }

    pub async fn unread(&self, user: &User) -> Result<Vec<Alert>> {
        self.alerts.unread_for_user(&user.id).await
    }

    pub async fn unread_count(&self, user: &User) -> Result<i64> {
        self.alerts.unread_count(&user.id).await
    }

    pub async fn recent(&self, user: &User, limit: i64) -> Result<Vec<Alert>> {
        self.alerts.recent_for_user(&user.id, limit).await
    }

    pub async fn mark_read(&self, user: &User, id: &Uuid) -> Result<Alert> {
        let mut alert = self
            .alerts
            .get_by_id(id)
            .await?
            .filter(|a| a.recipient_id == user.id)
            .ok_or_else(|| Error::NotFound(format!("Alert {} not found", id)))?;

        if !alert.mark_read(Utc::now()) {
            return Err(Error::Validation(format!("Alert {} is not an in-app alert", alert.alert_id)).into());
        }
        self.alerts.update_delivery(&alert).await?;
        Ok(alert)
    }

    pub async fn mark_all_read(&self, user: &User) -> Result<u64> {
        self.alerts.mark_all_read(&user.id).await
    }

    pub async fn rules(&self) -> Result<Vec<AlertRule>> {
        self.alerts.get_rules(false).await
    }

    pub async fn rule(&self, id: &Uuid) -> Result<AlertRule> {
        let rule = self
            .alerts
            .get_rule(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Alert rule {} not found", id)))?;
        Ok(rule)
    }

    pub async fn save_rule(&self, actor: &User, rule: AlertRule, existing: bool) -> Result<AlertRule> {
        require_rule_admin(actor)?;
        validate_rule(&rule)?;
        if existing {
            self.alerts.update_rule(&rule).await
        } else {
            self.alerts.create_rule(&rule).await
        }
    }

    pub async fn delete_rule(&self, actor: &User, id: &Uuid) -> Result<()> {
        require_rule_admin(actor)?;
        if !self.alerts.delete_rule(id).await? {
            return Err(Error::NotFound(format!("Alert rule {} not found", id)).into());
        }
        Ok(())
    }

    pub async fn preference(&self, user: &User) -> Result<NotificationPreference> {
        self.alerts.get_or_create_preference(&user.id).await
    }

    pub async fn update_preference(
        &self,
        user: &User,
        mut preference: NotificationPreference,
    ) -> Result<NotificationPreference> {
        self.alerts.get_or_create_preference(&user.id).await?;
        preference.user_id = user.id;
        self.alerts.update_preference(&preference).await
    }
}

fn require_rule_admin(user: &User) -> Result<(), Error> {
    if user.role.can_manage_cases() {
        Ok(())
    } else {
        Err(Error::Authorization("Only staff can manage alert rules".to_string()))
    }
}

fn validate_rule(rule: &AlertRule) -> Result<(), Error> {
    if rule.name.trim().is_empty() {
        return Err(Error::Validation("Rule name is required".to_string()));
    }
    if rule.channels.is_empty() {
        return Err(Error::Validation("Rule needs at least one channel".to_string()));
    }
    if let Some(channel) = rule
        .channels
        .iter()
        .find(|c| c.as_str() != CHANNEL_EMAIL && c.as_str() != CHANNEL_IN_APP)
    {
        return Err(Error::Validation(format!("Unknown channel: {}", channel)));
    }
    if rule.cooldown_minutes < 0 || rule.max_alerts_per_day < 0 {
        return Err(Error::Validation("Cooldown and daily cap cannot be negative".to_string()));
    }
    if rule.days_of_week.iter().any(|d| !(0..=6).contains(d)) {
        return Err(Error::Validation("Days of week run from 0 (Monday) to 6".to_string()));
    }
    if !(1..=4).contains(&rule.priority) {
        return Err(Error::Validation("Priority must be between 1 and 4".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::alert_models::AlertStatus;
    use crate::db::models::incident_models::{IncidentSeverity, IncidentType, NewIncident};
    use crate::db::repositories::incidents::IncidentsRepository;
    use crate::db::test_pool;
    use crate::notifications::testing::MemoryMailer;

    fn alert(channels: &[&str]) -> Alert {
        Alert::new(
            "ALT-20240101-0001".into(),
            AlertType::IncidentDetected,
            Uuid::new_v4(),
            "Incident INC-20240101-0001: Weapon".into(),
            "Weapon seen at gate".into(),
            channels.iter().map(|c| c.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn email_and_in_app_are_delivered() {
        let mailer = MemoryMailer::default();
        let user = User::new("guard@campus.edu", String::new(), UserRole::Manager);
        let mut alert = alert(&[CHANNEL_EMAIL, CHANNEL_IN_APP]);

        assert!(deliver(&mut alert, Some(&user), &mailer).await);
        assert_eq!(alert.status, AlertStatus::Delivered);
        assert!(alert.email_sent);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "guard@campus.edu");
        assert_eq!(sent[0].subject, "[Smart Surveillance] Incident INC-20240101-0001: Weapon");
    }

    #[tokio::test]
    async fn failed_email_is_recorded_and_retry_skips_in_app() {
        let user = User::new("guard@campus.edu", String::new(), UserRole::Manager);
        let mut alert = alert(&[CHANNEL_EMAIL, CHANNEL_IN_APP]);

        assert!(!deliver(&mut alert, Some(&user), &MemoryMailer::failing()).await);
        assert_eq!(alert.status, AlertStatus::Failed);
        assert_eq!(alert.delivery_status.get(CHANNEL_IN_APP), Some(&AlertStatus::Delivered));
        assert_eq!(alert.metadata["errors"][0]["channel"], "email");
        assert!(alert.can_retry());

        let mailer = MemoryMailer::default();
        assert!(deliver(&mut alert, Some(&user), &mailer).await);
        assert_eq!(alert.status, AlertStatus::Delivered);
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn rule_email_template_is_used_as_html() {
        let mailer = MemoryMailer::default();
        let user = User::new("guard@campus.edu", String::new(), UserRole::Admin);
        let mut alert = alert(&[CHANNEL_EMAIL]);
        alert.metadata = json!({ EMAIL_HTML_KEY: "<h1>Weapon</h1>" });

        deliver(&mut alert, Some(&user), &mailer).await;
        assert_eq!(mailer.sent()[0].html.as_deref(), Some("<h1>Weapon</h1>"));
    }

    #[tokio::test]
    async fn missing_recipient_fails_email() {
        let mut alert = alert(&[CHANNEL_EMAIL]);
        assert!(!deliver(&mut alert, None, &MemoryMailer::default()).await);
        assert_eq!(alert.status, AlertStatus::Failed);
    }

    #[test]
    fn rules_are_validated() {
        let mut rule = AlertRule::new("Weapons", TriggerType::IncidentType, "{incident_title}");
        assert!(validate_rule(&rule).is_ok());

        rule.channels = vec!["sms".into()];
        assert!(matches!(validate_rule(&rule), Err(Error::Validation(_))));

        rule.channels = vec![CHANNEL_EMAIL.into()];
        rule.days_of_week = vec![7];
        assert!(validate_rule(&rule).is_err());
    }

    fn service(pool: Arc<PgPool>) -> AlertService {
        AlertService::new(pool, Arc::new(MemoryMailer::default()), &AlertsConfig::default())
    }

    async fn manager(pool: &Arc<PgPool>) -> User {
        UsersRepository::new(pool.clone())
            .create(&User::new(
                &format!("duty-{}@campus.test", Uuid::new_v4().simple()),
                String::new(),
                UserRole::Manager,
            ))
            .await
            .unwrap()
    }

    async fn live_incident(pool: &Arc<PgPool>, incident_type: IncidentType) -> Incident {
        IncidentsRepository::new(pool.clone())
            .create(NewIncident {
                title: "Someone near the bike racks".into(),
                description: String::new(),
                incident_type,
                severity: IncidentSeverity::High,
                camera_id: None,
                source_video: None,
                location_description: "Bike racks".into(),
                confidence_score: 0.9,
                detection_metadata: json!({}),
                assigned_to: None,
                tags: Vec::new(),
                detected_at: None,
                display_id: None,
            })
            .await
            .unwrap()
    }

    async fn in_app_rule(
        service: &AlertService,
        incident_type: IncidentType,
        recipient: &User,
        cooldown_minutes: i32,
        max_alerts_per_day: i32,
    ) -> AlertRule {
        let mut rule = AlertRule::new(
            &format!("{} watch", incident_type.as_str()),
            TriggerType::IncidentType,
            "{incident_title}",
        );
        rule.condition_value = incident_type.as_str().to_string();
        rule.incident_types = vec![incident_type.as_str().to_string()];
        rule.channels = vec![CHANNEL_IN_APP.to_string()];
        rule.specific_recipients = vec![recipient.id];
        rule.cooldown_minutes = cooldown_minutes;
        rule.max_alerts_per_day = max_alerts_per_day;
        service.alerts.create_rule(&rule).await.unwrap()
    }

    fn from_rule(alerts: &[Alert], rule: &AlertRule) -> usize {
        alerts.iter().filter(|a| a.rule_id == Some(rule.id)).count()
    }

    #[tokio::test]
    async fn cooldown_blocks_a_second_alert_for_the_same_incident() {
        let Some(pool) = test_pool().await else { return };
        let service = service(pool.clone());
        let recipient = manager(&pool).await;
        let rule = in_app_rule(&service, IncidentType::Loitering, &recipient, 60, 0).await;
        let incident = live_incident(&pool, IncidentType::Loitering).await;

        let first = service.create_incident_alert(&incident).await.unwrap();
        assert_eq!(from_rule(&first, &rule), 1);
        assert_eq!(first[0].title, format!("Incident {}: {}", incident.incident_id, incident.title));
        assert!(first
            .iter()
            .filter(|a| a.rule_id == Some(rule.id))
            .all(|a| a.status == AlertStatus::Delivered));

        let second = service.create_incident_alert(&incident).await.unwrap();
        assert_eq!(from_rule(&second, &rule), 0);

        service.alerts.delete_rule(&rule.id).await.unwrap();
    }

    #[tokio::test]
    async fn daily_cap_counts_stored_alerts() {
        let Some(pool) = test_pool().await else { return };
        let service = service(pool.clone());
        let recipient = manager(&pool).await;
        let rule = in_app_rule(&service, IncidentType::Vandalism, &recipient, 0, 1).await;
        let incident = live_incident(&pool, IncidentType::Vandalism).await;

        let first = service.create_incident_alert(&incident).await.unwrap();
        assert_eq!(from_rule(&first, &rule), 1);

        let second = service.create_incident_alert(&incident).await.unwrap();
        assert_eq!(from_rule(&second, &rule), 0);

        service.alerts.delete_rule(&rule.id).await.unwrap();
    }

    #[tokio::test]
    async fn one_failed_delivery_does_not_stop_the_rest() {
        let Some(pool) = test_pool().await else { return };
        let service = service(pool.clone());
        let recipient = manager(&pool).await;

        let mut tx = service.alerts.begin().await.unwrap();
        let mut created = Vec::new();
        for title in ["Gate left open", "Gate still open"] {
            let alert = Alert::new(
                String::new(),
                AlertType::SystemAlert,
                recipient.id,
                title.into(),
                title.into(),
                vec![CHANNEL_IN_APP.to_string()],
            );
            created.push(AlertsRepository::create_in(&mut tx, &alert).await.unwrap());
        }
        tx.commit().await.unwrap();

        // the first row vanishes before delivery is recorded
        sqlx::query("DELETE FROM alerts WHERE id = $1")
            .bind(created[0].id)
            .execute(&*pool)
            .await
            .unwrap();

        assert_eq!(service.send_created(&mut created).await, 1);
        let stored = service.alerts.get_by_id(&created[1].id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Delivered);
    }
}
