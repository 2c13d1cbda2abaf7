use super::camera_models::{Camera, CameraStatus};
use super::incident_models::{Incident, IncidentSeverity};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const CHANNEL_EMAIL: &str = "email";
pub const CHANNEL_IN_APP: &str = "in_app";

/// Alerts are retried at most this many times
pub const MAX_ALERT_RETRIES: i32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "alert_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    IncidentDetected,
    CameraOffline,
    SystemAlert,
    MaintenanceReminder,
}

/// Delivery state of an alert, overall or per channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "alert_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Read,
}

/// Per-recipient notification
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    /// Display identifier, e.g. `ALT-20240101-0001`
    pub alert_id: String,
    pub title: String,
    pub message: String,
    pub alert_type: AlertType,
    pub incident_id: Option<Uuid>,
    pub camera_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub recipient_id: Uuid,
    pub channels: Vec<String>,
    pub status: AlertStatus,
    pub delivery_status: Json<BTreeMap<String, AlertStatus>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub email_sent: bool,
    pub is_read: bool,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl Alert {
    pub fn new(
        alert_id: String,
        alert_type: AlertType,
        recipient_id: Uuid,
        title: String,
        message: String,
        channels: Vec<String>,
    ) -> Self {
        let delivery = channels
            .iter()
            .map(|channel| (channel.clone(), AlertStatus::Pending))
            .collect();
        Self {
            id: Uuid::new_v4(),
            alert_id,
            title,
            message,
            alert_type,
            incident_id: None,
            camera_id: None,
            rule_id: None,
            recipient_id,
            channels,
            status: AlertStatus::Pending,
            delivery_status: Json(delivery),
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            email_sent: false,
            is_read: false,
            retry_count: 0,
            last_retry_at: None,
            metadata: serde_json::json!({}),
        }
    }

    fn all_channels_are(&self, status: AlertStatus) -> bool {
        self.delivery_status.values().all(|s| *s == status)
    }

    pub fn mark_sent(&mut self, channel: &str, now: DateTime<Utc>) {
        self.delivery_status
            .insert(channel.to_string(), AlertStatus::Sent);
        if self.all_channels_are(AlertStatus::Sent) {
            self.status = AlertStatus::Sent;
            self.sent_at = Some(now);
        }
    }

    pub fn mark_delivered(&mut self, channel: &str, now: DateTime<Utc>) {
        self.delivery_status
            .insert(channel.to_string(), AlertStatus::Delivered);
        if channel == CHANNEL_EMAIL {
            self.email_sent = true;
        }
        if self.all_channels_are(AlertStatus::Delivered) {
            self.status = AlertStatus::Delivered;
            self.sent_at.get_or_insert(now);
            self.delivered_at = Some(now);
        }
    }

    /// Record a channel failure; the error is appended to `metadata.errors`
    pub fn mark_failed(&mut self, channel: &str, error: Option<&str>, now: DateTime<Utc>) {
        self.delivery_status
            .insert(channel.to_string(), AlertStatus::Failed);
        self.status = AlertStatus::Failed;

        if let Some(message) = error {
            if !self.metadata.is_object() {
                self.metadata = serde_json::json!({});
            }
            let entry = serde_json::json!({
                "channel": channel,
                "message": message,
                "timestamp": now.to_rfc3339(),
            });
            if let Some(map) = self.metadata.as_object_mut() {
                match map.get_mut("errors").and_then(|e| e.as_array_mut()) {
                    Some(errors) => errors.push(entry),
                    None => {
                        map.insert("errors".to_string(), serde_json::json!([entry]));
                    }
                }
            }
        }
    }

    /// Only in-app alerts can be read; returns whether anything changed
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if !self.channels.iter().any(|c| c == CHANNEL_IN_APP) {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(now);
        self.status = AlertStatus::Read;
        true
    }

    pub fn can_retry(&self) -> bool {
        matches!(self.status, AlertStatus::Failed | AlertStatus::Pending)
            && self.retry_count < MAX_ALERT_RETRIES
    }

    pub fn increment_retry(&mut self, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_retry_at = Some(now);
    }

    /// Channels that have not been delivered yet
    pub fn undelivered_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| {
                !matches!(
                    self.delivery_status.get(c.as_str()),
                    Some(AlertStatus::Delivered) | Some(AlertStatus::Read)
                )
            })
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "alert_trigger_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    IncidentSeverity,
    IncidentType,
    CameraStatus,
    TimeSchedule,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "condition_operator", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    GreaterThan,
    LessThan,
    Contains,
    StartsWith,
}

impl ConditionOperator {
    /// Apply to an ordering of `actual` relative to `expected`
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            ConditionOperator::GreaterThan => ordering == Ordering::Greater,
            ConditionOperator::LessThan => ordering == Ordering::Less,
            _ => ordering == Ordering::Equal,
        }
    }

    fn compare_str(&self, actual: &str, expected: &str) -> bool {
        match self {
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::Contains => actual.contains(expected),
            ConditionOperator::StartsWith => actual.starts_with(expected),
            _ => self.accepts(actual.cmp(expected)),
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConditionOperator::Equals => "equals",
            ConditionOperator::GreaterThan => "greater_than",
            ConditionOperator::LessThan => "less_than",
            ConditionOperator::Contains => "contains",
            ConditionOperator::StartsWith => "starts_with",
        };
        f.write_str(name)
    }
}

/// What an alert rule is being evaluated against
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerContext<'a> {
    pub incident: Option<&'a Incident>,
    pub camera: Option<&'a Camera>,
    pub camera_location: Option<&'a str>,
    /// New status when evaluating a camera status change
    pub camera_status: Option<CameraStatus>,
}

/// Existing alerts for the same incident/camera pair
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertHistory {
    /// Alerts created since local midnight
    pub alerts_today: i64,
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// Declarative matcher deciding when alerts are produced
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub trigger_type: TriggerType,
    pub condition_operator: ConditionOperator,
    pub condition_value: String,
    pub incident_types: Vec<String>,
    pub severity_levels: Vec<String>,
    pub camera_ids: Vec<Uuid>,
    pub location_ids: Vec<Uuid>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// 0 = Monday .. 6 = Sunday
    pub days_of_week: Vec<i16>,
    pub channels: Vec<String>,
    pub message_template: String,
    pub email_template: String,
    pub recipient_roles: Vec<String>,
    pub cooldown_minutes: i32,
    /// 0 means unlimited
    pub max_alerts_per_day: i32,
    /// 1 (low) to 4 (critical)
    pub priority: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub specific_recipients: Vec<Uuid>,
}

impl AlertRule {
    pub fn new(name: &str, trigger_type: TriggerType, message_template: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            is_active: true,
            trigger_type,
            condition_operator: ConditionOperator::Equals,
            condition_value: String::new(),
            incident_types: Vec::new(),
            severity_levels: Vec::new(),
            camera_ids: Vec::new(),
            location_ids: Vec::new(),
            start_time: None,
            end_time: None,
            days_of_week: Vec::new(),
            channels: vec![CHANNEL_EMAIL.to_string(), CHANNEL_IN_APP.to_string()],
            message_template: message_template.to_string(),
            email_template: String::new(),
            recipient_roles: Vec::new(),
            cooldown_minutes: 5,
            max_alerts_per_day: 50,
            priority: 1,
            created_at: now,
            updated_at: now,
            specific_recipients: Vec::new(),
        }
    }

    /// Decide whether the rule fires for `ctx` at local time `now`
    pub fn should_trigger(
        &self,
        ctx: &TriggerContext<'_>,
        now: DateTime<FixedOffset>,
        history: &AlertHistory,
    ) -> bool {
        if !self.is_active {
            return false;
        }

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if !within_window(start, end, now.time()) {
                return false;
            }
        }

        if !self.days_of_week.is_empty() {
            let today = now.weekday().num_days_from_monday() as i16;
            if !self.days_of_week.contains(&today) {
                return false;
            }
        }

        if self.max_alerts_per_day > 0 && history.alerts_today >= self.max_alerts_per_day as i64 {
            return false;
        }

        if self.cooldown_minutes > 0 && ctx.incident.is_some() {
            if let Some(last) = history.last_alert_at {
                let cooldown = Duration::minutes(self.cooldown_minutes as i64);
                if now.with_timezone(&Utc) - last < cooldown {
                    return false;
                }
            }
        }

        if let Some(incident) = ctx.incident {
            if !self.incident_types.is_empty()
                && !self
                    .incident_types
                    .iter()
                    .any(|t| t == incident.incident_type.as_str())
            {
                return false;
            }
            if !self.severity_levels.is_empty()
                && !self
                    .severity_levels
                    .iter()
                    .any(|s| s == incident.severity.as_str())
            {
                return false;
            }
        }

        if let Some(camera) = ctx.camera {
            if !self.camera_ids.is_empty() && !self.camera_ids.contains(&camera.id) {
                return false;
            }
            if !self.location_ids.is_empty() && !self.location_ids.contains(&camera.location_id) {
                return false;
            }
        }

        self.condition_matches(ctx)
    }

    /// Evaluate the trigger condition. A condition whose subject is absent from
    /// the context does not match; an empty condition value always matches.
    fn condition_matches(&self, ctx: &TriggerContext<'_>) -> bool {
        let expected = self.condition_value.trim();
        if expected.is_empty() {
            return true;
        }
        let op = self.condition_operator;

        match self.trigger_type {
            TriggerType::TimeSchedule => true,
            TriggerType::IncidentSeverity => match ctx.incident {
                Some(incident) => match IncidentSeverity::from_str(expected) {
                    Ok(level) => op.accepts(incident.severity.rank().cmp(&level.rank())),
                    Err(_) => op.compare_str(incident.severity.as_str(), expected),
                },
                None => false,
            },
            TriggerType::IncidentType => ctx
                .incident
                .map_or(false, |i| op.compare_str(i.incident_type.as_str(), expected)),
            TriggerType::CameraStatus => ctx
                .camera_status
                .map_or(false, |s| op.compare_str(s.as_str(), expected)),
        }
    }

    /// Fill the message template placeholders
    pub fn format_message(&self, ctx: &TriggerContext<'_>, now: DateTime<FixedOffset>) -> String {
        render_template(&self.message_template, ctx, now)
    }

    /// HTML body for email, falling back to the plain message template
    pub fn format_email(&self, ctx: &TriggerContext<'_>, now: DateTime<FixedOffset>) -> String {
        if self.email_template.trim().is_empty() {
            self.format_message(ctx, now)
        } else {
            render_template(&self.email_template, ctx, now)
        }
    }

    pub fn uses_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn render_template(template: &str, ctx: &TriggerContext<'_>, now: DateTime<FixedOffset>) -> String {
    let na = || "N/A".to_string();
    let offset = *now.offset();
    let incident = ctx.incident;

    let values = [
        ("incident_id", incident.map_or_else(na, |i| i.incident_id.clone())),
        ("incident_title", incident.map_or_else(na, |i| i.title.clone())),
        ("incident_type", incident.map_or_else(na, |i| i.incident_type.label().to_string())),
        ("incident_severity", incident.map_or_else(na, |i| i.severity.label().to_string())),
        ("camera_name", ctx.camera.map_or_else(na, |c| c.name.clone())),
        ("camera_location", ctx.camera_location.map_or_else(na, |l| l.to_string())),
        (
            "detected_at",
            incident
                .map(|i| i.detected_at.with_timezone(&offset))
                .unwrap_or(now)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
        ),
        ("timestamp", now.format(TIMESTAMP_FORMAT).to_string()),
    ];

    values
        .iter()
        .fold(template.to_string(), |message, (key, value)| {
            message.replace(&format!("{{{}}}", key), value)
        })
}

/// Inclusive time-of-day window; wraps past midnight when `start > end`
pub fn within_window(start: NaiveTime, end: NaiveTime, time: NaiveTime) -> bool {
    if start <= end {
        start <= time && time <= end
    } else {
        time >= start || time <= end
    }
}

/// Per-user notification settings
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationPreference {
    pub user_id: Uuid,
    pub email_enabled: bool,
    pub in_app_enabled: bool,
    /// Incident type -> enabled; types not listed are enabled
    pub incident_type_preferences: Json<HashMap<String, bool>>,
    pub severity_preferences: Vec<String>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub receive_digest: bool,
    pub digest_time: NaiveTime,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    /// Defaults applied the first time a user is considered for an alert
    pub fn defaults_for(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            email_enabled: true,
            in_app_enabled: true,
            incident_type_preferences: Json(HashMap::new()),
            severity_preferences: vec!["medium".into(), "high".into(), "critical".into()],
            quiet_hours_start: None,
            quiet_hours_end: None,
            receive_digest: false,
            digest_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_quiet_hours(&self, time: NaiveTime) -> bool {
        match (self.quiet_hours_start, self.quiet_hours_end) {
            (Some(start), Some(end)) => within_window(start, end, time),
            _ => false,
        }
    }

    pub fn should_receive_alert(&self, incident_type: &str, severity: &str, time: NaiveTime) -> bool {
        if self.is_quiet_hours(time) {
            return false;
        }
        if !self.severity_preferences.iter().any(|s| s == severity) {
            return false;
        }
        self.incident_type_preferences
            .get(incident_type)
            .copied()
            .unwrap_or(true)
    }

    /// Channels from `offered` this user accepts
    pub fn accepted_channels(&self, offered: &[String]) -> Vec<String> {
        offered
            .iter()
            .filter(|channel| match channel.as_str() {
                CHANNEL_EMAIL => self.email_enabled,
                CHANNEL_IN_APP => self.in_app_enabled,
                _ => false,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::incident_models::{IncidentType, NewIncident};
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        // 2024-01-01 is a Monday
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, day, hour, minute, 0)
            .unwrap()
    }

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn incident(severity: IncidentSeverity) -> Incident {
        Incident::from_new(
            NewIncident {
                title: "Person at gate".into(),
                description: String::new(),
                incident_type: IncidentType::Person,
                severity,
                camera_id: None,
                source_video: None,
                location_description: String::new(),
                confidence_score: 0.9,
                detection_metadata: serde_json::json!({}),
                assigned_to: None,
                tags: vec![],
                detected_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()),
                display_id: None,
            },
            "INC-20240101-0003".into(),
            Utc::now(),
        )
    }

    #[test]
    fn rule_is_silent_outside_time_window() {
        let mut rule = AlertRule::new("night", TriggerType::TimeSchedule, "msg");
        rule.start_time = Some(time(9, 0));
        rule.end_time = Some(time(17, 0));
        let ctx = TriggerContext::default();
        let history = AlertHistory::default();

        assert!(rule.should_trigger(&ctx, at(1, 9, 0), &history));
        assert!(rule.should_trigger(&ctx, at(1, 17, 0), &history));
        assert!(!rule.should_trigger(&ctx, at(1, 8, 59), &history));
        assert!(!rule.should_trigger(&ctx, at(1, 17, 1), &history));
    }

    #[test]
    fn window_wraps_past_midnight() {
        let mut rule = AlertRule::new("overnight", TriggerType::TimeSchedule, "msg");
        rule.start_time = Some(time(22, 0));
        rule.end_time = Some(time(6, 0));
        let ctx = TriggerContext::default();
        let history = AlertHistory::default();

        assert!(rule.should_trigger(&ctx, at(1, 23, 30), &history));
        assert!(rule.should_trigger(&ctx, at(1, 2, 0), &history));
        assert!(!rule.should_trigger(&ctx, at(1, 12, 0), &history));
    }

    #[test]
    fn rule_is_silent_on_unlisted_days() {
        let mut rule = AlertRule::new("weekdays", TriggerType::TimeSchedule, "msg");
        rule.days_of_week = vec![0, 1, 2, 3, 4];
        let ctx = TriggerContext::default();
        let history = AlertHistory::default();

        assert!(rule.should_trigger(&ctx, at(1, 12, 0), &history)); // Monday
        assert!(rule.should_trigger(&ctx, at(5, 12, 0), &history)); // Friday
        assert!(!rule.should_trigger(&ctx, at(6, 12, 0), &history)); // Saturday
        assert!(!rule.should_trigger(&ctx, at(7, 12, 0), &history)); // Sunday
    }

    #[test]
    fn daily_cap_and_cooldown() {
        let rule = AlertRule::new("cap", TriggerType::IncidentSeverity, "msg");
        let inc = incident(IncidentSeverity::High);
        let ctx = TriggerContext {
            incident: Some(&inc),
            ..Default::default()
        };
        let now = at(1, 12, 0);

        let capped = AlertHistory {
            alerts_today: 50,
            last_alert_at: None,
        };
        assert!(!rule.should_trigger(&ctx, now, &capped));

        let recent = AlertHistory {
            alerts_today: 1,
            last_alert_at: Some(now.with_timezone(&Utc) - Duration::minutes(2)),
        };
        assert!(!rule.should_trigger(&ctx, now, &recent));

        let older = AlertHistory {
            alerts_today: 1,
            last_alert_at: Some(now.with_timezone(&Utc) - Duration::minutes(6)),
        };
        assert!(rule.should_trigger(&ctx, now, &older));

        let mut unlimited = rule.clone();
        unlimited.max_alerts_per_day = 0;
        assert!(unlimited.should_trigger(&ctx, now, &AlertHistory { alerts_today: 500, last_alert_at: None }));
    }

    #[test]
    fn cooldown_needs_an_incident() {
        let mut rule = AlertRule::new("camera", TriggerType::CameraStatus, "msg");
        rule.condition_value = "offline".into();
        let ctx = TriggerContext {
            camera_status: Some(CameraStatus::Offline),
            ..Default::default()
        };
        let now = at(1, 12, 0);
        let recent = AlertHistory {
            alerts_today: 1,
            last_alert_at: Some(now.with_timezone(&Utc)),
        };
        assert!(rule.should_trigger(&ctx, now, &recent));
    }

    #[test]
    fn severity_condition_compares_rank() {
        let mut rule = AlertRule::new("serious", TriggerType::IncidentSeverity, "msg");
        rule.condition_operator = ConditionOperator::GreaterThan;
        rule.condition_value = "medium".into();
        let history = AlertHistory::default();
        let now = at(1, 12, 0);

        let high = incident(IncidentSeverity::High);
        let low = incident(IncidentSeverity::Low);
        assert!(rule.should_trigger(&TriggerContext { incident: Some(&high), ..Default::default() }, now, &history));
        assert!(!rule.should_trigger(&TriggerContext { incident: Some(&low), ..Default::default() }, now, &history));
        assert!(!rule.should_trigger(&TriggerContext::default(), now, &history));
    }

    #[test]
    fn filters_restrict_types_and_cameras() {
        let mut rule = AlertRule::new("vehicles", TriggerType::IncidentType, "msg");
        rule.incident_types = vec!["vehicle".into()];
        let inc = incident(IncidentSeverity::High);
        let history = AlertHistory::default();
        let now = at(1, 12, 0);
        let ctx = TriggerContext { incident: Some(&inc), ..Default::default() };
        assert!(!rule.should_trigger(&ctx, now, &history));

        rule.incident_types.clear();
        let camera = Camera::new("Gate", Uuid::new_v4());
        rule.camera_ids = vec![Uuid::new_v4()];
        let ctx = TriggerContext { incident: Some(&inc), camera: Some(&camera), ..Default::default() };
        assert!(!rule.should_trigger(&ctx, now, &history));
        rule.camera_ids.push(camera.id);
        assert!(rule.should_trigger(&ctx, now, &history));
    }

    #[test]
    fn message_placeholders_are_filled() {
        let rule = AlertRule::new(
            "fmt",
            TriggerType::IncidentSeverity,
            "{incident_id} {incident_severity} {incident_type} at {camera_name} ({camera_location}) {detected_at}",
        );
        let inc = incident(IncidentSeverity::Critical);
        let camera = Camera::new("Main Gate", Uuid::new_v4());
        let ctx = TriggerContext {
            incident: Some(&inc),
            camera: Some(&camera),
            camera_location: Some("North Campus"),
            camera_status: None,
        };
        assert_eq!(
            rule.format_message(&ctx, at(1, 12, 0)),
            "INC-20240101-0003 Critical Person Detected at Main Gate (North Campus) 2024-01-01 09:30:00"
        );

        let empty = TriggerContext::default();
        assert_eq!(
            AlertRule::new("x", TriggerType::TimeSchedule, "{camera_name} {timestamp}")
                .format_message(&empty, at(1, 12, 0)),
            "N/A 2024-01-01 12:00:00"
        );
    }

    #[test]
    fn delivery_map_drives_overall_status() {
        let mut alert = Alert::new(
            "ALT-20240101-0001".into(),
            AlertType::IncidentDetected,
            Uuid::new_v4(),
            "t".into(),
            "m".into(),
            vec![CHANNEL_EMAIL.into(), CHANNEL_IN_APP.into()],
        );
        let now = Utc::now();

        alert.mark_delivered(CHANNEL_IN_APP, now);
        assert_eq!(alert.status, AlertStatus::Pending);
        assert_eq!(alert.undelivered_channels(), vec![CHANNEL_EMAIL.to_string()]);

        alert.mark_failed(CHANNEL_EMAIL, Some("smtp down"), now);
        assert_eq!(alert.status, AlertStatus::Failed);
        assert_eq!(alert.metadata["errors"][0]["message"], "smtp down");
        assert!(alert.can_retry());

        alert.mark_delivered(CHANNEL_EMAIL, now);
        assert_eq!(alert.status, AlertStatus::Delivered);
        assert!(alert.email_sent);
        assert!(alert.delivered_at.is_some());

        assert!(alert.mark_read(now));
        assert_eq!(alert.status, AlertStatus::Read);
    }

    #[test]
    fn email_only_alert_cannot_be_read_and_retries_are_bounded() {
        let mut alert = Alert::new(
            "ALT-20240101-0002".into(),
            AlertType::CameraOffline,
            Uuid::new_v4(),
            "t".into(),
            "m".into(),
            vec![CHANNEL_EMAIL.into()],
        );
        let now = Utc::now();
        assert!(!alert.mark_read(now));
        assert!(!alert.is_read);

        alert.mark_failed(CHANNEL_EMAIL, None, now);
        for _ in 0..3 {
            assert!(alert.can_retry());
            alert.increment_retry(now);
        }
        assert!(!alert.can_retry());
    }

    #[test]
    fn preferences_respect_quiet_hours_and_severity() {
        let mut prefs = NotificationPreference::defaults_for(Uuid::new_v4());
        assert!(prefs.should_receive_alert("motion", "high", time(12, 0)));
        assert!(!prefs.should_receive_alert("motion", "low", time(12, 0)));

        prefs.incident_type_preferences.insert("motion".into(), false);
        assert!(!prefs.should_receive_alert("motion", "high", time(12, 0)));
        assert!(prefs.should_receive_alert("weapon", "high", time(12, 0)));

        prefs.quiet_hours_start = Some(time(23, 0));
        prefs.quiet_hours_end = Some(time(7, 0));
        assert!(!prefs.should_receive_alert("weapon", "critical", time(3, 0)));

        prefs.email_enabled = false;
        let offered = vec![CHANNEL_EMAIL.to_string(), CHANNEL_IN_APP.to_string()];
        assert_eq!(prefs.accepted_channels(&offered), vec![CHANNEL_IN_APP.to_string()]);
    }
}
