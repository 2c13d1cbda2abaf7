use crate::{
    db::models::{
        alert_models::{Alert, AlertHistory, AlertRule, NotificationPreference, MAX_ALERT_RETRIES},
        incident_models::{format_daily_id, next_daily_sequence},
    },
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const ALERT_COLUMNS: &str = "id, alert_id, title, message, alert_type, incident_id, camera_id, rule_id, \
     recipient_id, channels, status, delivery_status, created_at, sent_at, delivered_at, read_at, \
     email_sent, is_read, retry_count, last_retry_at, metadata";

const RULE_COLUMNS: &str = "id, name, description, is_active, trigger_type, condition_operator, \
     condition_value, incident_types, severity_levels, camera_ids, location_ids, start_time, \
     end_time, days_of_week, channels, message_template, email_template, recipient_roles, \
     cooldown_minutes, max_alerts_per_day, priority, created_at, updated_at";

const PREFERENCE_COLUMNS: &str = "user_id, email_enabled, in_app_enabled, incident_type_preferences, \
     severity_preferences, quiet_hours_start, quiet_hours_end, receive_digest, digest_time, \
     created_at, updated_at";

const DISPLAY_PREFIX: &str = "ALT";

/// Alerts, alert rules and notification preferences
#[derive(Clone)]
pub struct AlertsRepository {
    pool: Arc<PgPool>,
}

impl AlertsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;
        Ok(tx)
    }

    /// Serialise alert creation for one incident or camera until the transaction ends
    pub async fn lock_subject_in(conn: &mut PgConnection, subject: &Uuid) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("alerts:{}", subject))
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to lock alert subject: {}", e)))?;

        Ok(())
    }

    /// Alerts already raised for the incident/camera pair
    pub async fn history_in(
        conn: &mut PgConnection,
        incident_id: Option<Uuid>,
        camera_id: Option<Uuid>,
        day_start: DateTime<Utc>,
    ) -> Result<AlertHistory> {
        let (alerts_today, last_alert_at): (i64, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE created_at >= $3), MAX(created_at)
            FROM alerts
            WHERE incident_id IS NOT DISTINCT FROM $1
              AND camera_id IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(incident_id)
        .bind(camera_id)
        .bind(day_start)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to read alert history: {}", e)))?;

        Ok(AlertHistory {
            alerts_today,
            last_alert_at,
        })
    }

    /// Insert an alert with the next `ALT-YYYYMMDD-NNNN` id
    pub async fn create_in(conn: &mut PgConnection, alert: &Alert) -> Result<Alert> {
        let date = alert.created_at.date_naive();
        let day_prefix = format!("{}-{}-", DISPLAY_PREFIX, date.format("%Y%m%d"));

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&day_prefix)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to lock alert sequence: {}", e)))?;

        let last: Option<String> = sqlx::query_scalar(
            "SELECT alert_id FROM alerts WHERE alert_id LIKE $1 ORDER BY alert_id DESC LIMIT 1",
        )
        .bind(format!("{}%", day_prefix))
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to read alert sequence: {}", e)))?;

        let alert_id = format_daily_id(DISPLAY_PREFIX, date, next_daily_sequence(last.as_deref()));
        info!("Creating alert {} for recipient {}", alert_id, alert.recipient_id);

        let result = sqlx::query_as::<_, Alert>(&format!(
            r#"
            INSERT INTO alerts (id, alert_id, title, message, alert_type, incident_id, camera_id,
                                rule_id, recipient_id, channels, status, delivery_status, created_at,
                                metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            ALERT_COLUMNS
        ))
        .bind(alert.id)
        .bind(&alert_id)
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.alert_type)
        .bind(alert.incident_id)
        .bind(alert.camera_id)
        .bind(alert.rule_id)
        .bind(alert.recipient_id)
        .bind(&alert.channels)
        .bind(alert.status)
        .bind(&alert.delivery_status)
        .bind(alert.created_at)
        .bind(&alert.metadata)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to create alert: {}", e)))?;

        Ok(result)
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Alert>> {
        let result = sqlx::query_as::<_, Alert>(&format!(
            "SELECT {} FROM alerts WHERE id = $1",
            ALERT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get alert: {}", e)))?;

        Ok(result)
    }

    /// Persist delivery state, read state and retry bookkeeping
    pub async fn update_delivery(&self, alert: &Alert) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET status = $1, delivery_status = $2, sent_at = $3, delivered_at = $4, read_at = $5,
                email_sent = $6, is_read = $7, retry_count = $8, last_retry_at = $9, metadata = $10
            WHERE id = $11
            "#,
        )
        .bind(alert.status)
        .bind(&alert.delivery_status)
        .bind(alert.sent_at)
        .bind(alert.delivered_at)
        .bind(alert.read_at)
        .bind(alert.email_sent)
        .bind(alert.is_read)
        .bind(alert.retry_count)
        .bind(alert.last_retry_at)
        .bind(&alert.metadata)
        .bind(alert.id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update alert: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Alert {} not found", alert.alert_id)).into());
        }
        Ok(())
    }

    pub async fn recent_for_user(&self, user_id: &Uuid, limit: i64) -> Result<Vec<Alert>> {
        let result = sqlx::query_as::<_, Alert>(&format!(
            "SELECT {} FROM alerts WHERE recipient_id = $1 ORDER BY created_at DESC LIMIT $2",
            ALERT_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get alerts: {}", e)))?;

        Ok(result)
    }

    /// Unread in-app alerts, newest first
    pub async fn unread_for_user(&self, user_id: &Uuid) -> Result<Vec<Alert>> {
        let result = sqlx::query_as::<_, Alert>(&format!(
            r#"
            SELECT {} FROM alerts
            WHERE recipient_id = $1 AND is_read = FALSE AND 'in_app' = ANY(channels)
            ORDER BY created_at DESC
            "#,
            ALERT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get unread alerts: {}", e)))?;

        Ok(result)
    }

    pub async fn unread_count(&self, user_id: &Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alerts WHERE recipient_id = $1 AND is_read = FALSE AND 'in_app' = ANY(channels)",
        )
        .bind(user_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count unread alerts: {}", e)))?;

        Ok(count)
    }

    pub async fn mark_all_read(&self, user_id: &Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET is_read = TRUE, read_at = NOW(), status = 'read'
            WHERE recipient_id = $1 AND is_read = FALSE AND 'in_app' = ANY(channels)
            "#,
        )
        .bind(user_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to mark alerts read: {}", e)))?;

        Ok(result.rows_affected())
    }

    /// Failed alerts that still have retries left
    pub async fn get_retryable(&self) -> Result<Vec<Alert>> {
        let result = sqlx::query_as::<_, Alert>(&format!(
            "SELECT {} FROM alerts WHERE status = 'failed' AND retry_count < $1 ORDER BY created_at",
            ALERT_COLUMNS
        ))
        .bind(MAX_ALERT_RETRIES)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get failed alerts: {}", e)))?;

        Ok(result)
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM alerts WHERE created_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete old alerts: {}", e)))?;

        Ok(result.rows_affected())
    }

    pub async fn create_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        info!("Creating alert rule: {}", rule.name);

        let mut tx = self.begin().await?;
        let mut result = sqlx::query_as::<_, AlertRule>(&format!(
            r#"
            INSERT INTO alert_rules ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23)
            RETURNING {}
            "#,
            RULE_COLUMNS, RULE_COLUMNS
        ))
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.is_active)
        .bind(rule.trigger_type)
        .bind(rule.condition_operator)
        .bind(&rule.condition_value)
        .bind(&rule.incident_types)
        .bind(&rule.severity_levels)
        .bind(&rule.camera_ids)
        .bind(&rule.location_ids)
        .bind(rule.start_time)
        .bind(rule.end_time)
        .bind(&rule.days_of_week)
        .bind(&rule.channels)
        .bind(&rule.message_template)
        .bind(&rule.email_template)
        .bind(&rule.recipient_roles)
        .bind(rule.cooldown_minutes)
        .bind(rule.max_alerts_per_day)
        .bind(rule.priority)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to create alert rule: {}", e)))?;

        Self::replace_recipients_in(&mut tx, &rule.id, &rule.specific_recipients).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit alert rule: {}", e)))?;

        result.specific_recipients = rule.specific_recipients.clone();
        Ok(result)
    }

    pub async fn update_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        let mut tx = self.begin().await?;
        let mut result = sqlx::query_as::<_, AlertRule>(&format!(
            r#"
            UPDATE alert_rules
            SET name = $1, description = $2, is_active = $3, trigger_type = $4,
                condition_operator = $5, condition_value = $6, incident_types = $7,
                severity_levels = $8, camera_ids = $9, location_ids = $10, start_time = $11,
                end_time = $12, days_of_week = $13, channels = $14, message_template = $15,
                email_template = $16, recipient_roles = $17, cooldown_minutes = $18,
                max_alerts_per_day = $19, priority = $20, updated_at = $21
            WHERE id = $22
            RETURNING {}
            "#,
            RULE_COLUMNS
        ))
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.is_active)
        .bind(rule.trigger_type)
        .bind(rule.condition_operator)
        .bind(&rule.condition_value)
        .bind(&rule.incident_types)
        .bind(&rule.severity_levels)
        .bind(&rule.camera_ids)
        .bind(&rule.location_ids)
        .bind(rule.start_time)
        .bind(rule.end_time)
        .bind(&rule.days_of_week)
        .bind(&rule.channels)
        .bind(&rule.message_template)
        .bind(&rule.email_template)
        .bind(&rule.recipient_roles)
        .bind(rule.cooldown_minutes)
        .bind(rule.max_alerts_per_day)
        .bind(rule.priority)
        .bind(Utc::now())
        .bind(rule.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to update alert rule: {}", e)))?;

        Self::replace_recipients_in(&mut tx, &rule.id, &rule.specific_recipients).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit alert rule: {}", e)))?;

        result.specific_recipients = rule.specific_recipients.clone();
        Ok(result)
    }

    async fn replace_recipients_in(conn: &mut PgConnection, rule_id: &Uuid, users: &[Uuid]) -> Result<()> {
        sqlx::query("DELETE FROM alert_rule_recipients WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to clear rule recipients: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO alert_rule_recipients (rule_id, user_id)
            SELECT $1, UNNEST($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(rule_id)
        .bind(users)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to store rule recipients: {}", e)))?;

        Ok(())
    }

    async fn load_recipients(&self, rules: &mut [AlertRule]) -> Result<()> {
        let ids: Vec<Uuid> = rules.iter().map(|r| r.id).collect();
        let pairs: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT rule_id, user_id FROM alert_rule_recipients WHERE rule_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get rule recipients: {}", e)))?;

        for rule in rules.iter_mut() {
            rule.specific_recipients = pairs
                .iter()
                .filter(|(rule_id, _)| *rule_id == rule.id)
                .map(|(_, user_id)| *user_id)
                .collect();
        }
        Ok(())
    }

    pub async fn get_rule(&self, id: &Uuid) -> Result<Option<AlertRule>> {
        let rule = sqlx::query_as::<_, AlertRule>(&format!(
            "SELECT {} FROM alert_rules WHERE id = $1",
            RULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get alert rule: {}", e)))?;

        match rule {
            Some(rule) => {
                let mut rules = [rule];
                self.load_recipients(&mut rules).await?;
                let [rule] = rules;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    /// Rules ordered by descending priority; only active ones when `active_only`
    pub async fn get_rules(&self, active_only: bool) -> Result<Vec<AlertRule>> {
        let mut rules = sqlx::query_as::<_, AlertRule>(&format!(
            "SELECT {} FROM alert_rules WHERE ($1 = FALSE OR is_active = TRUE) ORDER BY priority DESC, name",
            RULE_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list alert rules: {}", e)))?;

        self.load_recipients(&mut rules).await?;
        Ok(rules)
    }

    pub async fn delete_rule(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete alert rule: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Preferences for a user, created with defaults on first use
    pub async fn get_or_create_preference(&self, user_id: &Uuid) -> Result<NotificationPreference> {
        let defaults = NotificationPreference::defaults_for(*user_id);

        sqlx::query(
            r#"
            INSERT INTO notification_preferences (user_id, email_enabled, in_app_enabled,
                incident_type_preferences, severity_preferences, receive_digest, digest_time,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(defaults.user_id)
        .bind(defaults.email_enabled)
        .bind(defaults.in_app_enabled)
        .bind(&defaults.incident_type_preferences)
        .bind(&defaults.severity_preferences)
        .bind(defaults.receive_digest)
        .bind(defaults.digest_time)
        .bind(defaults.created_at)
        .bind(defaults.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create notification preferences: {}", e)))?;

        let result = sqlx::query_as::<_, NotificationPreference>(&format!(
            "SELECT {} FROM notification_preferences WHERE user_id = $1",
            PREFERENCE_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get notification preferences: {}", e)))?;

        Ok(result)
    }

    pub async fn update_preference(&self, preference: &NotificationPreference) -> Result<NotificationPreference> {
        let result = sqlx::query_as::<_, NotificationPreference>(&format!(
            r#"
            UPDATE notification_preferences
            SET email_enabled = $1, in_app_enabled = $2, incident_type_preferences = $3,
                severity_preferences = $4, quiet_hours_start = $5, quiet_hours_end = $6,
                receive_digest = $7, digest_time = $8, updated_at = $9
            WHERE user_id = $10
            RETURNING {}
            "#,
            PREFERENCE_COLUMNS
        ))
        .bind(preference.email_enabled)
        .bind(preference.in_app_enabled)
        .bind(&preference.incident_type_preferences)
        .bind(&preference.severity_preferences)
        .bind(preference.quiet_hours_start)
        .bind(preference.quiet_hours_end)
        .bind(preference.receive_digest)
        .bind(preference.digest_time)
        .bind(Utc::now())
        .bind(preference.user_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update notification preferences: {}", e)))?;

        Ok(result)
    }
}
