use crate::{
    db::models::user_models::{Invitation, PasswordResetToken},
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const INVITATION_COLUMNS: &str = "id, email, role, invited_by, institution, department, token, \
     is_accepted, accepted_at, accepted_by, created_at, expires_at, sent_at";

/// Invitations and password reset tokens
#[derive(Clone)]
pub struct InvitationsRepository {
    pool: Arc<PgPool>,
}

impl InvitationsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create an invitation, replacing any earlier one for the same email
    pub async fn upsert(&self, invitation: &Invitation) -> Result<Invitation> {
        info!("Creating invitation for {}", invitation.email);

        let result = sqlx::query_as::<_, Invitation>(&format!(
            r#"
            INSERT INTO invitations (id, email, role, invited_by, institution, department, token,
                                     is_accepted, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8, $9)
            ON CONFLICT (email) DO UPDATE
            SET role = EXCLUDED.role, invited_by = EXCLUDED.invited_by,
                institution = EXCLUDED.institution, department = EXCLUDED.department,
                token = EXCLUDED.token, is_accepted = FALSE, accepted_at = NULL,
                accepted_by = NULL, created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at, sent_at = NULL
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        ))
        .bind(invitation.id)
        .bind(&invitation.email)
        .bind(invitation.role)
        .bind(invitation.invited_by)
        .bind(&invitation.institution)
        .bind(&invitation.department)
        .bind(&invitation.token)
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create invitation: {}", e)))?;

        Ok(result)
    }

    pub async fn get_by_token(&self, token: &str) -> Result<Option<Invitation>> {
        let result = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {} FROM invitations WHERE token = $1",
            INVITATION_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get invitation: {}", e)))?;

        Ok(result)
    }

    pub async fn get_all(&self) -> Result<Vec<Invitation>> {
        let result = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {} FROM invitations ORDER BY created_at DESC",
            INVITATION_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list invitations: {}", e)))?;

        Ok(result)
    }

    pub async fn mark_sent(&self, id: &Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE invitations SET sent_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to mark invitation sent: {}", e)))?;

        Ok(())
    }

    pub async fn mark_accepted(&self, invitation: &Invitation) -> Result<()> {
        sqlx::query(
            "UPDATE invitations SET is_accepted = TRUE, accepted_at = $1, accepted_by = $2 WHERE id = $3",
        )
        .bind(invitation.accepted_at)
        .bind(invitation.accepted_by)
        .bind(invitation.id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to accept invitation: {}", e)))?;

        Ok(())
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM invitations WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete invitation: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn create_reset_token(&self, token: &PasswordResetToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create reset token: {}", e)))?;

        Ok(())
    }

    pub async fn get_reset_token(&self, token: &str) -> Result<Option<PasswordResetToken>> {
        let result = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            SELECT id, user_id, token, created_at, expires_at, used_at
            FROM password_reset_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get reset token: {}", e)))?;

        Ok(result)
    }

    /// Consume a token; returns false when it was already used
    pub async fn mark_reset_token_used(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE password_reset_tokens SET used_at = NOW() WHERE id = $1 AND used_at IS NULL",
        )
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to consume reset token: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}
