use crate::{
    db::models::user_models::{User, UserRole},
    error::Error,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, phone_number, \
     department, institution, email_verified, active, last_login, created_at, updated_at";

/// Users repository for handling user operations
#[derive(Clone)]
pub struct UsersRepository {
    pool: Arc<PgPool>,
}

impl UsersRepository {
    /// Create a new users repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new user
    pub async fn create(&self, user: &User) -> Result<User> {
        info!("Creating new user: {}", user.email);

        let result = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role, phone_number,
                               department, institution, email_verified, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role)
        .bind(&user.phone_number)
        .bind(&user.department)
        .bind(&user.institution)
        .bind(user.email_verified)
        .bind(user.active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create user: {}", e)))?;

        Ok(result)
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by ID: {}", e)))?;

        Ok(result)
    }

    /// Get user by email (case-insensitive)
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email.trim())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by email: {}", e)))?;

        Ok(result)
    }

    /// Update profile, role, password hash and active flag
    pub async fn update(&self, user: &User) -> Result<User> {
        let result = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET email = $1, password_hash = $2, first_name = $3, last_name = $4, role = $5,
                phone_number = $6, department = $7, institution = $8, email_verified = $9,
                active = $10, updated_at = $11
            WHERE id = $12
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role)
        .bind(&user.phone_number)
        .bind(&user.department)
        .bind(&user.institution)
        .bind(user.email_verified)
        .bind(user.active)
        .bind(Utc::now())
        .bind(user.id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update user: {}", e)))?;

        Ok(result)
    }

    /// Delete user
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete user: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Get all users
    pub async fn get_all(&self) -> Result<Vec<User>> {
        let result = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC",
            USER_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get all users: {}", e)))?;

        Ok(result)
    }

    /// Active users holding any of `roles`
    pub async fn get_active_by_roles(&self, roles: &[UserRole]) -> Result<Vec<User>> {
        let names: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();
        let result = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE active = TRUE AND role::text = ANY($1) ORDER BY email",
            USER_COLUMNS
        ))
        .bind(&names)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get users by role: {}", e)))?;

        Ok(result)
    }

    /// Active users among `ids`
    pub async fn get_active_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        let result = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE active = TRUE AND id = ANY($1) ORDER BY email",
            USER_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get users by id: {}", e)))?;

        Ok(result)
    }

    /// Update last login timestamp
    pub async fn update_last_login(&self, id: &Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to update last login: {}", e)))?;

        Ok(())
    }
}
