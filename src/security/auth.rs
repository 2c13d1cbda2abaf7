use crate::config::SecurityConfig;
use crate::db::models::user_models::{
    AuthToken, Invitation, LoginCredentials, PasswordResetToken, RegistrationRequest, User,
    UserRole,
};
use crate::db::repositories::invitations::InvitationsRepository;
use crate::db::repositories::users::UsersRepository;
use crate::error::Error;
use crate::notifications::EmailNotifier;
use crate::security::{password, SecurityService};
use anyhow::Result;
use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const TOKEN_LENGTH: usize = 48;

/// Admin request to invite someone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationRequest {
    pub email: String,
    pub role: UserRole,
    #[serde(default)]
    pub institution: String,
    #[serde(default)]
    pub department: String,
}

/// Authentication service for handling user login/logout
#[derive(Clone)]
pub struct AuthService {
    users_repo: UsersRepository,
    invitations_repo: InvitationsRepository,
    security: SecurityService,
    notifier: EmailNotifier,
    config: SecurityConfig,
}

impl AuthService {
    pub fn new(pool: Arc<PgPool>, config: &SecurityConfig, notifier: EmailNotifier) -> Self {
        Self {
            users_repo: UsersRepository::new(pool.clone()),
            invitations_repo: InvitationsRepository::new(pool),
            security: SecurityService::new(config.clone()),
            notifier,
            config: config.clone(),
        }
    }

    pub fn security(&self) -> &SecurityService {
        &self.security
    }

    async fn find_user(&self, user_id: &Uuid) -> Result<User> {
        let user = self
            .users_repo
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
        Ok(user)
    }

    /// Login a user with email/password
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<(User, AuthToken)> {
        let user = self
            .users_repo
            .get_by_email(&credentials.email)
            .await?
            .ok_or_else(|| Error::Authentication("Invalid email or password".to_string()))?;

        if !user.active {
            return Err(Error::Authentication("User account is inactive".to_string()).into());
        }

        let valid = password::verify_password(&credentials.password, &user.password_hash)?;
        if !valid {
            return Err(Error::Authentication("Invalid email or password".to_string()).into());
        }

        self.users_repo.update_last_login(&user.id).await?;
        let token = self.security.generate_token(&user)?;

        info!("User logged in: {}", user.email);

        Ok((user, token))
    }

    /// Resolve a bearer token to an active user
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        let claims = self.security.validate_token(token)?.claims;
        let user = self
            .users_repo
            .get_by_id(&claims.user_id()?)
            .await?
            .ok_or_else(|| Error::Authentication("Unknown user".to_string()))?;

        if !user.active {
            return Err(Error::Authentication("User account is inactive".to_string()).into());
        }
        Ok(user)
    }

    /// Invite someone by email. Re-inviting an address replaces the earlier invitation.
    pub async fn invite(&self, inviter: &User, request: InvitationRequest) -> Result<Invitation> {
        if !inviter.role.can_invite_users() {
            return Err(Error::Authorization("Only administrators can invite users".to_string()).into());
        }
        if !request.email.contains('@') {
            return Err(Error::Validation(format!("Invalid email address: {}", request.email)).into());
        }
        if self.users_repo.get_by_email(&request.email).await?.is_some() {
            return Err(Error::AlreadyExists(format!("A user with email {} already exists", request.email)).into());
        }

        let mut invitation = Invitation::new(
            &request.email,
            request.role,
            inviter.id,
            password::generate_token(TOKEN_LENGTH),
            self.config.invitation_ttl_hours,
        );
        invitation.institution = request.institution;
        invitation.department = request.department;

        let mut invitation = self.invitations_repo.upsert(&invitation).await?;

        if self.notifier.send_invitation(&invitation, inviter).await {
            let now = Utc::now();
            self.invitations_repo.mark_sent(&invitation.id, now).await?;
            invitation.sent_at = Some(now);
        } else {
            warn!("Invitation for {} created but the email could not be sent", invitation.email);
        }

        Ok(invitation)
    }

    pub async fn invitations(&self) -> Result<Vec<Invitation>> {
        self.invitations_repo.get_all().await
    }

    pub async fn revoke_invitation(&self, actor: &User, id: &Uuid) -> Result<()> {
        if !actor.role.can_invite_users() {
            return Err(Error::Authorization("Only administrators can revoke invitations".to_string()).into());
        }
        if !self.invitations_repo.delete(id).await? {
            return Err(Error::NotFound(format!("Invitation {} not found", id)).into());
        }
        Ok(())
    }

    /// An invitation that can still be used to register
    pub async fn valid_invitation(&self, token: &str) -> Result<Invitation> {
        let invitation = self
            .invitations_repo
            .get_by_token(token)
            .await?
            .filter(|invitation| invitation.is_valid(Utc::now()))
            .ok_or_else(|| Error::Validation("Invalid or expired invitation link".to_string()))?;
        Ok(invitation)
    }

    /// Create an account from an invitation
    pub async fn register(&self, request: RegistrationRequest) -> Result<(User, AuthToken)> {
        let mut invitation = self.valid_invitation(&request.token).await?;
        password::validate_password(&request.password)?;

        if self.users_repo.get_by_email(&invitation.email).await?.is_some() {
            return Err(Error::AlreadyExists("Email already exists".to_string()).into());
        }

        let password_hash = password::hash_password(&request.password, &self.config)?;
        let mut user = User::new(&invitation.email, password_hash, invitation.role);
        user.first_name = request.first_name;
        user.last_name = request.last_name;
        user.phone_number = request.phone_number;
        invitation.accept(&mut user, Utc::now());

        let user = self.users_repo.create(&user).await?;
        self.invitations_repo.mark_accepted(&invitation).await?;

        info!("New user registered: {} as {}", user.email, user.role);

        self.notifier.send_welcome(&user).await;
        let token = self.security.generate_token(&user)?;
        Ok((user, token))
    }

    /// Change user password
    pub async fn change_password(
        &self,
        user_id: &Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let mut user = self.find_user(user_id).await?;

        let valid = password::verify_password(current_password, &user.password_hash)?;
        if !valid {
            return Err(Error::Authentication("Current password is incorrect".to_string()).into());
        }
        password::validate_password(new_password)?;

        user.password_hash = password::hash_password(new_password, &self.config)?;
        self.users_repo.update(&user).await?;

        info!("Password changed for user: {}", user.email);

        Ok(())
    }

    /// Email a reset link. Unknown or inactive addresses are ignored silently.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let Some(user) = self.users_repo.get_by_email(email).await? else {
            info!("Password reset requested for unknown email {}", email);
            return Ok(());
        };
        if !user.active {
            return Ok(());
        }

        let token = PasswordResetToken::new(
            user.id,
            password::generate_token(TOKEN_LENGTH),
            self.config.password_reset_ttl_minutes,
        );
        self.invitations_repo.create_reset_token(&token).await?;

        if !self.notifier.send_password_reset(&user, &token.token).await {
            return Err(Error::Email("Could not send the password reset email".to_string()).into());
        }
        Ok(())
    }

    /// Set a new password with a reset token; each token works once
    pub async fn confirm_password_reset(&self, token: &str, new_password: &str) -> Result<()> {
        password::validate_password(new_password)?;

        let reset = self
            .invitations_repo
            .get_reset_token(token)
            .await?
            .filter(|reset| reset.is_usable(Utc::now()))
            .ok_or_else(|| Error::Validation("Invalid or expired reset link".to_string()))?;

        if !self.invitations_repo.mark_reset_token_used(&reset.id).await? {
            return Err(Error::Validation("Reset link has already been used".to_string()).into());
        }

        let mut user = self.find_user(&reset.user_id).await?;
        user.password_hash = password::hash_password(new_password, &self.config)?;
        self.users_repo.update(&user).await?;

        info!("Password reset for user: {}", user.email);

        Ok(())
    }

    pub async fn list_users(&self, actor: &User) -> Result<Vec<User>> {
        if !actor.role.can_view_analytics() {
            return Err(Error::Authorization("Staff access required".to_string()).into());
        }
        self.users_repo.get_all().await
    }

    /// Update user role (admin function)
    pub async fn update_role(&self, actor: &User, user_id: &Uuid, new_role: UserRole) -> Result<User> {
        if actor.role != UserRole::Admin {
            return Err(Error::Authorization("Only administrators can change roles".to_string()).into());
        }

        let mut user = self.find_user(user_id).await?;
        user.role = new_role;
        let result = self.users_repo.update(&user).await?;

        info!("Role updated for user {}: {}", user.email, new_role);

        Ok(result)
    }

    /// Activate or deactivate a user (admin function)
    pub async fn set_active(&self, actor: &User, user_id: &Uuid, active: bool) -> Result<User> {
        if actor.role != UserRole::Admin {
            return Err(Error::Authorization("Only administrators can change account status".to_string()).into());
        }
        if actor.id == *user_id && !active {
            return Err(Error::Validation("You cannot deactivate your own account".to_string()).into());
        }

        let mut user = self.find_user(user_id).await?;
        user.active = active;
        let result = self.users_repo.update(&user).await?;

        info!(
            "User {} {} by {}",
            user.email,
            if active { "activated" } else { "deactivated" },
            actor.email
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::notifications::testing::MemoryMailer;

    fn config() -> SecurityConfig {
        SecurityConfig {
            password_hash_cost: 4,
            ..SecurityConfig::default()
        }
    }

    fn unique_email(prefix: &str) -> String {
        format!("{}-{}@campus.test", prefix, Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn invitation_registration_and_login() {
        let Some(pool) = test_pool().await else { return };
        let mailer = Arc::new(MemoryMailer::default());
        let notifier = EmailNotifier::new(mailer.clone(), "http://localhost", "security@campus.test");
        let auth = AuthService::new(pool.clone(), &config(), notifier);

        let admin = UsersRepository::new(pool)
            .create(&User::new(&unique_email("admin"), String::new(), UserRole::Admin))
            .await
            .unwrap();

        let email = unique_email("officer");
        let invitation = auth
            .invite(
                &admin,
                InvitationRequest {
                    email: email.clone(),
                    role: UserRole::Manager,
                    institution: "North Campus".into(),
                    department: "Security".into(),
                },
            )
            .await
            .unwrap();
        assert!(invitation.sent_at.is_some());
        assert!(mailer.sent()[0].text.contains(&invitation.token));

        let (user, token) = auth
            .register(RegistrationRequest {
                token: invitation.token.clone(),
                password: "patrol-route-7".into(),
                first_name: "Musa".into(),
                last_name: "Bello".into(),
                phone_number: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(user.role, UserRole::Manager);
        assert_eq!(user.institution, "North Campus");
        assert_eq!(auth.authenticate(&token.access_token).await.unwrap().id, user.id);

        // the invitation is spent
        assert!(auth.valid_invitation(&invitation.token).await.is_err());

        let credentials = LoginCredentials {
            email: email.to_uppercase(),
            password: "patrol-route-7".into(),
        };
        let (logged_in, _) = auth.login(&credentials).await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let wrong = LoginCredentials {
            email,
            password: "not-the-password".into(),
        };
        assert!(auth.login(&wrong).await.is_err());
    }

    #[tokio::test]
    async fn reset_token_works_once() {
        let Some(pool) = test_pool().await else { return };
        let mailer = Arc::new(MemoryMailer::default());
        let notifier = EmailNotifier::new(mailer.clone(), "http://localhost", "security@campus.test");
        let auth = AuthService::new(pool.clone(), &config(), notifier);

        let hash = password::hash_password("first-password", &config()).unwrap();
        let user = UsersRepository::new(pool)
            .create(&User::new(&unique_email("viewer"), hash, UserRole::Viewer))
            .await
            .unwrap();

        auth.request_password_reset(&user.email).await.unwrap();
        let link = mailer.sent()[0].text.clone();
        let token = link
            .split("/reset-password/")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap()
            .to_string();

        auth.confirm_password_reset(&token, "second-password").await.unwrap();
        assert!(auth.confirm_password_reset(&token, "third-password").await.is_err());

        let credentials = LoginCredentials {
            email: user.email.clone(),
            password: "second-password".into(),
        };
        assert!(auth.login(&credentials).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_email_reset_is_silent() {
        let Some(pool) = test_pool().await else { return };
        let mailer = Arc::new(MemoryMailer::default());
        let notifier = EmailNotifier::new(mailer.clone(), "http://localhost", "security@campus.test");
        let auth = AuthService::new(pool, &config(), notifier);

        auth.request_password_reset(&unique_email("nobody")).await.unwrap();
        assert!(mailer.sent().is_empty());
    }
}
