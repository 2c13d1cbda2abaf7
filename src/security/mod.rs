use crate::db::models::user_models::{AuthToken, UserRole};
use crate::error::Error;
use crate::{config::SecurityConfig, db::models::user_models::User};
use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod auth;
pub mod password;

pub use auth::AuthService;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Display name
    pub name: String,
    pub role: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, Error> {
        Uuid::parse_str(&self.sub)
            .map_err(|e| Error::Authentication(format!("Invalid user ID in token: {}", e)))
    }

    pub fn role(&self) -> Option<UserRole> {
        self.role.parse().ok()
    }
}

/// Issues and checks bearer tokens
#[derive(Clone)]
pub struct SecurityService {
    config: SecurityConfig,
}

impl SecurityService {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Generate a JWT token for a user
    pub fn generate_token(&self, user: &User) -> Result<AuthToken> {
        let now = Utc::now();
        let expiration = now + Duration::minutes(self.config.jwt_expiration_minutes as i64);

        let claims = Claims {
            sub: user.id.to_string(),
            name: user.full_name(),
            role: user.role.to_string(),
            exp: expiration.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| Error::Authentication(format!("Failed to generate JWT token: {}", e)))?;

        Ok(AuthToken {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.jwt_expiration_minutes * 60,
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>, Error> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| Error::Authentication(format!("Invalid token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> SecurityService {
        SecurityService::new(SecurityConfig {
            jwt_secret: secret.to_string(),
            ..SecurityConfig::default()
        })
    }

    #[test]
    fn token_round_trips_user_and_role() {
        let mut user = User::new("guard@campus.edu", String::new(), UserRole::Manager);
        user.first_name = "Grace".into();
        user.last_name = "Okafor".into();

        let security = service("s3cret");
        let token = security.generate_token(&user).unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, 3600);

        let claims = security.validate_token(&token.access_token).unwrap().claims;
        assert_eq!(claims.user_id().unwrap(), user.id);
        assert_eq!(claims.name, "Grace Okafor");
        assert_eq!(claims.role(), Some(UserRole::Manager));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let user = User::new("guard@campus.edu", String::new(), UserRole::Viewer);
        let token = service("one").generate_token(&user).unwrap();

        let err = service("two").validate_token(&token.access_token).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }
}
