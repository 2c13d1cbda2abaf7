use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub phone_number: String,
    pub department: String,
    pub institution: String,
    pub email_verified: bool,
    pub active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a new active user with the given role
    pub fn new(email: &str, password_hash: String, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            password_hash,
            first_name: String::new(),
            last_name: String::new(),
            role,
            phone_number: String::new(),
            department: String::new(),
            institution: String::new(),
            email_verified: false,
            active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// First and last name, or the email when both are empty
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }
}

/// User role enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Manager,
    Viewer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Viewer => "viewer",
        }
    }

    fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Manager)
    }

    pub fn can_invite_users(&self) -> bool {
        *self == UserRole::Admin
    }

    pub fn can_view_all_reports(&self) -> bool {
        self.is_staff()
    }

    pub fn can_process_reports(&self) -> bool {
        self.is_staff()
    }

    pub fn can_manage_cases(&self) -> bool {
        self.is_staff()
    }

    pub fn can_view_analytics(&self) -> bool {
        self.is_staff()
    }

    pub fn can_export_data(&self) -> bool {
        self.is_staff()
    }

    /// Security personnel may acknowledge and work incidents
    pub fn can_acknowledge_incidents(&self) -> bool {
        self.is_staff()
    }

    /// Permission codes exposed to clients
    pub fn permission_codes(&self) -> Vec<&'static str> {
        let mut codes = vec!["create_reports"];
        match self {
            UserRole::Admin => codes.extend([
                "invite_users",
                "view_reports",
                "process_reports",
                "manage_cases",
                "view_analytics",
                "export_data",
            ]),
            UserRole::Manager => codes.extend([
                "view_reports",
                "process_reports",
                "manage_cases",
                "view_analytics",
                "export_data",
            ]),
            UserRole::Viewer => codes.push("view_reports"),
        }
        codes
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "manager" => Ok(UserRole::Manager),
            "viewer" => Ok(UserRole::Viewer),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Invite-only registration record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub invited_by: Uuid,
    pub institution: String,
    pub department: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub is_accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Create a new invitation valid for `ttl_hours`
    pub fn new(email: &str, role: UserRole, invited_by: Uuid, token: String, ttl_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            role,
            invited_by,
            institution: String::new(),
            department: String::new(),
            token,
            is_accepted: false,
            accepted_at: None,
            accepted_by: None,
            created_at: now,
            expires_at: now + Duration::hours(ttl_hours),
            sent_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Not accepted yet and not expired
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_accepted && !self.is_expired(now)
    }

    /// Mark accepted by `user`, copying institution and department onto the account
    pub fn accept(&mut self, user: &mut User, now: DateTime<Utc>) {
        self.is_accepted = true;
        self.accepted_at = Some(now);
        self.accepted_by = Some(user.id);

        user.role = self.role;
        if !self.institution.is_empty() {
            user.institution = self.institution.clone();
        }
        if !self.department.is_empty() {
            user.department = self.department.clone();
        }
        user.email_verified = true;
    }
}

/// Single-use password reset token
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl PasswordResetToken {
    pub fn new(user_id: Uuid, token: String, ttl_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token,
            created_at: now,
            expires_at: now + Duration::minutes(ttl_minutes),
            used_at: None,
        }
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now <= self.expires_at
    }
}

/// Authentication tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Login credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Self-registration through an invitation token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub token: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_roles_share_case_permissions() {
        for role in [UserRole::Admin, UserRole::Manager] {
            assert!(role.can_view_all_reports());
            assert!(role.can_manage_cases());
            assert!(role.can_acknowledge_incidents());
        }
        assert!(!UserRole::Viewer.can_view_all_reports());
        assert!(!UserRole::Viewer.can_acknowledge_incidents());
        assert!(UserRole::Admin.can_invite_users());
        assert!(!UserRole::Manager.can_invite_users());
    }

    #[test]
    fn permission_codes_by_role() {
        assert_eq!(UserRole::Viewer.permission_codes(), vec!["create_reports", "view_reports"]);
        assert!(UserRole::Admin.permission_codes().contains(&"invite_users"));
        assert!(!UserRole::Manager.permission_codes().contains(&"invite_users"));
    }

    #[test]
    fn invitation_expires_and_accept_copies_profile() {
        let admin = Uuid::new_v4();
        let mut invitation =
            Invitation::new("Guard@Campus.edu ", UserRole::Manager, admin, "tok".into(), 48);
        invitation.institution = "University of Nigeria".into();
        invitation.department = "Security".into();
        assert_eq!(invitation.email, "guard@campus.edu");

        let now = invitation.created_at;
        assert!(invitation.is_valid(now + Duration::hours(47)));
        assert!(!invitation.is_valid(now + Duration::hours(49)));

        let mut user = User::new(&invitation.email, "hash".into(), UserRole::Viewer);
        invitation.accept(&mut user, now);
        assert!(!invitation.is_valid(now));
        assert_eq!(invitation.accepted_by, Some(user.id));
        assert_eq!(user.role, UserRole::Manager);
        assert_eq!(user.department, "Security");
        assert_eq!(user.institution, "University of Nigeria");
    }

    #[test]
    fn reset_token_is_single_use() {
        let mut token = PasswordResetToken::new(Uuid::new_v4(), "abc".into(), 60);
        let now = token.created_at;
        assert!(token.is_usable(now));
        assert!(!token.is_usable(now + Duration::minutes(61)));
        token.used_at = Some(now);
        assert!(!token.is_usable(now));
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Manager".parse::<UserRole>().unwrap(), UserRole::Manager);
        assert!("operator".parse::<UserRole>().is_err());
    }
}
