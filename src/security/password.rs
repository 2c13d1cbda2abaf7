use crate::config::SecurityConfig;
use crate::error::Error;
use anyhow::Result;
use bcrypt::{hash, verify};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Hash a password with bcrypt
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<String> {
    let hashed = hash(password, config.password_hash_cost)
        .map_err(|e| Error::Authentication(format!("Failed to hash password: {}", e)))?;

    Ok(hashed)
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let result = verify(password, hash)
        .map_err(|e| Error::Authentication(format!("Failed to verify password: {}", e)))?;

    Ok(result)
}

pub fn validate_password(password: &str) -> Result<(), Error> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation("Password cannot be entirely numeric".to_string()));
    }
    Ok(())
}

/// Generate a random password
pub fn generate_random_password(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()";

    let mut rng = thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// URL-safe token for invitation and reset links
pub fn generate_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
