use thiserror::Error;

use crate::detector::DetectorError;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DetectorError> for Error {
    fn from(err: DetectorError) -> Self {
        Error::Detector(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
