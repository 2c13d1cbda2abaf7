pub mod api;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod jobs;
pub mod messaging;
pub mod notifications;
pub mod security;
pub mod services;

pub use error::Error;
