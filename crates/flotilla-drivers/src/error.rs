//! Error types for driver operations.

use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no {family} driver registered for type {key}")]
    NotFound { family: &'static str, key: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("configuration management error: {0}")]
    ConfigManagement(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("plan {plan} is not offered by the {kind} service")]
    InvalidPlan { kind: String, plan: String },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("ssh key generation failed: {0}")]
    Credentials(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
