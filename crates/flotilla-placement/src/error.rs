use thiserror::Error;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("no runtime nodes available to place {kind} containers for {app}")]
    NoCapacity { app: String, kind: String },

    #[error("invalid container count {count} for type {kind}")]
    InvalidCount { kind: String, count: i64 },
}
