//! Orchestrator error types.

use flotilla_drivers::DriverError;
use flotilla_placement::PlacementError;
use flotilla_state::StateError;
use flotilla_tasks::{BatchError, TaskFailure};
use thiserror::Error;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no capacity: {0}")]
    NoCapacity(String),

    /// Node or layer build/destroy failed. Lists every failed task.
    #[error("provisioning failed: {0}")]
    Provision(BatchError),

    /// One or more nodes failed to converge. Lists every failed node.
    #[error("convergence failed: {0}")]
    Converge(BatchError),

    #[error("{0}")]
    AllocationConflict(String),

    #[error("no {family} driver registered for type {key}")]
    DriverNotFound { family: &'static str, key: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A driver call outside a provisioning or converge batch failed
    /// (publish, purge, run, service calls).
    #[error("driver error: {0}")]
    Driver(String),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub(crate) fn provision(failure: TaskFailure) -> Self {
        Self::Provision(BatchError {
            failures: vec![failure],
        })
    }

    pub(crate) fn converge(failure: TaskFailure) -> Self {
        Self::Converge(BatchError {
            failures: vec![failure],
        })
    }

    pub(crate) fn driver(failure: TaskFailure) -> Self {
        Self::Driver(failure.to_string())
    }
}

impl From<StateError> for OrchestratorError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict(msg) => Self::AllocationConflict(format!("allocation conflict: {msg}")),
            StateError::NotFound(what) => Self::NotFound(what),
            StateError::AlreadyExists(what) => Self::InvalidInput(format!("already exists: {what}")),
            other => Self::State(other),
        }
    }
}

impl From<DriverError> for OrchestratorError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotFound { family, key } => Self::DriverNotFound { family, key },
            other => Self::Driver(other.to_string()),
        }
    }
}

impl From<PlacementError> for OrchestratorError {
    fn from(e: PlacementError) -> Self {
        match e {
            PlacementError::NoCapacity { .. } => Self::NoCapacity(e.to_string()),
            PlacementError::InvalidCount { .. } => Self::InvalidInput(e.to_string()),
        }
    }
}
