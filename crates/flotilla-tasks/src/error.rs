use std::fmt;

use thiserror::Error;

/// One task that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{label}: {reason}")]
pub struct TaskFailure {
    /// Resource the task acted on, e.g. a node id.
    pub label: String,
    pub reason: String,
}

/// Every failure of a batch, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct BatchError {
    pub failures: Vec<TaskFailure>,
}

impl BatchError {
    pub fn labels(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.label.as_str()).collect()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}
