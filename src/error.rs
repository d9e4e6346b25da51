//! Error taxonomy for the shift planner core.
//!
//! Every failure that crosses a component boundary is one of these kinds.
//! Each kind carries a short stable code (used in persisted error records
//! and by API collaborators) and a human-readable message. Stack traces are
//! logged, never returned.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PlanningError {
    /// Malformed schedule input: duplicate ids, dangling references,
    /// inverted intervals, empty skill tags. Surfaced at submission and
    /// never reaches the solver.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A direct reassignment that would introduce a hard violation.
    #[error("illegal move ({constraint}): {message}")]
    IllegalMove { constraint: String, message: String },

    /// Unknown job id.
    #[error("job {job_id} not found")]
    NotFound { job_id: Uuid },

    /// Operation not allowed in the job's current status.
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// Solve canceled or process restarted mid-solve.
    #[error("interrupted: {message}")]
    Interrupted { message: String },

    /// Invariant breach inside the core. Never silently swallowed; jobs
    /// hitting this are marked FAILED with the error record attached.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PlanningError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn illegal_move(constraint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IllegalMove {
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short stable identifier for this error kind.
    pub fn code(&self) -> String {
        match self {
            Self::InvalidInput { .. } => "invalid_input".to_string(),
            Self::IllegalMove { constraint, .. } => format!("illegal_move.{constraint}"),
            Self::NotFound { .. } => "not_found".to_string(),
            Self::InvalidState { .. } => "invalid_state.not_completed".to_string(),
            Self::Interrupted { .. } => "interrupted".to_string(),
            Self::Internal { .. } => "internal".to_string(),
        }
    }

    /// Converts into the record shape persisted on a failed job.
    pub fn to_record(&self, job_id: Option<Uuid>) -> ErrorRecord {
        ErrorRecord {
            code: self.code(),
            message: self.to_string(),
            job_id,
        }
    }
}

pub type PlanningResult<T> = Result<T, PlanningError>;

/// Structured failure record stored on a job and returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
    #[serde(rename = "jobId")]
    pub job_id: Option<Uuid>,
}
