//! Error types for Flowstate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("rejected for session {session}: {reason}")]
    Rejected { session: String, reason: String },

    #[error("phase {phase} failed: {message}")]
    PhaseFailure { phase: String, message: String },

    #[error("cancelled during phase {phase}")]
    Cancelled { phase: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn presence_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "presence",
            id: id.into(),
        }
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "session",
            id: id.into(),
        }
    }

    pub fn protected(session: impl Into<String>) -> Self {
        Self::Rejected {
            session: session.into(),
            reason: "protected".to_string(),
        }
    }

    pub fn phase_failure(phase: impl ToString, message: impl Into<String>) -> Self {
        Self::PhaseFailure {
            phase: phase.to_string(),
            message: message.into(),
        }
    }

    pub fn cancelled(phase: impl ToString) -> Self {
        Self::Cancelled {
            phase: phase.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
