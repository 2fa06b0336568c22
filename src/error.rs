//! Error taxonomy for pipeline runs.
//!
//! Every error is fatal except the one-shot auth retry during dependency
//! fetches. All variants unwind to the single cleanup-and-exit handler.

use thiserror::Error;

use crate::domain::PipelineState;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Fatal pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Spec missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source fetch credential failure that survived the provisioning retry
    #[error("Authentication failed fetching '{reference}': {message}")]
    Auth { reference: String, message: String },

    /// Fetch or graph error
    #[error("Dependency resolution failed for '{reference}': {message}")]
    DependencyResolution { reference: String, message: String },

    /// Any build/start/health/test container failure
    #[error("Stage {stage} failed: {message}")]
    Runtime {
        stage: PipelineState,
        message: String,
    },

    /// External interrupt signal
    #[error("Interrupted by signal")]
    Interrupted,
}

impl PipelineError {
    pub fn runtime(stage: PipelineState, error: impl std::fmt::Display) -> Self {
        Self::Runtime {
            stage,
            message: format!("{:#}", error),
        }
    }

    pub fn resolution(reference: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::DependencyResolution {
            reference: reference.to_string(),
            message: message.into(),
        }
    }

    /// Process exit code for this error (always a failure)
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Transport messages that mark a fetch failure as a credential problem
const AUTH_MARKERS: &[&str] = &[
    "permission denied (publickey",
    "host key verification failed",
    "could not read from remote repository",
    "authentication failed",
    "terminal prompts disabled",
];

/// Whether a fetch error looks like an authentication/transport failure.
///
/// Only the root cause is inspected. Context layers carry source references
/// and paths, which must not influence the classification.
pub fn is_auth_failure(error: &anyhow::Error) -> bool {
    let cause = error.root_cause().to_string().to_lowercase();
    AUTH_MARKERS.iter().any(|marker| cause.contains(marker))
}
