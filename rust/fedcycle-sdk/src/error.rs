use std::sync::Arc;

use thiserror::Error;

use fedcycle_core::crypto::CredentialError;

use crate::{client::ClientError, training::TrainingError};

/// A fatal error that ended a job.
///
/// Every `JobError` is delivered exactly once, through an [`Event::Error`], before the job
/// finishes.
///
/// [`Event::Error`]: crate::Event::Error
#[derive(Debug, Error)]
pub enum JobError {
    /// The authentication token could not be produced.
    #[error("failed to produce the authentication token: {0}")]
    Credential(#[from] CredentialError),

    /// The service did not authenticate the worker. This is never retried.
    #[error("authentication failed: {0}")]
    Authentication(#[source] ClientError),

    /// A call kept failing with transient errors until it ran out of attempts.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Network {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    /// The service violated the protocol.
    #[error("{operation} failed: {source}")]
    Protocol {
        operation: &'static str,
        #[source]
        source: ClientError,
    },

    #[error(transparent)]
    Training(#[from] TrainingError),
}

/// How a job ended.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The service announced that no more cycles will be offered.
    Completed,
    /// The job stopped on a fatal error. The same error was delivered to the error listeners.
    Failed(Arc<JobError>),
    /// The job was cancelled by its owner.
    Cancelled,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobOutcome::Cancelled)
    }

    /// The error that ended the job, if any.
    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}
