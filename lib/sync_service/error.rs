use thiserror::Error;

use crate::mq::QueueError;

use super::types::{SourceError, StoreError};

/// Failure classes the message governor decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Provider rate-limit budget exhausted; retry after a delay.
    TransientRemote,
    /// Process shutdown interrupted the ingestion; redeliver immediately.
    Cancelled,
    /// The repository was never registered in storage.
    RegistrationMissing,
    Other,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("reached GitHub API rate limit ({committed} releases committed before stopping)")]
    RateLimited { committed: usize },

    #[error("ingestion cancelled by shutdown")]
    Cancelled,

    #[error("repository {external_id} has no registered sync state")]
    RegistrationMissing { external_id: String },

    #[error("remote source error: {0}")]
    Source(SourceError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("{0}")]
    InvalidLink(String),
}

impl From<SourceError> for Error {
    fn from(error: SourceError) -> Self {
        if error.is_rate_limited() {
            Self::RateLimited { committed: 0 }
        } else {
            Self::Source(error)
        }
    }
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited { .. } => FailureKind::TransientRemote,
            Self::Cancelled => FailureKind::Cancelled,
            Self::RegistrationMissing { .. } => FailureKind::RegistrationMissing,
            Self::Source(_) | Self::Store(_) | Self::Queue(_) | Self::InvalidLink(_) => {
                FailureKind::Other
            }
        }
    }

    /// Records how many releases were persisted before a fetch interruption surfaced.
    pub(crate) fn with_committed(self, committed: usize) -> Self {
        match self {
            Self::RateLimited { .. } => Self::RateLimited { committed },
            other => other,
        }
    }
}
