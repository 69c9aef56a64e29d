use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures the translation pipeline distinguishes between.
///
/// The variant decides the blast radius: a provider outage stops the run,
/// a malformed input skips one file, a persistence failure stops one batch
/// from being marked complete, a transient failure is retried, and a
/// rejected translation fails only its own work unit.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("translation provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("transient translation failure: {0}")]
    TransientTranslationFailure(String),
    /// The provider refused one piece of text (too long, unsupported input).
    #[error("translation rejected: {0}")]
    TranslationRejected(String),
    #[error("malformed input {}: {reason}", .path.display())]
    MalformedInput { path: PathBuf, reason: String },
    #[error("failed to persist {}: {source}", .path.display())]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("translation worker failed: {0}")]
    WorkerFailed(String),
}

impl PipelineError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::PersistenceFailure {
            path: path.into(),
            source,
        }
    }

    /// Only transient provider failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientTranslationFailure(_))
    }

    /// Errors that end the whole run rather than a single file or batch.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            PipelineError::ProviderUnavailable(_) | PipelineError::Configuration(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
