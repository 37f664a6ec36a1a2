use async_trait::async_trait;
use thiserror::Error;

use crate::credentials::Credential;
use crate::scheduler::job::{Generated, GenerationMode, Job};

/// Error surface of a provider call, as seen by the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// The provider answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Any other provider or transport failure, carried as text.
    #[error("{0}")]
    Provider(String),

    /// The job disappeared while its call was being prepared.
    /// If the job is still in the store it goes back to `Pending`.
    #[error("file aborted")]
    Aborted,

    /// The generator task panicked or was torn down before returning.
    #[error("generation task failed: {0}")]
    Crashed(String),
}

impl GenerateError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }
}

/// Produces the output of one job with one key.
///
/// Implementations perform the actual provider request. The scheduler
/// guarantees that `credential` is not used by any other in-flight call.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        job: &Job,
        credential: &Credential,
        mode: GenerationMode,
    ) -> Result<Generated, GenerateError>;
}
