use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("No API keys configured for the active provider")]
    NoCredentials,

    #[error("No jobs to process")]
    NoJobs,

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Cannot modify job {0} while it is processing")]
    JobProcessing(Uuid),

    #[error("History I/O error: {0}")]
    HistoryIo(#[from] std::io::Error),

    #[error("History serialization error: {0}")]
    HistoryFormat(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
