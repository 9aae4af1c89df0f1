use tempo_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task store error: {0}")]
    Store(#[from] StorageError),

    #[error("store call did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
