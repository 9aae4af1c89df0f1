use tempo_core::{TaskId, TaskTransitionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt row for task {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("task already exists: {0}")]
    Duplicate(TaskId),

    #[error(transparent)]
    Transition(#[from] TaskTransitionError),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StorageError>;
