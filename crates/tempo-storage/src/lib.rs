//! Durable task table for tempo.
//!
//! [`TaskStore`] is the contract the scheduler and the API program against;
//! [`SqliteTaskStore`] is the shipped implementation.

pub mod db;
pub mod error;
mod sqlite;
mod store;

pub use error::{Result, StorageError};
pub use sqlite::SqliteTaskStore;
pub use store::{TaskQuery, TaskStore, TransitionUpdate};
