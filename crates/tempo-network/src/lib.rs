//! Outbound HTTP delivery of scheduled tasks.

mod dispatcher;
mod error;

pub use dispatcher::{
    Dispatch, DispatchConfig, DispatchResponse, HttpDispatcher, execution_outcome,
};
pub use error::DispatchError;
