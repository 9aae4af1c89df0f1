use tempo_core::TransportErrorKind;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No response: refused connection, DNS failure, timeout, bad request
    /// parts. Eligible for the retry policy when the kind is retryable.
    #[error("transport failure ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// The endpoint answered with a non-2xx status. Recorded, not retried.
    #[error("endpoint answered with status {status_code}")]
    Application { status_code: u16, body: String },
}

impl DispatchError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        DispatchError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Transport { kind, .. } => kind.is_retryable(),
            DispatchError::Application { .. } => false,
        }
    }
}
