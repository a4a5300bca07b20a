//! Engine error type.

use crate::backend::BackendError;
use crate::transport::TransportError;

/// Result type for engine operations.
pub type BotResult<T> = Result<T, BotError>;

/// Engine error type.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("No connection to server")]
    NotConnected,

    #[error("Command handler already exists: {0}")]
    HandlerExists(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
