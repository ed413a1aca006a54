//! Error types of the reconciler.
//!
//! Backend failures never abort a session on their own: sends turn them
//! into rollbacks and the poll loop retries. Only opening a conversation
//! surfaces a [`ChatError`].

use shared::{config::ConfigError, models::ErrorResponse};
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a backend collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced a response (connection, timeout, decoding).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    #[error("backend rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Parsed error body.
        body: ErrorResponse,
    },
    /// An insert returned no representation.
    #[error("backend returned no row")]
    EmptyResult,
    /// A request URL could not be built.
    #[error("invalid backend url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The backend, or its realtime service, cannot serve the request.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// A realtime frame could not be encoded.
    #[error("failed to encode realtime frame: {0}")]
    Encode(#[from] serde_json::Error),
    /// The client configuration does not describe a usable backend.
    #[error("invalid backend configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Result of a backend call.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failures surfaced by a conversation session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The conversation does not exist or is not visible to the user.
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),
    /// The backend failed while opening the conversation.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Result of a session operation.
pub type ChatResult<T> = Result<T, ChatError>;
