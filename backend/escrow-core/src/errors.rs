//! Application-wide error types.

use thiserror::Error;

use crate::model::Role;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Role {role} is not permitted to {action}")]
    RoleNotPermitted { role: Role, action: &'static str },

    #[error("Provide evidence or attach up to 3 files")]
    EmptySubmission,

    #[error("Too many attachments: {count} (limit is 3)")]
    TooManyAttachments { count: usize },

    #[error("Feedback message must not be empty")]
    EmptyMessage,

    #[error("Milestone index {index} out of range (document has {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Chain call error: {0}")]
    ChainCall(String),

    #[error("Chain call rejected by the escrow contract")]
    ChainCallRejected,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
