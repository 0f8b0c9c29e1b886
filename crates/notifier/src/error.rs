use thiserror::Error;

use atrium_common::types::UserId;

/// Errors raised by a single delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("user {0} has no email address")]
    MissingEmail(UserId),

    #[error("email provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
}
