//! Error types for notification delivery.

use thiserror::Error;

/// Result type alias for notification delivery.
pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook answered {status}")]
    Status { status: u16 },
}
