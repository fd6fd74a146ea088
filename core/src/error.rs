//! Error types for the serv-core library.

use thiserror::Error;
use uuid::Uuid;

use crate::certificate::{CaError, IssueError};
use crate::server::ServerError;

/// Result type alias for serv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating local hosting.
///
/// Publication failures are deliberately absent: hostname publication is
/// best-effort and its errors are logged, never escalated (see
/// [`crate::publisher::PublishError`]).
#[derive(Error, Debug)]
pub enum Error {
    /// No bindable port remained in the configured pool.
    #[error("no available port in range {start}-{end}")]
    PortExhausted { start: u16, end: u16 },

    /// A user-supplied port fell outside the allowed TCP range.
    #[error("port {0} is outside the allowed range 1024-65535")]
    PortOutOfRange(u16),

    /// The referenced project does not exist.
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),

    /// Root certificate generation or trust installation failed.
    #[error(transparent)]
    CertificateAuthority(#[from] CaError),

    /// Leaf certificate generation or signing failed.
    #[error(transparent)]
    CertificateIssuance(#[from] IssueError),

    /// Listener bind or server setup failed.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
