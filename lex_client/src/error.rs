//! Error type shared by the library.
//!
//! Every user-visible operation converts these into a display or a
//! notification at its own boundary; none of them is meant to terminate the
//! host process.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Library result alias.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Readiness was signaled but no session is installed (skipped, binary
    /// missing, launch failed or already stopped).
    #[error("Lex language server is not running.")]
    ServerNotRunning,

    /// The server answered with a shape the caller cannot use.
    #[error("{0}")]
    UnexpectedResponse(String),

    /// JSON-RPC error object returned by the server.
    #[error("{message}")]
    Server { code: i64, message: String },

    #[error("request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The channel to the server is gone (process exited or stream closed).
    #[error("language server connection closed")]
    ChannelClosed,

    #[error("failed to launch language server {}: {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("language server handshake failed: {0}")]
    Handshake(String),

    #[error("client is already activated")]
    AlreadyActivated,

    /// The command was invoked on something it does not apply to.
    #[error("{0}")]
    InvalidInput(String),

    #[error("failed to apply workspace edit: {0}")]
    Edit(String),

    #[error("failed to create preview surface: {0}")]
    Surface(String),

    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse(message.into())
    }
}
