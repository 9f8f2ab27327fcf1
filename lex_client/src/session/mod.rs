//! Server session: the live connection to a running `lex-lsp`.
//!
//! [`ServerSession`] owns the child process and the framed JSON-RPC channel.
//! Everything else in the crate talks to the server through the
//! [`ServerChannel`] trait and reaches the current session via a shared
//! [`ServerHandle`], so commands and previews never hold the process directly.

mod codec;
mod process;


use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::{TextDocumentItem, Url};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{ClientError, Result};
use crate::gate::ReadinessGate;

pub use codec::{CodecError, LspCodec, MAX_FRAME_BYTES};
pub use process::{
    DEFAULT_REQUEST_TIMEOUT, LaunchSpec, ProcessLauncher, SHUTDOWN_GRACE, ServerSession,
};

/// Operations the rest of the crate needs from a server connection.
#[async_trait]
pub trait ServerChannel: Send + Sync {
    /// Run `workspace/executeCommand` and return the raw result.
    async fn execute_command(&self, command: &str, arguments: Vec<Value>) -> Result<Value>;

    /// `textDocument/didOpen`: hand the server a document's current text.
    async fn open_document(&self, document: TextDocumentItem) -> Result<()>;

    /// `textDocument/didClose`.
    async fn close_document(&self, uri: &Url) -> Result<()>;

    /// Graceful shutdown. Calling it more than once is a no-op.
    async fn shutdown(&self) -> Result<()>;
}

/// Starts a server and returns an initialized channel.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Arc<dyn ServerChannel>>;
}

/// Shared view of "the current server".
///
/// Cloning is cheap; all clones see the same gate and the same slot.
#[derive(Clone, Default)]
pub struct ServerHandle {
    gate: ReadinessGate,
    slot: Arc<RwLock<Option<Arc<dyn ServerChannel>>>>,
}

impl ServerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Install a session, returning the one it replaced.
    pub async fn install(&self, channel: Arc<dyn ServerChannel>) -> Option<Arc<dyn ServerChannel>> {
        self.slot.write().await.replace(channel)
    }

    pub async fn take(&self) -> Option<Arc<dyn ServerChannel>> {
        self.slot.write().await.take()
    }

    /// Current session without waiting on the gate.
    pub async fn current(&self) -> Option<Arc<dyn ServerChannel>> {
        self.slot.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Wait for readiness, then return the session or `ServerNotRunning`.
    pub async fn ready_channel(&self) -> Result<Arc<dyn ServerChannel>> {
        self.gate.wait_ready().await;
        self.current().await.ok_or(ClientError::ServerNotRunning)
    }

    pub async fn execute_command(&self, command: &str, arguments: Vec<Value>) -> Result<Value> {
        let channel = self.ready_channel().await?;
        channel.execute_command(command, arguments).await
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("ready", &self.gate.is_ready())
            .finish_non_exhaustive()
    }
}
