//! In-memory stand-ins used by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lsp_types::{TextDocumentItem, Url};
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::session::{ServerChannel, ServerHandle};

type Responder = Box<dyn Fn(&str, &[Value]) -> Result<Value> + Send + Sync>;

/// A server channel that answers from a closure and records every call.
pub struct ScriptedChannel {
    responder: Responder,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    opened: Mutex<Vec<TextDocumentItem>>,
    journal: Mutex<Vec<String>>,
    shutdowns: AtomicUsize,
}

impl ScriptedChannel {
    pub fn new(
        responder: impl Fn(&str, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            journal: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub fn returning(value: Value) -> Arc<Self> {
        Self::new(move |_, _| Ok(value.clone()))
    }

    pub fn failing(message: &'static str) -> Arc<Self> {
        Self::new(move |_, _| {
            Err(ClientError::Server {
                code: -32603,
                message: message.to_string(),
            })
        })
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn opened(&self) -> Vec<TextDocumentItem> {
        self.opened.lock().expect("opened lock").clone()
    }

    /// Every command and document notification, in arrival order.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().expect("journal lock").clone()
    }

    fn record(&self, entry: String) {
        self.journal.lock().expect("journal lock").push(entry);
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerChannel for ScriptedChannel {
    async fn execute_command(&self, command: &str, arguments: Vec<Value>) -> Result<Value> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((command.to_string(), arguments.clone()));
        self.record(command.to_string());
        (self.responder)(command, &arguments)
    }

    async fn open_document(&self, document: TextDocumentItem) -> Result<()> {
        self.record(format!("textDocument/didOpen {}", document.uri));
        self.opened.lock().expect("opened lock").push(document);
        Ok(())
    }

    async fn close_document(&self, uri: &Url) -> Result<()> {
        self.record(format!("textDocument/didClose {uri}"));
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A handle with `channel` installed and the gate already open.
pub async fn ready_handle(channel: Arc<dyn ServerChannel>) -> ServerHandle {
    let handle = ServerHandle::new();
    handle.install(channel).await;
    handle.gate().signal_ready();
    handle
}

/// A handle whose gate is open but with no session behind it.
pub fn stopped_handle() -> ServerHandle {
    let handle = ServerHandle::new();
    handle.gate().signal_ready();
    handle
}
