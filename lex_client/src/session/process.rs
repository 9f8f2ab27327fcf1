//! `lex-lsp` child process and the JSON-RPC channel on its stdio.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use lsp_types::notification::{
    DidCloseTextDocument, DidOpenTextDocument, Exit, Initialized, Notification,
};
use lsp_types::request::{ExecuteCommand, Initialize, Request, Shutdown};
use lsp_types::{
    ClientCapabilities, ClientInfo, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DynamicRegistrationClientCapabilities, ExecuteCommandParams, InitializeParams,
    InitializeResult, InitializedParams, TextDocumentClientCapabilities, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentSyncClientCapabilities, Url, WorkDoneProgressParams,
    WorkspaceClientCapabilities, WorkspaceEditClientCapabilities, WorkspaceFolder,
};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command as TokioCommand};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::LspCodec;
use super::{ServerChannel, SessionLauncher};
use crate::error::{ClientError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `stop` waits for the child to exit before killing it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const OUTGOING_QUEUE: usize = 64;
const METHOD_NOT_FOUND: i64 = -32601;
const INTERNAL_ERROR: i64 = -32603;

/// Everything needed to start one server process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub cwd: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cwd: None,
            workspace_root: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

type Pending = HashMap<i64, oneshot::Sender<Result<Value>>>;

/// State shared between the session and its reader/writer tasks.
#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
    closed: AtomicBool,
}

impl Shared {
    /// Mark the channel dead and fail every in-flight request.
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained = std::mem::take(&mut *self.pending.lock().await);
        if !drained.is_empty() {
            debug!("failing {} pending request(s) on closed channel", drained.len());
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(ClientError::ChannelClosed));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A running (or connected) language server.
pub struct ServerSession {
    outgoing: mpsc::Sender<Value>,
    shared: Arc<Shared>,
    next_id: AtomicI64,
    request_timeout: Duration,
    child: Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    stopping: AtomicBool,
}

impl ServerSession {
    /// Spawn the server process and wire its stdio into a session.
    ///
    /// The returned session has not been initialized yet; call
    /// [`ServerSession::initialize`].
    pub fn spawn(spec: &LaunchSpec) -> Result<Self> {
        info!("starting language server: {}", spec.program.display());
        let mut command = TokioCommand::new(&spec.program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| ClientError::Launch {
            path: spec.program.clone(),
            source,
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Handshake("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Handshake("failed to capture server stdout".into()))?;
        let stderr = child.stderr.take();

        let mut session = Self::connect(stdout, stdin, spec.request_timeout);
        if let Some(pid) = child.id() {
            debug!(pid, "language server process started");
        }
        session.child = Mutex::new(Some(child));
        if let Some(stderr) = stderr {
            session
                .tasks
                .get_mut()
                .push(tokio::spawn(forward_stderr(stderr)));
        }
        Ok(session)
    }

    /// Build a session over an arbitrary byte stream pair.
    pub fn connect<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE);
        let shared = Arc::new(Shared::default());
        let cancel = CancellationToken::new();

        let writer_task = tokio::spawn(write_loop(
            FramedWrite::new(writer, LspCodec::new()),
            outgoing_rx,
            shared.clone(),
            cancel.clone(),
        ));
        let reader_task = tokio::spawn(read_loop(
            FramedRead::new(reader, LspCodec::new()),
            shared.clone(),
            outgoing.clone(),
            cancel.clone(),
        ));

        Self {
            outgoing,
            shared,
            next_id: AtomicI64::new(1),
            request_timeout,
            child: Mutex::new(None),
            tasks: Mutex::new(vec![writer_task, reader_task]),
            cancel,
            stopping: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Send a request and wait for its response (or the request timeout).
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.shared.is_closed() {
            return Err(ClientError::ChannelClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);
        // The reader may have drained the table between the check and the insert.
        if self.shared.is_closed() {
            self.shared.pending.lock().await.remove(&id);
            return Err(ClientError::ChannelClosed);
        }

        debug!(id, method, "-> request");
        if self.outgoing.send(message(Some(id), method, params)).await.is_err() {
            self.shared.pending.lock().await.remove(&id);
            return Err(ClientError::ChannelClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ChannelClosed),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                warn!(id, method, "request timed out");
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    timeout: self.request_timeout,
                })
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        if self.shared.is_closed() {
            return Err(ClientError::ChannelClosed);
        }
        debug!(method, "-> notification");
        self.outgoing
            .send(message(None, method, params))
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// `initialize` request followed by the `initialized` notification.
    pub async fn initialize(&self, workspace_root: Option<&Path>) -> Result<InitializeResult> {
        let params = initialize_params(workspace_root);
        let raw = self
            .request(Initialize::METHOD, serde_json::to_value(params)?)
            .await
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| ClientError::Handshake(format!("invalid initialize result: {e}")))?;
        self.notify(Initialized::METHOD, serde_json::to_value(InitializedParams {})?)
            .await?;
        Ok(result)
    }

    /// `shutdown` + `exit`, then reap the child. Runs once; later calls return `Ok`.
    pub async fn stop(&self) -> Result<()> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = if self.shared.is_closed() {
            Ok(())
        } else {
            match self.request(Shutdown::METHOD, Value::Null).await {
                Ok(_) => {
                    if let Err(e) = self.notify(Exit::METHOD, Value::Null).await {
                        debug!("exit notification not delivered: {e}");
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        self.reap_child().await;
        // Queued messages still drain: the writer polls its queue before the token.
        self.cancel.cancel();
        self.tasks.lock().await.clear();
        self.shared.close().await;
        result
    }

    async fn reap_child(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!("language server exited with status {status}"),
            Ok(Err(e)) => warn!("language server wait error: {e}"),
            Err(_) => {
                warn!("language server did not exit within {SHUTDOWN_GRACE:?}; killing");
                if let Err(e) = child.kill().await {
                    warn!("failed to kill language server: {e}");
                }
            }
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl ServerChannel for ServerSession {
    async fn execute_command(&self, command: &str, arguments: Vec<Value>) -> Result<Value> {
        let params = ExecuteCommandParams {
            command: command.to_string(),
            arguments,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        self.request(ExecuteCommand::METHOD, serde_json::to_value(params)?)
            .await
    }

    async fn open_document(&self, document: TextDocumentItem) -> Result<()> {
        debug!(uri = %document.uri, version = document.version, "-> didOpen");
        let params = DidOpenTextDocumentParams {
            text_document: document,
        };
        self.notify(DidOpenTextDocument::METHOD, serde_json::to_value(params)?)
            .await
    }

    async fn close_document(&self, uri: &Url) -> Result<()> {
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier::new(uri.clone()),
        };
        self.notify(DidCloseTextDocument::METHOD, serde_json::to_value(params)?)
            .await
    }

    async fn shutdown(&self) -> Result<()> {
        self.stop().await
    }
}

/// Launches `lex-lsp` as a child process and performs the handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl SessionLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Arc<dyn ServerChannel>> {
        let session = ServerSession::spawn(spec)?;
        match session.initialize(spec.workspace_root.as_deref()).await {
            Ok(result) => {
                match result.server_info {
                    Some(info) => info!(
                        server = %info.name,
                        version = info.version.as_deref().unwrap_or("unknown"),
                        "language server initialized"
                    ),
                    None => info!("language server initialized"),
                }
                Ok(Arc::new(session))
            }
            Err(e) => {
                if let Err(stop_err) = session.stop().await {
                    debug!("cleanup after failed handshake: {stop_err}");
                }
                Err(e)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// I/O tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn write_loop<W>(
    mut sink: FramedWrite<W, LspCodec>,
    mut rx: mpsc::Receiver<Value>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            msg = rx.recv() => msg,
            _ = cancel.cancelled() => None,
        };
        let Some(msg) = msg else { break };
        if let Err(e) = sink.send(msg).await {
            warn!("write to language server failed: {e}");
            shared.close().await;
            break;
        }
    }
}

async fn read_loop<R>(
    mut stream: FramedRead<R, LspCodec>,
    shared: Arc<Shared>,
    outgoing: mpsc::Sender<Value>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(msg)) => dispatch(msg, &shared, &outgoing).await,
            Some(Err(e)) => {
                error!("language server stream error: {e}");
                break;
            }
            None => {
                warn!("language server stdout closed");
                break;
            }
        }
    }
    shared.close().await;
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "lex_lsp", "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!("language server stderr closed: {e}");
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message routing
// ─────────────────────────────────────────────────────────────────────────────

async fn dispatch(msg: Value, shared: &Shared, outgoing: &mpsc::Sender<Value>) {
    let method = msg.get("method").and_then(Value::as_str);
    let id = msg.get("id").filter(|id| !id.is_null()).cloned();
    match (method, id) {
        (Some(method), Some(id)) => {
            debug!(method, "<- server request");
            let reply = answer_server_request(method, msg.get("params"), id);
            if outgoing.send(reply).await.is_err() {
                debug!(method, "reply to server request dropped; channel closing");
            }
        }
        (Some(method), None) => handle_notification(method, msg.get("params")),
        (None, Some(id)) => complete_request(shared, &id, &msg).await,
        (None, None) => debug!("ignoring message without id or method"),
    }
}

async fn complete_request(shared: &Shared, id: &Value, msg: &Value) {
    let Some(id) = id.as_i64() else {
        warn!("response with unsupported id {id}");
        return;
    };
    let Some(tx) = shared.pending.lock().await.remove(&id) else {
        debug!(id, "response for unknown or expired request");
        return;
    };
    let outcome = match msg.get("error") {
        Some(err) => Err(ClientError::Server {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(INTERNAL_ERROR),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown server error")
                .to_string(),
        }),
        None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = tx.send(outcome);
}

/// Minimal answers for the requests `lex-lsp` may send to its client.
fn answer_server_request(method: &str, params: Option<&Value>, id: Value) -> Value {
    match method {
        "workspace/configuration" => {
            let items = params
                .and_then(|p| p.get("items"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            json!({"jsonrpc": "2.0", "id": id, "result": vec![Value::Null; items]})
        }
        "window/workDoneProgress/create"
        | "client/registerCapability"
        | "client/unregisterCapability" => {
            json!({"jsonrpc": "2.0", "id": id, "result": Value::Null})
        }
        "workspace/applyEdit" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"applied": false, "failureReason": "client does not apply server-initiated edits"}
        }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": METHOD_NOT_FOUND, "message": format!("method not found: {method}")}
        }),
    }
}

fn handle_notification(method: &str, params: Option<&Value>) {
    match method {
        "window/logMessage" | "window/showMessage" => {
            let text = params
                .and_then(|p| p.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            match params.and_then(|p| p.get("type")).and_then(Value::as_u64) {
                Some(1) => error!(target: "lex_lsp", "{text}"),
                Some(2) => warn!(target: "lex_lsp", "{text}"),
                Some(3) => info!(target: "lex_lsp", "{text}"),
                _ => debug!(target: "lex_lsp", "{text}"),
            }
        }
        _ => debug!(method, "<- notification"),
    }
}

fn message(id: Option<i64>, method: &str, params: Value) -> Value {
    let mut msg = json!({"jsonrpc": "2.0", "method": method});
    if let Some(id) = id {
        msg["id"] = json!(id);
    }
    if !params.is_null() {
        msg["params"] = params;
    }
    msg
}

#[allow(deprecated)]
fn initialize_params(workspace_root: Option<&Path>) -> InitializeParams {
    let root_uri = workspace_root.and_then(|root| Url::from_directory_path(root).ok());
    let workspace_folders = root_uri.as_ref().map(|uri| {
        let name = workspace_root
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        vec![WorkspaceFolder {
            uri: uri.clone(),
            name,
        }]
    });

    InitializeParams {
        process_id: Some(std::process::id()),
        root_uri,
        workspace_folders,
        client_info: Some(ClientInfo {
            name: crate::NAME.to_string(),
            version: Some(crate::VERSION.to_string()),
        }),
        capabilities: ClientCapabilities {
            workspace: Some(WorkspaceClientCapabilities {
                apply_edit: Some(false),
                workspace_edit: Some(WorkspaceEditClientCapabilities {
                    document_changes: Some(true),
                    ..Default::default()
                }),
                execute_command: Some(DynamicRegistrationClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                configuration: Some(true),
                workspace_folders: Some(true),
                ..Default::default()
            }),
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(TextDocumentSyncClientCapabilities {
                    dynamic_registration: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}
