//! Activation lifecycle: resolve the binary, launch the server, open the gate.
//!
//! ```text
//! NotStarted -> Resolving -> Skipped
//!                         -> BinaryMissing
//!                         -> Starting -> Running -> Stopped
//!                                     -> Failed
//! ```
//!
//! Every terminal outcome of [`LexClient::activate`] signals the readiness
//! gate, so commands waiting on it are released and then see either a session
//! or `ServerNotRunning`. Each transition only applies from its expected prior
//! state, so `Stopped` published by [`LexClient::deactivate`] is final.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::gate::ReadinessGate;
use crate::resolver::{Platform, ResolutionOutcome, ResolveInputs, resolve_binary};
use crate::session::{
    DEFAULT_REQUEST_TIMEOUT, LaunchSpec, ProcessLauncher, ServerHandle, SessionLauncher,
};

/// Set to `1` to resolve the binary but never launch it.
pub const ENV_SKIP_SERVER: &str = "LEX_SKIP_SERVER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Resolving,
    Skipped,
    BinaryMissing,
    Starting,
    Running,
    Failed(String),
    Stopped,
}

impl LifecycleState {
    /// True once activation reached an outcome.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::NotStarted | Self::Resolving | Self::Starting)
    }
}

/// Inputs to one activation.
#[derive(Debug, Clone)]
pub struct ActivationOptions {
    pub install_dir: PathBuf,
    pub configured_path: Option<String>,
    pub platform: Platform,
    pub env: HashMap<String, String>,
    pub skip_server: bool,
    pub workspace_root: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl ActivationOptions {
    /// Options for the running platform with a snapshot of the process
    /// environment.
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            configured_path: None,
            platform: Platform::current(),
            env: std::env::vars().collect(),
            skip_server: false,
            workspace_root: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_configured_path(mut self, path: impl Into<String>) -> Self {
        self.configured_path = Some(path.into());
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_skip_server(mut self, skip: bool) -> Self {
        self.skip_server = skip;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Explicit flag or `LEX_SKIP_SERVER=1` in the captured environment.
    pub fn skip_requested(&self) -> bool {
        self.skip_server || self.env.get(ENV_SKIP_SERVER).map(String::as_str) == Some("1")
    }

    pub fn resolve_inputs(&self) -> ResolveInputs<'_> {
        ResolveInputs {
            install_dir: &self.install_dir,
            configured_path: self.configured_path.as_deref(),
            platform: self.platform,
            env: &self.env,
        }
    }
}

/// Owns the server handle and drives activation/deactivation.
pub struct LexClient {
    server: ServerHandle,
    state: watch::Sender<LifecycleState>,
    resolution: Mutex<Option<ResolutionOutcome>>,
    /// Serializes session installation against deactivation.
    transition: Mutex<()>,
}

impl LexClient {
    pub fn new() -> Self {
        let (state, _rx) = watch::channel(LifecycleState::NotStarted);
        Self {
            server: ServerHandle::new(),
            state,
            resolution: Mutex::new(None),
            transition: Mutex::new(()),
        }
    }

    pub fn server(&self) -> ServerHandle {
        self.server.clone()
    }

    pub fn gate(&self) -> &ReadinessGate {
        self.server.gate()
    }

    pub fn state(&self) -> LifecycleState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Outcome of the last binary resolution, if activation got that far.
    pub async fn resolution(&self) -> Option<ResolutionOutcome> {
        self.resolution.lock().await.clone()
    }

    /// Activate against the real filesystem and a real child process.
    pub async fn activate_default(&self, options: ActivationOptions) -> Result<LifecycleState> {
        self.activate(options, |path: &Path| path.exists(), &ProcessLauncher)
            .await
    }

    /// Run activation once.
    ///
    /// Skipped and missing-binary outcomes are `Ok`; a launch or handshake
    /// failure is returned as `Err` after the state moved to `Failed`. Either
    /// way the gate is open when this returns.
    pub async fn activate(
        &self,
        options: ActivationOptions,
        exists: impl Fn(&Path) -> bool,
        launcher: &dyn SessionLauncher,
    ) -> Result<LifecycleState> {
        if !self.advance(&LifecycleState::NotStarted, LifecycleState::Resolving) {
            return Err(ClientError::AlreadyActivated);
        }

        let outcome = resolve_binary(options.resolve_inputs(), &exists);
        if let Some(warning) = &outcome.warning {
            warn!("{warning}");
        }
        info!(
            path = %outcome.path.display(),
            source = ?outcome.source,
            "resolved Lex language server binary"
        );
        let binary = outcome.path.clone();
        *self.resolution.lock().await = Some(outcome);

        if options.skip_requested() {
            info!("Skipping Lex language server startup ({ENV_SKIP_SERVER}=1).");
            return Ok(self.settle(&LifecycleState::Resolving, LifecycleState::Skipped));
        }

        if !exists(&binary) {
            warn!(
                "Lex language server binary not found at {}. Language features are disabled.",
                binary.display()
            );
            return Ok(self.settle(&LifecycleState::Resolving, LifecycleState::BinaryMissing));
        }

        if !self.advance(&LifecycleState::Resolving, LifecycleState::Starting) {
            debug!("deactivated before launch; not starting the server");
            return Ok(self.state());
        }
        let spec = LaunchSpec {
            program: binary,
            cwd: options.workspace_root.clone(),
            workspace_root: options.workspace_root,
            request_timeout: options.request_timeout,
        };

        match launcher.launch(&spec).await {
            Ok(channel) => {
                let guard = self.transition.lock().await;
                if self.advance(&LifecycleState::Starting, LifecycleState::Running) {
                    self.server.install(channel).await;
                    drop(guard);
                    self.server.gate().signal_ready();
                    info!("Lex language server is running");
                    return Ok(LifecycleState::Running);
                }
                drop(guard);

                debug!("deactivated while the launch was in flight; stopping new session");
                if let Err(e) = channel.shutdown().await {
                    warn!("language server shutdown failed: {e}");
                }
                self.server.gate().signal_ready();
                Ok(self.state())
            }
            Err(e) => {
                error!("failed to start Lex language server: {e}");
                self.settle(
                    &LifecycleState::Starting,
                    LifecycleState::Failed(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Stop the server if one is running. Safe to call in any state and more
    /// than once.
    pub async fn deactivate(&self) {
        let session = {
            let _guard = self.transition.lock().await;
            self.state.send_replace(LifecycleState::Stopped);
            self.server.take().await
        };
        self.server.gate().signal_ready();
        if let Some(channel) = session {
            info!("stopping Lex language server");
            if let Err(e) = channel.shutdown().await {
                warn!("language server shutdown failed: {e}");
            }
        }
    }

    /// Apply `from -> to` only if the state is still `from`.
    fn advance(&self, from: &LifecycleState, to: LifecycleState) -> bool {
        self.state.send_if_modified(|state| {
            if state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Final transition of an activation: move on if still `from`, open the
    /// gate, and report where the state ended up.
    fn settle(&self, from: &LifecycleState, to: LifecycleState) -> LifecycleState {
        self.advance(from, to);
        self.server.gate().signal_ready();
        self.state()
    }
}

impl Default for LexClient {
    fn default() -> Self {
        Self::new()
    }
}
