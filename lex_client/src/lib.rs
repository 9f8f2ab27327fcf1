//! # lex_client - Lex language-server client
//!
//! Client-side half of the Lex editor integration. The crate does not understand
//! Lex documents itself; it finds the `lex-lsp` executable, launches it, brokers
//! commands to it over LSP and renders what comes back.
//!
//! ## Components
//!
//! - **Binary resolution** ([`resolver`]): pure cascade choosing which server
//!   executable to launch (override, development workspace, configuration, bundled)
//! - **Readiness gate** ([`gate`]): one-shot latch every server-dependent
//!   operation awaits before touching the session
//! - **Server session** ([`session`]): child process, `Content-Length` framed
//!   JSON-RPC channel, request correlation and the LSP handshake
//! - **Activation lifecycle** ([`lifecycle`]): resolve -> launch -> ready -> stop
//! - **Live preview** ([`preview`]): debounced per-document HTML rendering into
//!   host-provided surfaces
//! - **Commands** ([`commands`], [`edits`]): export, import, annotation
//!   navigation and annotation edits
//!
//! ## Usage as Library
//!
//! ```rust,no_run
//! use lex_client::{ActivationOptions, LexClient};
//! use lex_client::commands::import_document;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let client = LexClient::new();
//!     client
//!         .activate_default(ActivationOptions::new("/opt/lex-client"))
//!         .await?;
//!
//!     let lex = import_document(&client.server(), "markdown", "# Title").await?;
//!     println!("{lex}");
//!
//!     client.deactivate().await;
//!     Ok(())
//! }
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Public modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod commands;
pub mod config;
pub mod edits;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod preview;
pub mod resolver;
pub mod session;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_support;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports for convenience
// ─────────────────────────────────────────────────────────────────────────────

pub use error::{ClientError, Result};
pub use gate::ReadinessGate;
pub use lifecycle::{ActivationOptions, LexClient, LifecycleState};
pub use preview::{DocumentEvent, DocumentEvents, OpenOutcome, Placement, PreviewManager};
pub use resolver::{Platform, ResolutionOutcome, ResolutionSource, ResolveInputs, resolve_binary};
pub use session::{ServerChannel, ServerHandle, ServerSession};

// ─────────────────────────────────────────────────────────────────────────────
// Version info
// ─────────────────────────────────────────────────────────────────────────────

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
