//! Live HTML preview of Lex documents.
//!
//! One preview per document URI. Each preview owns a surface and a listener
//! task: the listener renders once on open, then re-renders after document
//! changes settle for the debounce window. Rendering goes through
//! `lex.export` with format `html`; failures are shown inline in the surface.

mod file_surface;
mod host;
mod template;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lsp_types::Url;
use tokio::sync::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{ExportRequest, export_document};
use crate::error::Result;
use crate::session::ServerHandle;

pub use file_surface::{FileDocuments, FileSurface, FileSurfaceHost};
pub use host::{
    DocumentEvent, DocumentEvents, DocumentSource, Placement, PreviewHost, PreviewSurface,
};
pub use template::{error_fragment, escape_html, preview_title, wrap_document};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new surface was created.
    Created,
    /// The document already had a preview; it was brought forward.
    Revealed,
}

struct PreviewEntry {
    surface: Arc<dyn PreviewSurface>,
    cancel: CancellationToken,
}

struct Inner {
    server: ServerHandle,
    host: Arc<dyn PreviewHost>,
    documents: Arc<dyn DocumentSource>,
    events: DocumentEvents,
    debounce: Duration,
    registry: Mutex<HashMap<Url, PreviewEntry>>,
}

/// Registry of open previews. Clones share the registry.
#[derive(Clone)]
pub struct PreviewManager {
    inner: Arc<Inner>,
}

impl PreviewManager {
    pub fn new(
        server: ServerHandle,
        host: Arc<dyn PreviewHost>,
        documents: Arc<dyn DocumentSource>,
        events: DocumentEvents,
    ) -> Self {
        Self::with_debounce(server, host, documents, events, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(
        server: ServerHandle,
        host: Arc<dyn PreviewHost>,
        documents: Arc<dyn DocumentSource>,
        events: DocumentEvents,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                server,
                host,
                documents,
                events,
                debounce,
                registry: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open a preview for `document`, or reveal the existing one.
    pub async fn open(&self, document: &Url, placement: Placement) -> Result<OpenOutcome> {
        let mut registry = self.inner.registry.lock().await;
        if let Some(entry) = registry.get(document) {
            debug!(%document, "preview already open");
            entry.surface.reveal();
            return Ok(OpenOutcome::Revealed);
        }

        let surface = self
            .inner
            .host
            .create_surface(&preview_title(document), placement)?;
        let cancel = CancellationToken::new();
        // Subscribe before releasing the lock so no change is missed.
        let events = self.inner.events.subscribe();
        registry.insert(
            document.clone(),
            PreviewEntry {
                surface: surface.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(registry);

        tokio::spawn(run_listener(
            self.inner.clone(),
            document.clone(),
            surface,
            events,
            cancel,
        ));
        info!(%document, "preview opened");
        Ok(OpenOutcome::Created)
    }

    /// Close the preview for `document`. Returns `false` if none was open.
    pub async fn close(&self, document: &Url) -> bool {
        let entry = self.inner.registry.lock().await.remove(document);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                info!(%document, "preview closed");
                true
            }
            None => false,
        }
    }

    /// Close every preview; returns how many were open.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.inner.registry.lock().await.drain().collect();
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        drained.len()
    }

    pub async fn is_open(&self, document: &Url) -> bool {
        self.inner.registry.lock().await.contains_key(document)
    }

    pub async fn open_count(&self) -> usize {
        self.inner.registry.lock().await.len()
    }
}

/// Render `text` into a complete preview document, never failing: errors
/// become an inline error block.
pub async fn render_preview(server: &ServerHandle, text: &str) -> String {
    match export_document(server, ExportRequest::new("html", text)).await {
        Ok(body) => wrap_document(&body),
        Err(e) => {
            warn!("preview render failed: {e}");
            wrap_document(&error_fragment(&e.to_string()))
        }
    }
}

async fn run_listener(
    inner: Arc<Inner>,
    mut document: Url,
    surface: Arc<dyn PreviewSurface>,
    mut events: broadcast::Receiver<DocumentEvent>,
    cancel: CancellationToken,
) {
    refresh(&inner, &document, surface.as_ref(), &cancel).await;

    let mut deadline: Option<Instant> = None;
    while !cancel.is_cancelled() {
        let timer = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(DocumentEvent::Changed(uri)) if uri == document => {
                    deadline = Some(Instant::now() + inner.debounce);
                }
                Ok(DocumentEvent::Renamed { from, to }) if from == document => {
                    surface.set_title(&preview_title(&to));
                    rekey(&inner, &from, &to).await;
                    document = to;
                }
                Ok(DocumentEvent::Closed(uri)) if uri == document => {
                    deadline = None;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%document, skipped, "preview listener lagged; scheduling refresh");
                    deadline = Some(Instant::now() + inner.debounce);
                }
                Err(RecvError::Closed) => break,
            },
            _ = timer => {
                deadline = None;
                refresh(&inner, &document, surface.as_ref(), &cancel).await;
            }
        }
    }
    debug!(%document, "preview listener stopped");
}

async fn refresh(
    inner: &Inner,
    document: &Url,
    surface: &dyn PreviewSurface,
    cancel: &CancellationToken,
) {
    let Some(text) = inner.documents.text(document).await else {
        debug!(%document, "document unavailable; skipping render");
        return;
    };
    let html = render_preview(&inner.server, &text).await;
    if cancel.is_cancelled() {
        debug!(%document, "discarding render for closed preview");
        return;
    }
    surface.set_content(&html);
}

async fn rekey(inner: &Inner, from: &Url, to: &Url) {
    let mut registry = inner.registry.lock().await;
    if let Some(entry) = registry.remove(from) {
        if let Some(displaced) = registry.insert(to.clone(), entry) {
            displaced.cancel.cancel();
        }
        info!(%from, %to, "preview follows renamed document");
    }
}
