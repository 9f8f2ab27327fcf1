//! Seams between the preview manager and whatever hosts it: where document
//! text comes from, how document changes are announced and where rendered
//! HTML is shown.

use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::Url;
use tokio::sync::broadcast;

use crate::error::Result;

const EVENT_CAPACITY: usize = 256;

/// Something happened to an open document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// Content changed (edit, save, external write).
    Changed(Url),
    Renamed { from: Url, to: Url },
    Closed(Url),
}

impl DocumentEvent {
    pub fn concerns(&self, document: &Url) -> bool {
        match self {
            Self::Changed(uri) | Self::Closed(uri) => uri == document,
            Self::Renamed { from, .. } => from == document,
        }
    }
}

/// Broadcast bus for [`DocumentEvent`]s. Every preview subscribes once.
#[derive(Debug, Clone)]
pub struct DocumentEvents {
    tx: broadcast::Sender<DocumentEvent>,
}

impl DocumentEvents {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: DocumentEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.tx.subscribe()
    }
}

impl Default for DocumentEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Current text of a document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// `None` when the document is gone.
    async fn text(&self, document: &Url) -> Option<String>;
}

/// Where a new preview goes relative to the editor that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Replace the active view.
    Active,
    /// Next to the active view.
    #[default]
    Beside,
}

/// One display surface owned by a preview.
pub trait PreviewSurface: Send + Sync {
    fn set_content(&self, html: &str);
    fn set_title(&self, title: &str);
    /// Bring an existing surface to the front.
    fn reveal(&self);
}

/// Creates surfaces.
pub trait PreviewHost: Send + Sync {
    fn create_surface(&self, title: &str, placement: Placement) -> Result<Arc<dyn PreviewSurface>>;
}
