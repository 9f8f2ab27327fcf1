//! Filesystem-backed preview host: each surface is an HTML file kept current
//! by a background writer, and documents are read straight from disk.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::Url;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::host::{DocumentSource, Placement, PreviewHost, PreviewSurface};
use crate::edits::write_atomic;
use crate::error::Result;

/// Writes every surface's content to `output`.
#[derive(Debug, Clone)]
pub struct FileSurfaceHost {
    output: PathBuf,
}

impl FileSurfaceHost {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

impl PreviewHost for FileSurfaceHost {
    fn create_surface(&self, title: &str, placement: Placement) -> Result<Arc<dyn PreviewSurface>> {
        debug!(?placement, "creating file surface {}", self.output.display());
        Ok(Arc::new(FileSurface::spawn(self.output.clone(), title)))
    }
}

pub struct FileSurface {
    path: PathBuf,
    content: watch::Sender<String>,
    title: std::sync::Mutex<String>,
}

impl FileSurface {
    /// Start the writer task. It ends when the surface is dropped.
    pub fn spawn(path: PathBuf, title: &str) -> Self {
        let (content, rx) = watch::channel(String::new());
        tokio::spawn(write_on_change(rx, path.clone()));
        Self {
            path,
            content,
            title: std::sync::Mutex::new(title.to_string()),
        }
    }

    pub fn title(&self) -> String {
        self.title
            .lock()
            .map(|title| title.clone())
            .unwrap_or_default()
    }
}

impl PreviewSurface for FileSurface {
    fn set_content(&self, html: &str) {
        self.content.send_replace(html.to_string());
    }

    fn set_title(&self, title: &str) {
        if let Ok(mut current) = self.title.lock() {
            *current = title.to_string();
        }
        info!("{title} -> {}", self.path.display());
    }

    fn reveal(&self) {
        info!("{} -> {}", self.title(), self.path.display());
    }
}

async fn write_on_change(mut rx: watch::Receiver<String>, path: PathBuf) {
    while rx.changed().await.is_ok() {
        let html = rx.borrow_and_update().clone();
        if let Err(e) = write_atomic(&path, &html).await {
            warn!("failed to write preview {}: {e}", path.display());
        }
    }
    debug!("preview writer for {} stopped", path.display());
}

/// Reads documents from disk. Only `file:` URIs resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDocuments;

#[async_trait]
impl DocumentSource for FileDocuments {
    async fn text(&self, document: &Url) -> Option<String> {
        let path = document.to_file_path().ok()?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("cannot read {}: {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn surface_writes_latest_content() {
        let dir = tempdir().expect("tempdir");
        let out = dir.path().join("preview.html");
        let host = FileSurfaceHost::new(&out);

        let surface = host
            .create_surface("Preview: a.lex", Placement::Beside)
            .expect("surface");
        surface.set_content("<p>one</p>");
        surface.set_content("<p>two</p>");

        let mut written = String::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            written = tokio::fs::read_to_string(&out).await.unwrap_or_default();
            if written == "<p>two</p>" {
                break;
            }
        }
        assert_eq!(written, "<p>two</p>");
    }

    #[tokio::test]
    async fn set_title_is_tracked() {
        let dir = tempdir().expect("tempdir");
        let surface = FileSurface::spawn(dir.path().join("p.html"), "Preview: a.lex");
        surface.set_title("Preview: b.lex");
        assert_eq!(surface.title(), "Preview: b.lex");
    }

    #[tokio::test]
    async fn file_documents_read_from_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("doc.lex");
        tokio::fs::write(&path, "Title\n").await.expect("seed");

        let uri = Url::from_file_path(&path).expect("uri");
        assert_eq!(FileDocuments.text(&uri).await.as_deref(), Some("Title\n"));

        let missing = Url::from_file_path(dir.path().join("gone.lex")).expect("uri");
        assert!(FileDocuments.text(&missing).await.is_none());

        let remote = Url::parse("https://example.com/doc.lex").expect("uri");
        assert!(FileDocuments.text(&remote).await.is_none());
    }
}
