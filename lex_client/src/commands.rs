//! Document commands brokered to the server via `workspace/executeCommand`.
//!
//! | Command                  | Arguments                                      | Result              |
//! |--------------------------|------------------------------------------------|---------------------|
//! | `lex.export`             | format, content, source URI?, output path?     | string              |
//! | `lex.import`             | format, content                                | string (Lex text)   |
//! | `lex.next_annotation`    | document URI, position                         | `Location` or null  |
//! | `lex.previous_annotation`| document URI, position                         | `Location` or null  |
//! | `lex.resolve_annotation` | document URI, position                         | `WorkspaceEdit`/null|
//! | `lex.toggle_annotations` | document URI, position                         | `WorkspaceEdit`/null|
//!
//! All of them wait on the readiness gate through [`ServerHandle`]. The
//! annotation commands operate on the server's open-document store, so the
//! document is opened with `textDocument/didOpen` for the duration of the
//! command and closed again afterwards.

use std::path::Path;

use lsp_types::{Location, Position, TextDocumentItem, Url, WorkspaceEdit};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::session::ServerHandle;

pub const COMMAND_EXPORT: &str = "lex.export";
pub const COMMAND_IMPORT: &str = "lex.import";
pub const COMMAND_NEXT_ANNOTATION: &str = "lex.next_annotation";
pub const COMMAND_PREVIOUS_ANNOTATION: &str = "lex.previous_annotation";
pub const COMMAND_RESOLVE_ANNOTATION: &str = "lex.resolve_annotation";
pub const COMMAND_TOGGLE_ANNOTATIONS: &str = "lex.toggle_annotations";

pub const LEX_LANGUAGE_ID: &str = "lex";

pub const EXPORT_UNEXPECTED: &str = "Export failed: unexpected response from language server.";
pub const IMPORT_UNEXPECTED: &str = "Import failed: unexpected response from language server.";

/// What kind of document a path holds, judged by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Lex,
    Markdown,
    Other,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("lex") => Self::Lex,
            Some("md" | "markdown") => Self::Markdown,
            _ => Self::Other,
        }
    }

    pub fn language_id(self) -> Option<&'static str> {
        match self {
            Self::Lex => Some(LEX_LANGUAGE_ID),
            Self::Markdown => Some("markdown"),
            Self::Other => None,
        }
    }
}

/// A Lex document as handed to the server on open.
pub fn lex_document(uri: Url, text: impl Into<String>) -> TextDocumentItem {
    TextDocumentItem::new(uri, LEX_LANGUAGE_ID.to_string(), 1, text.into())
}

/// `InvalidInput(message)` unless `path` is of the `expected` kind.
pub fn ensure_document_kind(path: &Path, expected: DocumentKind, message: &str) -> Result<()> {
    if DocumentKind::from_path(path) == expected {
        Ok(())
    } else {
        Err(ClientError::InvalidInput(message.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub format: &'a str,
    pub content: &'a str,
    pub source_uri: Option<&'a Url>,
    /// Where the server should write binary formats (PDF, PNG).
    pub output_path: Option<&'a Path>,
}

impl<'a> ExportRequest<'a> {
    pub fn new(format: &'a str, content: &'a str) -> Self {
        Self {
            format,
            content,
            source_uri: None,
            output_path: None,
        }
    }

    fn arguments(&self) -> Vec<Value> {
        let mut arguments = vec![json!(self.format), json!(self.content)];
        if self.source_uri.is_some() || self.output_path.is_some() {
            arguments.push(self.source_uri.map_or(Value::Null, |uri| json!(uri.as_str())));
        }
        if let Some(output) = self.output_path {
            arguments.push(json!(output.to_string_lossy()));
        }
        arguments
    }
}

/// Convert Lex content to `format`. For file-based formats the server
/// returns the written path.
pub async fn export_document(server: &ServerHandle, request: ExportRequest<'_>) -> Result<String> {
    let result = server
        .execute_command(COMMAND_EXPORT, request.arguments())
        .await?;
    expect_string(result, EXPORT_UNEXPECTED)
}

/// Convert `content` in `format` (currently `markdown`) to Lex.
pub async fn import_document(server: &ServerHandle, format: &str, content: &str) -> Result<String> {
    let result = server
        .execute_command(COMMAND_IMPORT, vec![json!(format), json!(content)])
        .await?;
    expect_string(result, IMPORT_UNEXPECTED)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationDirection {
    Next,
    Previous,
}

impl AnnotationDirection {
    pub fn command(self) -> &'static str {
        match self {
            Self::Next => COMMAND_NEXT_ANNOTATION,
            Self::Previous => COMMAND_PREVIOUS_ANNOTATION,
        }
    }
}

/// Location of the neighbouring annotation, or `None` when there is none.
pub async fn navigate_annotation(
    server: &ServerHandle,
    document: &TextDocumentItem,
    position: Position,
    direction: AnnotationDirection,
) -> Result<Option<Location>> {
    let result = execute_on_document(server, document, direction.command(), position).await?;
    decode_optional(result, "Language server returned an invalid annotation location.")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationEdit {
    Resolve,
    Toggle,
}

impl AnnotationEdit {
    pub fn command(self) -> &'static str {
        match self {
            Self::Resolve => COMMAND_RESOLVE_ANNOTATION,
            Self::Toggle => COMMAND_TOGGLE_ANNOTATIONS,
        }
    }
}

/// Ask the server for the edit; applying it is up to the caller
/// (see [`crate::edits::apply_workspace_edit`]).
pub async fn annotation_edit(
    server: &ServerHandle,
    document: &TextDocumentItem,
    position: Position,
    kind: AnnotationEdit,
) -> Result<Option<WorkspaceEdit>> {
    let result = execute_on_document(server, document, kind.command(), position).await?;
    decode_optional(result, "Language server returned an invalid workspace edit.")
}

/// Run a `[uri, position]` command with `document` open on the server.
async fn execute_on_document(
    server: &ServerHandle,
    document: &TextDocumentItem,
    command: &str,
    position: Position,
) -> Result<Value> {
    let arguments = vec![json!(document.uri.as_str()), serde_json::to_value(position)?];
    let channel = server.ready_channel().await?;
    channel.open_document(document.clone()).await?;
    let result = channel.execute_command(command, arguments).await;
    if let Err(e) = channel.close_document(&document.uri).await {
        debug!(uri = %document.uri, "didClose not delivered: {e}");
    }
    result
}

fn expect_string(value: Value, message: &str) -> Result<String> {
    match value {
        Value::String(text) => Ok(text),
        other => {
            debug!("expected a string result, got {other}");
            Err(ClientError::unexpected(message))
        }
    }
}

fn decode_optional<T: DeserializeOwned>(value: Value, message: &str) -> Result<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some).map_err(|e| {
        debug!("undecodable command result: {e}");
        ClientError::unexpected(message)
    })
}
