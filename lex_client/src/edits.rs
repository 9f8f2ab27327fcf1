//! Applying server-produced `WorkspaceEdit`s to files on disk.
//!
//! Positions are LSP positions (zero-based line, UTF-16 code unit column).
//! All affected files are read and edited in memory first, then every new
//! content is written to a temp file beside its target. Targets are replaced
//! by rename only once all temp files exist, so a failed edit or a failed
//! write leaves every source untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lsp_types::{
    DocumentChangeOperation, DocumentChanges, OneOf, Position, TextDocumentEdit, TextEdit, Url,
    WorkspaceEdit,
};
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Apply `edit` and return the files that changed.
pub async fn apply_workspace_edit(edit: &WorkspaceEdit) -> Result<Vec<PathBuf>> {
    let grouped = collect_text_edits(edit)?;

    let mut staged = Vec::with_capacity(grouped.len());
    for (path, edits) in grouped {
        let original = tokio::fs::read_to_string(&path).await?;
        let updated = apply_text_edits(&original, &edits)
            .map_err(|e| ClientError::Edit(format!("{}: {e}", path.display())))?;
        staged.push((path, updated));
    }

    let mut written: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (path, content) in &staged {
        let tmp = temp_path(path);
        if let Err(e) = tokio::fs::write(&tmp, content).await {
            discard_temp_files(&written).await;
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ClientError::Edit(format!("{}: {e}", path.display())));
        }
        written.push(tmp);
    }

    for (index, ((path, _), tmp)) in staged.iter().zip(&written).enumerate() {
        if let Err(e) = tokio::fs::rename(tmp, path).await {
            discard_temp_files(&written[index..]).await;
            return Err(ClientError::Edit(format!("{}: {e}", path.display())));
        }
        debug!("applied edits to {}", path.display());
    }
    info!("workspace edit touched {} file(s)", staged.len());
    Ok(staged.into_iter().map(|(path, _)| path).collect())
}

/// Apply `edits` to `text`. Edits may arrive in any order but must not overlap.
pub fn apply_text_edits(text: &str, edits: &[TextEdit]) -> Result<String> {
    let mut spans = edits
        .iter()
        .map(|edit| {
            let start = offset_at(text, edit.range.start)?;
            let end = offset_at(text, edit.range.end)?;
            if end < start {
                return Err(ClientError::Edit(format!(
                    "range end precedes start at line {}",
                    edit.range.start.line
                )));
            }
            Ok((start, end, edit.new_text.as_str()))
        })
        .collect::<Result<Vec<_>>>()?;

    // Stable sort keeps same-position inserts in their original order.
    spans.sort_by_key(|&(start, end, _)| (start, end));
    if spans.windows(2).any(|pair| pair[1].0 < pair[0].1) {
        return Err(ClientError::Edit("overlapping text edits".into()));
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, new_text) in spans {
        out.push_str(&text[cursor..start]);
        out.push_str(new_text);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

/// Byte offset of an LSP position. Columns past the end of a line clamp to
/// the line end; lines past the end of the text are an error.
pub fn offset_at(text: &str, position: Position) -> Result<usize> {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(idx) => line_start += idx + 1,
            None => {
                return Err(ClientError::Edit(format!(
                    "line {} is past the end of the document",
                    position.line
                )));
            }
        }
    }

    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |idx| line_start + idx);
    let line = text[line_start..line_end]
        .strip_suffix('\r')
        .unwrap_or(&text[line_start..line_end]);

    let mut units = 0u32;
    for (idx, ch) in line.char_indices() {
        if units >= position.character {
            return Ok(line_start + idx);
        }
        units += ch.len_utf16() as u32;
    }
    Ok(line_start + line.len())
}

fn collect_text_edits(edit: &WorkspaceEdit) -> Result<BTreeMap<PathBuf, Vec<TextEdit>>> {
    let mut grouped: BTreeMap<PathBuf, Vec<TextEdit>> = BTreeMap::new();

    if let Some(changes) = &edit.changes {
        for (uri, edits) in changes {
            grouped
                .entry(uri_to_path(uri)?)
                .or_default()
                .extend(edits.iter().cloned());
        }
    }

    match &edit.document_changes {
        None => {}
        Some(DocumentChanges::Edits(edits)) => {
            for doc_edit in edits {
                push_document_edit(&mut grouped, doc_edit)?;
            }
        }
        Some(DocumentChanges::Operations(ops)) => {
            for op in ops {
                match op {
                    DocumentChangeOperation::Edit(doc_edit) => {
                        push_document_edit(&mut grouped, doc_edit)?
                    }
                    DocumentChangeOperation::Op(_) => {
                        return Err(ClientError::Edit(
                            "file create/rename/delete operations are not supported".into(),
                        ));
                    }
                }
            }
        }
    }
    Ok(grouped)
}

fn push_document_edit(
    grouped: &mut BTreeMap<PathBuf, Vec<TextEdit>>,
    doc_edit: &TextDocumentEdit,
) -> Result<()> {
    let entry = grouped
        .entry(uri_to_path(&doc_edit.text_document.uri)?)
        .or_default();
    for edit in &doc_edit.edits {
        match edit {
            OneOf::Left(plain) => entry.push(plain.clone()),
            OneOf::Right(annotated) => entry.push(annotated.text_edit.clone()),
        }
    }
    Ok(())
}

fn uri_to_path(uri: &Url) -> Result<PathBuf> {
    uri.to_file_path()
        .map_err(|_| ClientError::Edit(format!("unsupported document URI: {uri}")))
}

/// Write via a sibling temp file and rename so readers never see a partial file.
pub(crate) async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!(".{file_name}.lex-client.tmp"))
}

async fn discard_temp_files(temps: &[PathBuf]) {
    for tmp in temps {
        if let Err(e) = tokio::fs::remove_file(tmp).await {
            debug!("could not remove {}: {e}", tmp.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use lsp_types::{
        AnnotatedTextEdit, OptionalVersionedTextDocumentIdentifier, Range, RenameFile,
        ResourceOp,
    };
    use tempfile::tempdir;

    use super::*;

    fn edit(start: (u32, u32), end: (u32, u32), text: &str) -> TextEdit {
        TextEdit::new(
            Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1)),
            text.to_string(),
        )
    }

    #[test]
    fn replaces_a_range() {
        let text = "Title\n\n    Body text\n";
        let out = apply_text_edits(text, &[edit((2, 4), (2, 8), "Main")]).expect("apply");
        assert_eq!(out, "Title\n\n    Main text\n");
    }

    #[test]
    fn applies_unsorted_edits_against_original_positions() {
        let text = "one two three";
        let edits = [edit((0, 8), (0, 13), "3"), edit((0, 0), (0, 3), "1")];
        assert_eq!(apply_text_edits(text, &edits).expect("apply"), "1 two 3");
    }

    #[test]
    fn same_position_inserts_keep_order() {
        let edits = [edit((0, 1), (0, 1), "x"), edit((0, 1), (0, 1), "y")];
        assert_eq!(apply_text_edits("ab", &edits).expect("apply"), "axyb");
    }

    #[test]
    fn columns_count_utf16_units() {
        // The emoji is two UTF-16 units and four UTF-8 bytes.
        let text = "a\u{1F600}b";
        assert_eq!(offset_at(text, Position::new(0, 3)).expect("offset"), 5);
        let out = apply_text_edits(text, &[edit((0, 3), (0, 4), "c")]).expect("apply");
        assert_eq!(out, "a\u{1F600}c");
    }

    #[test]
    fn columns_past_line_end_clamp_before_crlf() {
        let text = "ab\r\ncd";
        assert_eq!(offset_at(text, Position::new(0, 99)).expect("offset"), 2);
        assert_eq!(offset_at(text, Position::new(1, 1)).expect("offset"), 5);
    }

    #[test]
    fn rejects_lines_past_the_end_and_overlaps() {
        assert!(offset_at("one line", Position::new(3, 0)).is_err());
        let overlapping = [edit((0, 0), (0, 4), "x"), edit((0, 2), (0, 6), "y")];
        let err = apply_text_edits("abcdefgh", &overlapping).expect_err("overlap");
        assert!(err.to_string().contains("overlapping"));
    }

    #[tokio::test]
    async fn applies_changes_map_to_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("doc.lex");
        tokio::fs::write(&path, "Intro\n:: note :: pending\n")
            .await
            .expect("seed");
        let uri = Url::from_file_path(&path).expect("uri");

        let workspace_edit = WorkspaceEdit {
            changes: Some(HashMap::from([(uri, vec![edit((1, 11), (1, 18), "done")])])),
            ..Default::default()
        };
        let touched = apply_workspace_edit(&workspace_edit).await.expect("apply");
        assert_eq!(touched, vec![path.clone()]);
        let content = tokio::fs::read_to_string(&path).await.expect("read");
        assert_eq!(content, "Intro\n:: note :: done\n");
    }

    #[tokio::test]
    async fn applies_document_changes_with_annotated_edits() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("doc.lex");
        tokio::fs::write(&path, "abc").await.expect("seed");
        let uri = Url::from_file_path(&path).expect("uri");

        let workspace_edit = WorkspaceEdit {
            document_changes: Some(DocumentChanges::Edits(vec![TextDocumentEdit {
                text_document: OptionalVersionedTextDocumentIdentifier { uri, version: None },
                edits: vec![
                    OneOf::Left(edit((0, 0), (0, 1), "A")),
                    OneOf::Right(AnnotatedTextEdit {
                        text_edit: edit((0, 2), (0, 3), "C"),
                        annotation_id: "resolve".into(),
                    }),
                ],
            }])),
            ..Default::default()
        };
        apply_workspace_edit(&workspace_edit).await.expect("apply");
        assert_eq!(tokio::fs::read_to_string(&path).await.expect("read"), "AbC");
    }

    #[tokio::test]
    async fn failing_edit_leaves_every_file_untouched() {
        let dir = tempdir().expect("tempdir");
        let good = dir.path().join("a.lex");
        let bad = dir.path().join("b.lex");
        tokio::fs::write(&good, "first").await.expect("seed a");
        tokio::fs::write(&bad, "second").await.expect("seed b");

        let workspace_edit = WorkspaceEdit {
            changes: Some(HashMap::from([
                (
                    Url::from_file_path(&good).expect("uri"),
                    vec![edit((0, 0), (0, 5), "FIRST")],
                ),
                (
                    Url::from_file_path(&bad).expect("uri"),
                    vec![edit((9, 0), (9, 1), "x")],
                ),
            ])),
            ..Default::default()
        };
        assert!(apply_workspace_edit(&workspace_edit).await.is_err());
        assert_eq!(tokio::fs::read_to_string(&good).await.expect("read"), "first");
        assert_eq!(tokio::fs::read_to_string(&bad).await.expect("read"), "second");
    }

    #[tokio::test]
    async fn failed_write_leaves_earlier_files_untouched() {
        let dir = tempdir().expect("tempdir");
        let first = dir.path().join("a.lex");
        let second = dir.path().join("b.lex");
        tokio::fs::write(&first, "first").await.expect("seed a");
        tokio::fs::write(&second, "second").await.expect("seed b");
        // A directory where b.lex's temp file belongs makes its write fail.
        tokio::fs::create_dir(temp_path(&second))
            .await
            .expect("block temp path");

        let workspace_edit = WorkspaceEdit {
            changes: Some(HashMap::from([
                (
                    Url::from_file_path(&first).expect("uri"),
                    vec![edit((0, 0), (0, 5), "FIRST")],
                ),
                (
                    Url::from_file_path(&second).expect("uri"),
                    vec![edit((0, 0), (0, 6), "SECOND")],
                ),
            ])),
            ..Default::default()
        };
        let err = apply_workspace_edit(&workspace_edit)
            .await
            .expect_err("second write fails");
        assert!(matches!(err, ClientError::Edit(_)), "{err:?}");

        assert_eq!(tokio::fs::read_to_string(&first).await.expect("a"), "first");
        assert_eq!(tokio::fs::read_to_string(&second).await.expect("b"), "second");
        assert!(!temp_path(&first).exists());
    }

    #[tokio::test]
    async fn resource_operations_are_rejected() {
        let workspace_edit = WorkspaceEdit {
            document_changes: Some(DocumentChanges::Operations(vec![
                DocumentChangeOperation::Op(ResourceOp::Rename(RenameFile {
                    old_uri: Url::parse("file:///a.lex").expect("uri"),
                    new_uri: Url::parse("file:///b.lex").expect("uri"),
                    options: None,
                    annotation_id: None,
                })),
            ])),
            ..Default::default()
        };
        let err = apply_workspace_edit(&workspace_edit)
            .await
            .expect_err("resource op");
        assert!(err.to_string().contains("not supported"));
    }

    #[tokio::test]
    async fn non_file_uris_are_rejected() {
        let workspace_edit = WorkspaceEdit {
            changes: Some(HashMap::from([(
                Url::parse("untitled:Untitled-1").expect("uri"),
                vec![edit((0, 0), (0, 0), "x")],
            )])),
            ..Default::default()
        };
        assert!(apply_workspace_edit(&workspace_edit).await.is_err());
    }
}
