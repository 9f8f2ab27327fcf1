//! lex-client CLI binary
//!
//! Command-line front end for the Lex language-server client. For library
//! usage, see the `lex_client` crate documentation.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use lsp_types::{Location, Position, TextDocumentItem, Url};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use lex_client::commands::{
    AnnotationDirection, AnnotationEdit, DocumentKind, ExportRequest, annotation_edit,
    ensure_document_kind, export_document, import_document, lex_document, navigate_annotation,
};
use lex_client::config::{
    CliOptions, Settings, default_config_path, executable_dir, load_config, resolve_settings,
};
use lex_client::edits::apply_workspace_edit;
use lex_client::preview::{FileDocuments, FileSurfaceHost, render_preview};
use lex_client::watch::watch_documents;
use lex_client::{
    ClientError, DocumentEvents, LexClient, Placement, Platform, PreviewManager, ServerHandle,
    resolve_binary,
};

/// Client for the Lex language server: export, import, annotations and live
/// HTML preview of Lex documents.
#[derive(Parser, Debug)]
#[command(name = "lex-client", author, version, about)]
struct RootCli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// Optional config file (default ~/.config/lex/client.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory the bundled `resources/lex-lsp` is resolved against
    /// (default: the directory of this executable).
    #[arg(long, global = true)]
    install_dir: Option<PathBuf>,
    /// Path to the lex-lsp binary; relative paths resolve against the install dir.
    #[arg(long, global = true)]
    lsp_binary_path: Option<String>,
    /// Workspace root passed to the server.
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,
    /// Preview debounce window in milliseconds.
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,
    /// Per-request timeout in milliseconds.
    #[arg(long, global = true)]
    request_timeout_ms: Option<u64>,
    /// Log level (trace|debug|info|warn|error). RUST_LOG overrides it.
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Resolve the server binary but do not start it.
    #[arg(long, global = true, default_value_t = false)]
    skip_server: bool,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Show which lex-lsp binary would be launched and why.
    Resolve(ResolveArgs),
    /// Convert a .lex document to another format (html, markdown, pdf, ...).
    Export(ExportArgs),
    /// Convert a Markdown document to Lex.
    Import(ImportArgs),
    /// Navigate or edit annotations.
    Annotation {
        #[command(subcommand)]
        action: AnnotationCommand,
    },
    /// Live HTML preview written to a file, refreshed as the document changes.
    Preview(PreviewArgs),
}

#[derive(Args, Debug, Clone)]
struct ResolveArgs {
    /// Resolve as if running on this platform (win32, darwin, linux).
    #[arg(long)]
    platform: Option<Platform>,
    /// Print the outcome as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct ExportArgs {
    file: PathBuf,
    #[arg(long, short, default_value = "html")]
    format: String,
    /// Output file. Binary formats default to the input name with the format's extension.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct ImportArgs {
    file: PathBuf,
    #[arg(long, short, default_value = "markdown")]
    format: String,
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum AnnotationCommand {
    /// Print the location of the next annotation.
    Next(CursorArgs),
    /// Print the location of the previous annotation.
    Previous(CursorArgs),
    /// Resolve the annotation at the cursor and apply the edit.
    Resolve(EditArgs),
    /// Toggle annotations at the cursor and apply the edit.
    Toggle(EditArgs),
}

#[derive(Args, Debug, Clone)]
struct CursorArgs {
    file: PathBuf,
    /// 1-based line.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    line: u32,
    /// 1-based column (UTF-16 code units).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    column: u32,
}

impl CursorArgs {
    fn position(&self) -> Position {
        Position::new(self.line - 1, self.column - 1)
    }
}

#[derive(Args, Debug, Clone)]
struct EditArgs {
    #[command(flatten)]
    cursor: CursorArgs,
    /// Print the edit instead of applying it.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Args, Debug, Clone)]
struct PreviewArgs {
    file: PathBuf,
    /// HTML file the preview is written to.
    #[arg(long, short)]
    output: PathBuf,
    /// Render once and exit instead of watching.
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = RootCli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: RootCli) -> Result<ExitCode> {
    let config_path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;
    let settings = resolve_settings(&cli.global, config.as_ref(), executable_dir)?;
    init_tracing(&settings.log_level)?;

    if let CliCommand::Resolve(args) = &cli.command {
        return run_resolve(&settings, args);
    }

    let client = LexClient::new();
    if let Err(e) = client.activate_default(settings.activation_options()).await {
        tracing::warn!("language server unavailable: {e}");
    }
    let server = client.server();

    let code = match cli.command {
        CliCommand::Resolve(_) => ExitCode::SUCCESS,
        CliCommand::Export(args) => finish("Export failed: ", run_export(&server, &args).await),
        CliCommand::Import(args) => finish("Import failed: ", run_import(&server, &args).await),
        CliCommand::Annotation { action } => match action {
            AnnotationCommand::Next(cursor) => finish(
                "Failed to navigate annotations: ",
                run_navigate(&server, &cursor, AnnotationDirection::Next).await,
            ),
            AnnotationCommand::Previous(cursor) => finish(
                "Failed to navigate annotations: ",
                run_navigate(&server, &cursor, AnnotationDirection::Previous).await,
            ),
            AnnotationCommand::Resolve(args) => finish(
                "Failed to update annotation: ",
                run_annotation_edit(&server, &args, AnnotationEdit::Resolve).await,
            ),
            AnnotationCommand::Toggle(args) => finish(
                "Failed to update annotation: ",
                run_annotation_edit(&server, &args, AnnotationEdit::Toggle).await,
            ),
        },
        CliCommand::Preview(args) => {
            finish("Preview failed: ", run_preview(&server, &settings, &args).await)
        }
    };

    client.deactivate().await;
    Ok(code)
}

fn init_tracing(level: &str) -> Result<()> {
    let level = level
        .parse::<LevelFilter>()
        .map_err(|_| anyhow!("invalid log level: {level}"))?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

/// Print a failure as `<prefix><message>` and map it to an exit code.
fn finish(prefix: &str, result: lex_client::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(ClientError::InvalidInput(message)) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
        Err(e) => {
            let message = e.to_string();
            if message.starts_with(prefix) {
                eprintln!("{message}");
            } else {
                eprintln!("{prefix}{message}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run_resolve(settings: &Settings, args: &ResolveArgs) -> Result<ExitCode> {
    let mut options = settings.activation_options();
    if let Some(platform) = args.platform {
        options = options.with_platform(platform);
    }
    let outcome = resolve_binary(options.resolve_inputs(), |path: &Path| path.exists());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(ExitCode::SUCCESS);
    }
    println!("{}", outcome.path.display());
    println!("source: {:?}", outcome.source);
    if let Some(warning) = &outcome.warning {
        println!("warning: {warning}");
    }
    let status = if outcome.path.exists() { "found" } else { "missing" };
    println!("status: {status}");
    Ok(ExitCode::SUCCESS)
}

async fn run_export(server: &ServerHandle, args: &ExportArgs) -> lex_client::Result<()> {
    ensure_document_kind(
        &args.file,
        DocumentKind::Lex,
        &format!("Export to {} is only available for .lex files.", args.format),
    )?;
    let content = tokio::fs::read_to_string(&args.file).await?;
    let source_uri = document_url(&args.file)?;

    let writes_file = matches!(args.format.as_str(), "pdf" | "png");
    let output_path = if writes_file {
        let target = args
            .output
            .clone()
            .unwrap_or_else(|| args.file.with_extension(&args.format));
        Some(std::path::absolute(target)?)
    } else {
        None
    };

    let request = ExportRequest {
        source_uri: Some(&source_uri),
        output_path: output_path.as_deref(),
        ..ExportRequest::new(&args.format, &content)
    };
    let result = export_document(server, request).await?;

    if writes_file {
        println!("{} exported to {result}", args.format.to_uppercase());
    } else {
        emit(&result, args.output.as_deref()).await?;
    }
    Ok(())
}

async fn run_import(server: &ServerHandle, args: &ImportArgs) -> lex_client::Result<()> {
    ensure_document_kind(
        &args.file,
        DocumentKind::Markdown,
        "Import from Markdown is only available for .md files.",
    )?;
    let content = tokio::fs::read_to_string(&args.file).await?;
    let lex = import_document(server, &args.format, &content).await?;
    emit(&lex, args.output.as_deref()).await
}

async fn run_navigate(
    server: &ServerHandle,
    cursor: &CursorArgs,
    direction: AnnotationDirection,
) -> lex_client::Result<()> {
    ensure_document_kind(
        &cursor.file,
        DocumentKind::Lex,
        "Annotation navigation works only inside Lex documents.",
    )?;
    let document = open_lex_document(&cursor.file).await?;
    match navigate_annotation(server, &document, cursor.position(), direction).await? {
        Some(location) => println!("{}", format_location(&location)),
        None => println!("No annotations were found in this document."),
    }
    Ok(())
}

async fn run_annotation_edit(
    server: &ServerHandle,
    args: &EditArgs,
    kind: AnnotationEdit,
) -> lex_client::Result<()> {
    ensure_document_kind(
        &args.cursor.file,
        DocumentKind::Lex,
        "Annotation commands are only available for .lex files.",
    )?;
    let document = open_lex_document(&args.cursor.file).await?;
    let Some(edit) = annotation_edit(server, &document, args.cursor.position(), kind).await?
    else {
        println!("No annotation was resolved at the current position.");
        return Ok(());
    };

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&edit)?);
        return Ok(());
    }
    for path in apply_workspace_edit(&edit).await? {
        println!("updated {}", path.display());
    }
    Ok(())
}

async fn run_preview(
    server: &ServerHandle,
    settings: &Settings,
    args: &PreviewArgs,
) -> lex_client::Result<()> {
    ensure_document_kind(
        &args.file,
        DocumentKind::Lex,
        "Preview is only available for .lex files.",
    )?;
    let path = std::fs::canonicalize(&args.file)?;

    if args.once {
        let text = tokio::fs::read_to_string(&path).await?;
        let html = render_preview(server, &text).await;
        tokio::fs::write(&args.output, html).await?;
        eprintln!("Preview written to {}", args.output.display());
        return Ok(());
    }

    let uri = document_url(&path)?;
    let events = DocumentEvents::new();
    let manager = PreviewManager::with_debounce(
        server.clone(),
        Arc::new(FileSurfaceHost::new(&args.output)),
        Arc::new(FileDocuments),
        events.clone(),
        settings.preview_debounce,
    );
    manager.open(&uri, Placement::Active).await?;
    let _watcher = watch_documents(std::slice::from_ref(&path), events)?;

    eprintln!(
        "Previewing {} -> {} (Ctrl+C to stop)",
        path.display(),
        args.output.display()
    );
    tokio::signal::ctrl_c().await?;
    manager.close_all().await;
    Ok(())
}

fn document_url(path: &Path) -> lex_client::Result<Url> {
    let absolute = std::fs::canonicalize(path)?;
    Url::from_file_path(&absolute).map_err(|_| {
        ClientError::InvalidInput(format!("cannot build a file URI for {}", path.display()))
    })
}

/// Current text of a Lex file, ready to hand to the server.
async fn open_lex_document(path: &Path) -> lex_client::Result<TextDocumentItem> {
    let uri = document_url(path)?;
    let text = tokio::fs::read_to_string(path).await?;
    Ok(lex_document(uri, text))
}

fn format_location(location: &Location) -> String {
    let target = location
        .uri
        .to_file_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| location.uri.to_string());
    format!(
        "{target}:{}:{}",
        location.range.start.line + 1,
        location.range.start.character + 1
    )
}

/// Write `text` to `output`, or to stdout when no output is given.
async fn emit(text: &str, output: Option<&Path>) -> lex_client::Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, text).await?;
            eprintln!("Wrote {}", path.display());
        }
        None if text.ends_with('\n') => print!("{text}"),
        None => println!("{text}"),
    }
    Ok(())
}

impl CliOptions for GlobalArgs {
    fn install_dir(&self) -> Option<PathBuf> {
        self.install_dir.clone()
    }
    fn lsp_binary_path(&self) -> Option<String> {
        self.lsp_binary_path.clone()
    }
    fn workspace_root(&self) -> Option<PathBuf> {
        self.workspace_root.clone()
    }
    fn preview_debounce_ms(&self) -> Option<u64> {
        self.debounce_ms
    }
    fn request_timeout_ms(&self) -> Option<u64> {
        self.request_timeout_ms
    }
    fn log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
    fn skip_server(&self) -> bool {
        self.skip_server
    }
}
