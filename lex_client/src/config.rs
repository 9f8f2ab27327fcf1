//! Configuration file loading and CLI/config resolution for lex-client.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::lifecycle::ActivationOptions;
use crate::preview::DEFAULT_DEBOUNCE;
use crate::session::DEFAULT_REQUEST_TIMEOUT;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/lex/client.toml";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Config file format (TOML, YAML or JSON by extension).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    pub lsp_binary_path: Option<String>,
    pub install_dir: Option<String>,
    pub workspace_root: Option<String>,
    pub preview_debounce_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub log_level: Option<String>,
    pub skip_server: Option<bool>,
}

/// Resolved runtime settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub install_dir: PathBuf,
    pub lsp_binary_path: Option<String>,
    pub workspace_root: Option<PathBuf>,
    pub preview_debounce: Duration,
    pub request_timeout: Duration,
    pub log_level: String,
    pub skip_server: bool,
}

impl Settings {
    /// Activation options for these settings, capturing the process environment.
    pub fn activation_options(&self) -> ActivationOptions {
        let mut options = ActivationOptions::new(&self.install_dir)
            .with_skip_server(self.skip_server)
            .with_request_timeout(self.request_timeout);
        if let Some(path) = &self.lsp_binary_path {
            options = options.with_configured_path(path.clone());
        }
        if let Some(root) = &self.workspace_root {
            options = options.with_workspace_root(root);
        }
        options
    }
}

/// CLI options that can override config file settings.
///
/// Keeps the library independent of the binary's clap types.
pub trait CliOptions {
    fn install_dir(&self) -> Option<PathBuf>;
    fn lsp_binary_path(&self) -> Option<String>;
    fn workspace_root(&self) -> Option<PathBuf>;
    fn preview_debounce_ms(&self) -> Option<u64>;
    fn request_timeout_ms(&self) -> Option<u64>;
    fn log_level(&self) -> Option<String>;
    fn skip_server(&self) -> bool;
}

pub fn expand_path(raw: impl AsRef<str>) -> PathBuf {
    let s = raw.as_ref();
    if let Some(stripped) = s.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(s)
}

pub fn default_config_path() -> PathBuf {
    expand_path(DEFAULT_CONFIG_PATH)
}

/// Load a config file. A missing file is `Ok(None)`.
pub fn load_config(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let cfg: Config = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse yaml config {}", path.display()))?,
        "json" => serde_json::from_str(&data)
            .with_context(|| format!("failed to parse json config {}", path.display()))?,
        _ => toml::from_str(&data)
            .with_context(|| format!("failed to parse toml config {}", path.display()))?,
    };
    Ok(Some(cfg))
}

/// Resolve settings from CLI options and the config file.
///
/// CLI options take precedence over config file settings. `default_install_dir`
/// is consulted only when neither provides one.
pub fn resolve_settings<C: CliOptions>(
    cli: &C,
    config: Option<&Config>,
    default_install_dir: impl FnOnce() -> Result<PathBuf>,
) -> Result<Settings> {
    let install_dir = match cli
        .install_dir()
        .or_else(|| config.and_then(|c| c.install_dir.as_ref().map(expand_path)))
    {
        Some(dir) => dir,
        None => default_install_dir()?,
    };

    let lsp_binary_path = cli
        .lsp_binary_path()
        .or_else(|| config.and_then(|c| c.lsp_binary_path.clone()))
        .filter(|path| !path.trim().is_empty());

    let workspace_root = cli
        .workspace_root()
        .or_else(|| config.and_then(|c| c.workspace_root.as_ref().map(expand_path)));

    let preview_debounce = cli
        .preview_debounce_ms()
        .or_else(|| config.and_then(|c| c.preview_debounce_ms))
        .map_or(DEFAULT_DEBOUNCE, Duration::from_millis);

    let request_timeout_ms = cli
        .request_timeout_ms()
        .or_else(|| config.and_then(|c| c.request_timeout_ms));
    let request_timeout = match request_timeout_ms {
        Some(0) => return Err(anyhow!("request_timeout_ms must be greater than zero")),
        Some(ms) => Duration::from_millis(ms),
        None => DEFAULT_REQUEST_TIMEOUT,
    };

    let log_level = cli
        .log_level()
        .or_else(|| config.and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

    let skip_server =
        cli.skip_server() || config.and_then(|c| c.skip_server).unwrap_or(false);

    Ok(Settings {
        install_dir,
        lsp_binary_path,
        workspace_root,
        preview_debounce,
        request_timeout,
        log_level,
        skip_server,
    })
}

/// Directory holding the running executable; bundled resources sit beside it.
pub fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate current executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("executable path has no parent: {}", exe.display()))
}
