//! Server binary resolution.
//!
//! Decides which `lex-lsp` executable to launch. The cascade is a pure function
//! of its inputs: the install directory, the configured path, a platform
//! identifier, an environment map and an existence predicate. Nothing here reads
//! the process environment or touches the filesystem directly, which keeps
//! every tier unit-testable.
//!
//! Order (first match wins):
//! 1. `LEX_LSP_PATH` override
//! 2. development workspace (`core/`, `editors/`, `tools/` siblings)
//! 3. user-configured path
//! 4. bundled binary under the install directory

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable naming a server binary directly.
pub const ENV_LSP_PATH: &str = "LEX_LSP_PATH";

/// Environment variable pointing at a development checkout root.
pub const ENV_WORKSPACE_ROOT: &str = "LEX_WORKSPACE_ROOT";

/// Bundled binary, relative to the install directory.
pub const DEFAULT_BINARY: &str = "./resources/lex-lsp";

/// Sibling directories that identify a Lex development checkout.
pub const WORKSPACE_MARKERS: [&str; 3] = ["core", "editors", "tools"];

/// Development build output, relative to the workspace root.
pub const WORKSPACE_BINARY: &str = "core/target/debug/lex-lsp";

const WINDOWS_EXECUTABLE_SUFFIX: &str = ".exe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl Platform {
    /// Platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }

    pub fn executable_suffix(self) -> Option<&'static str> {
        match self {
            Platform::Windows => Some(WINDOWS_EXECUTABLE_SUFFIX),
            _ => None,
        }
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "windows" | "win32" => Platform::Windows,
            "macos" | "darwin" => Platform::MacOs,
            "linux" => Platform::Linux,
            _ => Platform::Other,
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
            Platform::Other => "other",
        };
        f.write_str(name)
    }
}

/// Which tier of the cascade produced the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Override,
    Workspace,
    Configured,
    Bundled,
}

/// Result of binary resolution.
///
/// `path` is always populated, even when `warning` is set; whether the file
/// actually exists is the caller's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionOutcome {
    pub path: PathBuf,
    pub warning: Option<String>,
    pub source: ResolutionSource,
}

/// Inputs to [`resolve_binary`].
#[derive(Debug, Clone, Copy)]
pub struct ResolveInputs<'a> {
    /// Directory the client is installed in (anchor for relative paths)
    pub install_dir: &'a Path,
    /// `lsp_binary_path` setting, if any
    pub configured_path: Option<&'a str>,
    pub platform: Platform,
    pub env: &'a HashMap<String, String>,
}

/// Run the resolution cascade.
pub fn resolve_binary(inputs: ResolveInputs<'_>, exists: impl Fn(&Path) -> bool) -> ResolutionOutcome {
    let ResolveInputs {
        install_dir,
        configured_path,
        platform,
        env,
    } = inputs;

    if let Some(raw) = non_blank(env.get(ENV_LSP_PATH).map(String::as_str)) {
        let path = normalize_executable(raw, platform);
        let warning = (!exists(&path))
            .then(|| format!("{ENV_LSP_PATH} binary not found: {}", path.display()));
        return ResolutionOutcome {
            path,
            warning,
            source: ResolutionSource::Override,
        };
    }

    let start = non_blank(env.get(ENV_WORKSPACE_ROOT).map(String::as_str))
        .map(PathBuf::from)
        .filter(|root| exists(root))
        .unwrap_or_else(|| install_dir.to_path_buf());

    if let Some(root) = find_dev_workspace(&start, &exists) {
        let dev_binary = normalize_executable(root.join(WORKSPACE_BINARY), platform);
        if exists(&dev_binary) {
            return ResolutionOutcome {
                path: dev_binary,
                warning: None,
                source: ResolutionSource::Workspace,
            };
        }
        // Detected checkout without a build still falls back to the bundled server.
        let warning = format!(
            "Lex development workspace detected at {} but {} is missing. \
             Run `cargo build -p lex-lsp` in {} to use the development server; \
             falling back to the bundled binary.",
            root.display(),
            dev_binary.display(),
            root.join("core").display(),
        );
        return ResolutionOutcome {
            path: default_binary_path(install_dir, platform),
            warning: Some(warning),
            source: ResolutionSource::Bundled,
        };
    }

    if let Some(configured) = non_blank(configured_path) {
        return ResolutionOutcome {
            path: resolve_configured_path(install_dir, configured, platform),
            warning: None,
            source: ResolutionSource::Configured,
        };
    }

    ResolutionOutcome {
        path: default_binary_path(install_dir, platform),
        warning: None,
        source: ResolutionSource::Bundled,
    }
}

/// Bundled binary location for an install directory.
pub fn default_binary_path(install_dir: &Path, platform: Platform) -> PathBuf {
    normalize_executable(resolve_relative(install_dir, DEFAULT_BINARY), platform)
}

/// Resolve a user-configured path: absolute as given, otherwise relative to
/// the install directory.
pub fn resolve_configured_path(install_dir: &Path, configured: &str, platform: Platform) -> PathBuf {
    normalize_executable(resolve_relative(install_dir, configured), platform)
}

/// Append the platform executable suffix when it is required and missing.
///
/// Idempotent: normalizing an already-normalized path is a no-op.
pub fn normalize_executable(path: impl Into<PathBuf>, platform: Platform) -> PathBuf {
    let path = path.into();
    let Some(suffix) = platform.executable_suffix() else {
        return path;
    };
    if path
        .as_os_str()
        .to_string_lossy()
        .to_ascii_lowercase()
        .ends_with(suffix)
    {
        return path;
    }
    let mut raw: OsString = path.into_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Walk upward from `start` to the filesystem root looking for a directory
/// holding all [`WORKSPACE_MARKERS`].
pub fn find_dev_workspace(start: &Path, exists: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start
        .ancestors()
        .filter(|dir| !dir.as_os_str().is_empty())
        .find(|dir| {
            WORKSPACE_MARKERS
                .iter()
                .all(|marker| exists(&dir.join(marker)))
        })
        .map(Path::to_path_buf)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Join `candidate` onto `base` unless it is already absolute, then fold `.`
/// and `..` lexically.
fn resolve_relative(base: &Path, candidate: &str) -> PathBuf {
    let candidate = Path::new(candidate);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    lexical_normalize(&base.join(candidate))
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn extension_dir() -> PathBuf {
        PathBuf::from("/tmp/lex-extension")
    }

    fn fs_with(paths: &[&str]) -> HashSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    fn resolve(
        env: &HashMap<String, String>,
        configured: Option<&str>,
        platform: Platform,
        fs: &HashSet<PathBuf>,
    ) -> ResolutionOutcome {
        let install_dir = extension_dir();
        resolve_binary(
            ResolveInputs {
                install_dir: &install_dir,
                configured_path: configured,
                platform,
                env,
            },
            |p| fs.contains(p),
        )
    }

    fn env_with(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_binary_path_resolves_inside_install_dir() {
        assert_eq!(
            default_binary_path(&extension_dir(), Platform::Linux),
            PathBuf::from("/tmp/lex-extension/resources/lex-lsp")
        );
    }

    #[test]
    fn default_binary_path_appends_exe_on_windows() {
        assert_eq!(
            default_binary_path(&extension_dir(), Platform::Windows),
            PathBuf::from("/tmp/lex-extension/resources/lex-lsp.exe")
        );
    }

    #[test]
    fn normalization_is_idempotent_for_every_platform() {
        let platforms = [
            Platform::Windows,
            Platform::MacOs,
            Platform::Linux,
            Platform::Other,
        ];
        let paths = ["/a/lex-lsp", "/a/lex-lsp.exe", "/a/LEX-LSP.EXE", "rel/lex", "/a/b.exe.bak"];
        for platform in platforms {
            for raw in paths {
                let once = normalize_executable(raw, platform);
                let twice = normalize_executable(once.clone(), platform);
                assert_eq!(once, twice, "{platform} {raw}");
                let text = once.to_string_lossy().to_ascii_lowercase();
                if platform == Platform::Windows {
                    assert!(text.ends_with(".exe"));
                    assert!(!text.ends_with(".exe.exe"), "double suffix for {raw}");
                } else {
                    assert_eq!(once, PathBuf::from(raw));
                }
            }
        }
    }

    #[test]
    fn uppercase_exe_suffix_is_kept() {
        assert_eq!(
            normalize_executable("C:/tools/LEX-LSP.EXE", Platform::Windows),
            PathBuf::from("C:/tools/LEX-LSP.EXE")
        );
    }

    #[test]
    fn falls_back_to_bundled_when_nothing_configured() {
        let outcome = resolve(&HashMap::new(), None, Platform::Linux, &HashSet::new());
        assert_eq!(outcome.path, default_binary_path(&extension_dir(), Platform::Linux));
        assert_eq!(outcome.source, ResolutionSource::Bundled);
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn absolute_configured_path_is_left_untouched() {
        let outcome = resolve(
            &HashMap::new(),
            Some("/usr/local/bin/lex-lsp"),
            Platform::Linux,
            &HashSet::new(),
        );
        assert_eq!(outcome.path, PathBuf::from("/usr/local/bin/lex-lsp"));
        assert_eq!(outcome.source, ResolutionSource::Configured);
    }

    #[test]
    fn relative_configured_path_resolves_against_install_dir() {
        let outcome = resolve(&HashMap::new(), Some("./bin/lex-lsp"), Platform::Linux, &HashSet::new());
        assert_eq!(outcome.path, PathBuf::from("/tmp/lex-extension/bin/lex-lsp"));
    }

    #[test]
    fn configured_path_on_windows_gets_suffix_without_warning() {
        let outcome = resolve(
            &HashMap::new(),
            Some("./bin/lex-lsp"),
            Platform::Windows,
            &HashSet::new(),
        );
        assert_eq!(outcome.path, PathBuf::from("/tmp/lex-extension/bin/lex-lsp.exe"));
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn configured_windows_path_avoids_double_suffix() {
        let outcome = resolve(
            &HashMap::new(),
            Some("./bin/lex-lsp.exe"),
            Platform::Windows,
            &HashSet::new(),
        );
        assert_eq!(outcome.path, PathBuf::from("/tmp/lex-extension/bin/lex-lsp.exe"));
    }

    #[test]
    fn parent_components_fold_lexically() {
        let outcome = resolve(
            &HashMap::new(),
            Some("../shared/./lex-lsp"),
            Platform::Linux,
            &HashSet::new(),
        );
        assert_eq!(outcome.path, PathBuf::from("/tmp/shared/lex-lsp"));
    }

    #[test]
    fn blank_values_behave_as_absent() {
        for blank in ["", " ", "\t\n  "] {
            let env = env_with(&[(ENV_LSP_PATH, blank), (ENV_WORKSPACE_ROOT, blank)]);
            let outcome = resolve(&env, Some(blank), Platform::Linux, &HashSet::new());
            assert_eq!(outcome.source, ResolutionSource::Bundled, "{blank:?}");
            assert_eq!(outcome.path, default_binary_path(&extension_dir(), Platform::Linux));
            assert!(outcome.warning.is_none());
        }
    }

    #[test]
    fn missing_override_is_returned_with_warning() {
        let env = env_with(&[(ENV_LSP_PATH, "/x/lex-lsp")]);
        let outcome = resolve(&env, None, Platform::Linux, &HashSet::new());
        assert_eq!(outcome.path, PathBuf::from("/x/lex-lsp"));
        assert_eq!(outcome.source, ResolutionSource::Override);
        assert_eq!(
            outcome.warning.as_deref(),
            Some("LEX_LSP_PATH binary not found: /x/lex-lsp")
        );
    }

    #[test]
    fn existing_override_has_no_warning() {
        let env = env_with(&[(ENV_LSP_PATH, "/x/lex-lsp")]);
        let outcome = resolve(&env, None, Platform::Linux, &fs_with(&["/x/lex-lsp"]));
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn override_dominates_every_other_tier() {
        let fs = fs_with(&[
            "/tmp/core",
            "/tmp/editors",
            "/tmp/tools",
            "/tmp/core/target/debug/lex-lsp.exe",
            "/tmp/core/target/debug/lex-lsp",
        ]);
        let configured = [None, Some("./bin/lex-lsp"), Some("/abs/lex-lsp")];
        for platform in [Platform::Linux, Platform::Windows] {
            for cfg in configured {
                let env = env_with(&[(ENV_LSP_PATH, "/override/lex-lsp"), (ENV_WORKSPACE_ROOT, "/tmp")]);
                let outcome = resolve(&env, cfg, platform, &fs);
                assert_eq!(outcome.source, ResolutionSource::Override);
                assert_eq!(outcome.path, normalize_executable("/override/lex-lsp", platform));
            }
        }
    }

    #[test]
    fn override_gets_windows_suffix() {
        let env = env_with(&[(ENV_LSP_PATH, "/x/lex-lsp")]);
        let outcome = resolve(&env, None, Platform::Windows, &fs_with(&["/x/lex-lsp.exe"]));
        assert_eq!(outcome.path, PathBuf::from("/x/lex-lsp.exe"));
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn workspace_detection_finds_exact_ancestor() {
        let fs = fs_with(&["/dev/lex/core", "/dev/lex/editors", "/dev/lex/tools"]);
        let found = find_dev_workspace(Path::new("/dev/lex/editors/vscode/out"), |p| fs.contains(p));
        assert_eq!(found, Some(PathBuf::from("/dev/lex")));
    }

    #[test]
    fn workspace_detection_requires_all_three_markers() {
        let fs = fs_with(&["/dev/lex/core", "/dev/lex/editors"]);
        let found = find_dev_workspace(Path::new("/dev/lex/editors/vscode"), |p| fs.contains(p));
        assert_eq!(found, None);
    }

    #[test]
    fn workspace_walk_terminates_at_root() {
        assert_eq!(find_dev_workspace(Path::new("/a/b/c/d"), |_| false), None);
        assert_eq!(find_dev_workspace(Path::new("/"), |_| false), None);
    }

    #[test]
    fn workspace_binary_wins_over_configuration() {
        let fs = fs_with(&[
            "/tmp/core",
            "/tmp/editors",
            "/tmp/tools",
            "/tmp/core/target/debug/lex-lsp",
        ]);
        let outcome = resolve(&HashMap::new(), Some("/abs/lex-lsp"), Platform::Linux, &fs);
        assert_eq!(outcome.source, ResolutionSource::Workspace);
        assert_eq!(outcome.path, PathBuf::from("/tmp/core/target/debug/lex-lsp"));
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn workspace_without_build_falls_back_to_bundled_with_warning() {
        let fs = fs_with(&["/tmp/core", "/tmp/editors", "/tmp/tools"]);
        let outcome = resolve(&HashMap::new(), Some("/abs/lex-lsp"), Platform::Linux, &fs);
        assert_eq!(outcome.source, ResolutionSource::Bundled);
        assert_eq!(outcome.path, default_binary_path(&extension_dir(), Platform::Linux));
        let warning = outcome.warning.expect("warning");
        assert!(warning.contains("cargo build"), "{warning}");
        assert!(warning.contains("/tmp/core/target/debug/lex-lsp"), "{warning}");
    }

    #[test]
    fn workspace_root_env_is_used_when_it_exists() {
        let fs = fs_with(&[
            "/src/lex",
            "/src/lex/core",
            "/src/lex/editors",
            "/src/lex/tools",
            "/src/lex/core/target/debug/lex-lsp",
        ]);
        let env = env_with(&[(ENV_WORKSPACE_ROOT, "/src/lex")]);
        let outcome = resolve(&env, None, Platform::Linux, &fs);
        assert_eq!(outcome.path, PathBuf::from("/src/lex/core/target/debug/lex-lsp"));
    }

    #[test]
    fn missing_workspace_root_env_falls_back_to_install_dir_walk() {
        let env = env_with(&[(ENV_WORKSPACE_ROOT, "/does/not/exist")]);
        let outcome = resolve(&env, Some("./bin/lex-lsp"), Platform::Linux, &HashSet::new());
        assert_eq!(outcome.source, ResolutionSource::Configured);
    }

    #[test]
    fn real_directory_walk_detects_checkout() {
        let dir = tempfile::tempdir().expect("tempdir");
        for marker in WORKSPACE_MARKERS {
            std::fs::create_dir_all(dir.path().join(marker)).expect("marker");
        }
        let nested = dir.path().join("editors").join("vscode");
        std::fs::create_dir_all(&nested).expect("nested");

        let found = find_dev_workspace(&nested, |p| p.exists());
        assert_eq!(found.as_deref(), Some(dir.path()));
    }

    #[test]
    fn platform_parses_node_style_identifiers() {
        assert_eq!("win32".parse::<Platform>().unwrap(), Platform::Windows);
        assert_eq!("darwin".parse::<Platform>().unwrap(), Platform::MacOs);
        assert_eq!("linux".parse::<Platform>().unwrap(), Platform::Linux);
        assert_eq!("freebsd".parse::<Platform>().unwrap(), Platform::Other);
    }
}
