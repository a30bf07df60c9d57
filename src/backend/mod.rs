//! Locates the conversion backend for the current deployment.
//!
//! Resolution walks ordered search tables. Each rule pairs a platform predicate with a path
//! builder and is only evaluated when reached, so the first existing path wins and table order
//! is precedence. Filesystem access goes through [`ExistenceProbe`], which keeps the whole
//! process pure for a given `(mode, platform, probe)`.

use crate::constants::{BACKEND_EXECUTABLE_STEM, BACKEND_SCRIPT, DEPLOYMENT_MODE_ENV};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Development,
    Packaged,
}

impl DeploymentMode {
    /// Environment override first, then the configured value, then the build profile.
    pub fn detect(configured: Option<DeploymentMode>) -> Self {
        if let Ok(raw) = std::env::var(DEPLOYMENT_MODE_ENV) {
            match Self::parse(&raw) {
                Some(mode) => return mode,
                None => tracing::warn!("Ignoring unknown {}={:?}", DEPLOYMENT_MODE_ENV, raw),
            }
        }

        configured.unwrap_or(if cfg!(debug_assertions) {
            DeploymentMode::Development
        } else {
            DeploymentMode::Packaged
        })
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(DeploymentMode::Development),
            "packaged" | "production" | "prod" => Some(DeploymentMode::Packaged),
            _ => None,
        }
    }

    pub fn is_packaged(&self) -> bool {
        matches!(self, DeploymentMode::Packaged)
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::Development => write!(f, "development"),
            DeploymentMode::Packaged => write!(f, "packaged"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    pub fn naming(&self) -> &'static PlatformNaming {
        PLATFORM_NAMING
            .iter()
            .find(|naming| naming.platform == *self)
            .unwrap_or(&PLATFORM_NAMING[PLATFORM_NAMING.len() - 1])
    }

    fn is_unix(&self) -> bool {
        !matches!(self, Platform::Windows)
    }
}

/// Per-platform naming differences.
#[derive(Debug)]
pub struct PlatformNaming {
    pub platform: Platform,
    pub exe_suffix: &'static str,
    pub venv_bin_dir: &'static str,
    pub venv_interpreter: &'static str,
    pub system_interpreter: &'static str,
}

impl PlatformNaming {
    fn executable(&self, stem: &str) -> String {
        format!("{}{}", stem, self.exe_suffix)
    }
}

const PLATFORM_NAMING: &[PlatformNaming] = &[
    PlatformNaming {
        platform: Platform::Windows,
        exe_suffix: ".exe",
        venv_bin_dir: "Scripts",
        venv_interpreter: "python.exe",
        system_interpreter: "python",
    },
    PlatformNaming {
        platform: Platform::MacOs,
        exe_suffix: "",
        venv_bin_dir: "bin",
        venv_interpreter: "python3",
        system_interpreter: "python3",
    },
    PlatformNaming {
        platform: Platform::Linux,
        exe_suffix: "",
        venv_bin_dir: "bin",
        venv_interpreter: "python3",
        system_interpreter: "python3",
    },
];

/// Roots the search tables are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverPaths {
    pub project_root: PathBuf,
    pub resources_dir: PathBuf,
}

impl ResolverPaths {
    pub fn new(project_root: impl Into<PathBuf>, resources_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            resources_dir: resources_dir.into(),
        }
    }

    /// Project root is the crate checkout; resources sit next to the executable
    /// (`../Resources` inside a macOS bundle).
    pub fn discover(platform: Platform) -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let resources_dir = match platform {
            Platform::MacOs => exe_dir.join("..").join("Resources"),
            Platform::Windows | Platform::Linux => exe_dir.join("resources"),
        };

        Self {
            project_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")),
            resources_dir,
        }
    }
}

/// Existence check used by resolution.
pub trait ExistenceProbe {
    fn exists(&self, path: &Path) -> bool;
}

impl<F> ExistenceProbe for F
where
    F: Fn(&Path) -> bool,
{
    fn exists(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Probe backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl ExistenceProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInvocation {
    pub command: PathBuf,
    pub args: Vec<String>,
}

impl BackendInvocation {
    pub fn executable(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn interpreted(interpreter: impl Into<PathBuf>, script: &Path) -> Self {
        Self {
            command: interpreter.into(),
            args: vec![script.to_string_lossy().to_string()],
        }
    }
}

impl fmt::Display for BackendInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No conversion backend found for {mode} mode (searched {} locations)", searched.len())]
pub struct BackendNotFoundError {
    pub mode: DeploymentMode,
    pub searched: Vec<PathBuf>,
}

struct SearchRule {
    applies: fn(Platform) -> bool,
    build: fn(&ResolverPaths, &PlatformNaming) -> PathBuf,
}

fn any_platform(_: Platform) -> bool {
    true
}

fn unix_only(platform: Platform) -> bool {
    platform.is_unix()
}

const DEVELOPMENT_INTERPRETERS: &[SearchRule] = &[
    SearchRule {
        applies: any_platform,
        build: |paths, naming| {
            paths
                .project_root
                .join(".venv")
                .join(naming.venv_bin_dir)
                .join(naming.venv_interpreter)
        },
    },
    SearchRule {
        applies: unix_only,
        build: |paths, naming| {
            paths
                .project_root
                .join(".venv")
                .join(naming.venv_bin_dir)
                .join("python")
        },
    },
    SearchRule {
        applies: any_platform,
        build: |paths, naming| {
            paths
                .project_root
                .join("venv")
                .join(naming.venv_bin_dir)
                .join(naming.venv_interpreter)
        },
    },
    SearchRule {
        applies: unix_only,
        build: |paths, naming| {
            paths
                .project_root
                .join("venv")
                .join(naming.venv_bin_dir)
                .join("python")
        },
    },
];

const PACKAGED_EXECUTABLES: &[SearchRule] = &[
    SearchRule {
        applies: any_platform,
        build: |paths, naming| {
            paths
                .resources_dir
                .join(BACKEND_EXECUTABLE_STEM)
                .join(naming.executable(BACKEND_EXECUTABLE_STEM))
        },
    },
    SearchRule {
        applies: any_platform,
        build: |paths, naming| {
            paths
                .resources_dir
                .join(naming.executable(BACKEND_EXECUTABLE_STEM))
        },
    },
    SearchRule {
        applies: any_platform,
        build: |paths, naming| {
            paths
                .resources_dir
                .join("bin")
                .join(naming.executable(BACKEND_EXECUTABLE_STEM))
        },
    },
    SearchRule {
        applies: any_platform,
        build: |paths, naming| {
            paths
                .resources_dir
                .join("python")
                .join("dist")
                .join(BACKEND_EXECUTABLE_STEM)
                .join(naming.executable(BACKEND_EXECUTABLE_STEM))
        },
    },
    SearchRule {
        applies: any_platform,
        build: |paths, naming| {
            paths
                .resources_dir
                .join("python")
                .join("dist")
                .join(naming.executable(BACKEND_EXECUTABLE_STEM))
        },
    },
];

fn first_existing(
    rules: &[SearchRule],
    platform: Platform,
    paths: &ResolverPaths,
    probe: &impl ExistenceProbe,
    searched: &mut Vec<PathBuf>,
) -> Option<PathBuf> {
    let naming = platform.naming();
    rules
        .iter()
        .filter(|rule| (rule.applies)(platform))
        .map(|rule| (rule.build)(paths, naming))
        .find(|candidate| {
            searched.push(candidate.clone());
            probe.exists(candidate)
        })
}

fn script_path(root: &Path) -> PathBuf {
    BACKEND_SCRIPT
        .split('/')
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// Resolves the backend command for `mode` on `platform`.
pub fn resolve(
    mode: DeploymentMode,
    platform: Platform,
    paths: &ResolverPaths,
    probe: &impl ExistenceProbe,
) -> Result<BackendInvocation, BackendNotFoundError> {
    let naming = platform.naming();
    let mut searched = Vec::new();

    match mode {
        DeploymentMode::Development => {
            let script = script_path(&paths.project_root);
            searched.push(script.clone());
            if !probe.exists(&script) {
                return Err(BackendNotFoundError { mode, searched });
            }

            let interpreter = first_existing(
                DEVELOPMENT_INTERPRETERS,
                platform,
                paths,
                probe,
                &mut searched,
            )
            .unwrap_or_else(|| PathBuf::from(naming.system_interpreter));

            Ok(BackendInvocation::interpreted(interpreter, &script))
        }
        DeploymentMode::Packaged => {
            if let Some(executable) =
                first_existing(PACKAGED_EXECUTABLES, platform, paths, probe, &mut searched)
            {
                return Ok(BackendInvocation::executable(executable));
            }

            let script = script_path(&paths.resources_dir);
            searched.push(script.clone());
            if probe.exists(&script) {
                return Ok(BackendInvocation::interpreted(
                    naming.system_interpreter,
                    &script,
                ));
            }

            Err(BackendNotFoundError { mode, searched })
        }
    }
}

/// Anything that can hand the supervisor a backend command.
pub trait BackendLocator: Send + Sync {
    fn locate(&self) -> Result<BackendInvocation, BackendNotFoundError>;
}

pub struct BackendResolver<P = FsProbe> {
    mode: DeploymentMode,
    platform: Platform,
    paths: ResolverPaths,
    override_path: Option<PathBuf>,
    probe: P,
}

impl BackendResolver<FsProbe> {
    pub fn for_current_platform(mode: DeploymentMode) -> Self {
        let platform = Platform::current();
        Self::new(mode, platform, ResolverPaths::discover(platform), FsProbe)
    }
}

impl<P: ExistenceProbe> BackendResolver<P> {
    pub fn new(mode: DeploymentMode, platform: Platform, paths: ResolverPaths, probe: P) -> Self {
        Self {
            mode,
            platform,
            paths,
            override_path: None,
            probe,
        }
    }

    /// An explicit backend path checked ahead of the search tables.
    pub fn with_override(mut self, path: Option<PathBuf>) -> Self {
        self.override_path = path;
        self
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn resolve(&self) -> Result<BackendInvocation, BackendNotFoundError> {
        if let Some(path) = &self.override_path {
            if self.probe.exists(path) {
                let is_script = path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("py"))
                    .unwrap_or(false);
                return Ok(if is_script {
                    BackendInvocation::interpreted(self.platform.naming().system_interpreter, path)
                } else {
                    BackendInvocation::executable(path)
                });
            }
            tracing::warn!(
                "Configured backend override {} does not exist, falling back to search",
                path.display()
            );
        }

        resolve(self.mode, self.platform, &self.paths, &self.probe)
    }
}

impl<P: ExistenceProbe + Send + Sync> BackendLocator for BackendResolver<P> {
    fn locate(&self) -> Result<BackendInvocation, BackendNotFoundError> {
        let invocation = self.resolve()?;
        tracing::debug!("Resolved backend ({} mode): {}", self.mode, invocation);
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn paths() -> ResolverPaths {
        ResolverPaths::new("/project", "/app/resources")
    }

    fn probe_for(existing: &[PathBuf]) -> impl Fn(&Path) -> bool {
        let set: HashSet<PathBuf> = existing.iter().cloned().collect();
        move |path: &Path| set.contains(path)
    }

    fn script(root: &str) -> PathBuf {
        PathBuf::from(root).join("python").join("processor.py")
    }

    #[test]
    fn development_prefers_dot_venv_interpreter() {
        let venv_python = PathBuf::from("/project/.venv/bin/python3");
        let other = PathBuf::from("/project/venv/bin/python3");
        let probe = probe_for(&[script("/project"), venv_python.clone(), other]);

        let invocation =
            resolve(DeploymentMode::Development, Platform::Linux, &paths(), &probe).unwrap();

        assert_eq!(invocation.command, venv_python);
        assert_eq!(
            invocation.args,
            vec![script("/project").to_string_lossy().to_string()]
        );
    }

    #[test]
    fn development_uses_windows_scripts_layout() {
        let venv_python = PathBuf::from("/project")
            .join("venv")
            .join("Scripts")
            .join("python.exe");
        let probe = probe_for(&[script("/project"), venv_python.clone()]);

        let invocation =
            resolve(DeploymentMode::Development, Platform::Windows, &paths(), &probe).unwrap();

        assert_eq!(invocation.command, venv_python);
    }

    #[test]
    fn development_ignores_unix_layout_on_windows() {
        let unix_python = PathBuf::from("/project/.venv/bin/python");
        let probe = probe_for(&[script("/project"), unix_python]);

        let invocation =
            resolve(DeploymentMode::Development, Platform::Windows, &paths(), &probe).unwrap();

        assert_eq!(invocation.command, PathBuf::from("python"));
    }

    #[test]
    fn development_falls_back_to_system_interpreter() {
        let probe = probe_for(&[script("/project")]);

        let invocation =
            resolve(DeploymentMode::Development, Platform::MacOs, &paths(), &probe).unwrap();

        assert_eq!(invocation.command, PathBuf::from("python3"));
        assert_eq!(invocation.args.len(), 1);
    }

    #[test]
    fn development_without_script_is_not_found() {
        let probe = probe_for(&[PathBuf::from("/project/.venv/bin/python3")]);

        let err =
            resolve(DeploymentMode::Development, Platform::Linux, &paths(), &probe).unwrap_err();

        assert_eq!(err.mode, DeploymentMode::Development);
        assert_eq!(err.searched, vec![script("/project")]);
    }

    #[test]
    fn packaged_first_existing_executable_wins() {
        let nested = PathBuf::from("/app/resources/processor/processor.exe");
        let flat = PathBuf::from("/app/resources/processor.exe");
        let probe = probe_for(&[flat.clone(), nested.clone()]);

        let invocation =
            resolve(DeploymentMode::Packaged, Platform::Windows, &paths(), &probe).unwrap();

        assert_eq!(invocation, BackendInvocation::executable(nested));
    }

    #[test]
    fn packaged_supports_dist_layout() {
        let dist = PathBuf::from("/app/resources/python/dist/processor");
        let probe = probe_for(&[dist.clone()]);

        let invocation =
            resolve(DeploymentMode::Packaged, Platform::Linux, &paths(), &probe).unwrap();

        assert_eq!(invocation.command, dist);
        assert!(invocation.args.is_empty());
    }

    #[test]
    fn packaged_falls_back_to_bundled_script() {
        let probe = probe_for(&[script("/app/resources")]);

        let invocation =
            resolve(DeploymentMode::Packaged, Platform::Windows, &paths(), &probe).unwrap();

        assert_eq!(invocation.command, PathBuf::from("python"));
        assert_eq!(
            invocation.args,
            vec![script("/app/resources").to_string_lossy().to_string()]
        );
    }

    #[test]
    fn no_candidates_anywhere_is_not_found() {
        let probe = |_: &Path| false;

        for mode in [DeploymentMode::Development, DeploymentMode::Packaged] {
            let err = resolve(mode, Platform::Linux, &paths(), &probe).unwrap_err();
            assert_eq!(err.mode, mode);
            assert!(!err.searched.is_empty());
        }
    }

    #[test]
    fn packaged_search_order_is_reported() {
        let probe = |_: &Path| false;
        let err = resolve(DeploymentMode::Packaged, Platform::Linux, &paths(), &probe).unwrap_err();

        assert_eq!(err.searched.len(), PACKAGED_EXECUTABLES.len() + 1);
        assert_eq!(
            err.searched[0],
            PathBuf::from("/app/resources/processor/processor")
        );
        assert_eq!(err.searched.last(), Some(&script("/app/resources")));
    }

    #[test]
    fn resolution_is_deterministic() {
        let probe = probe_for(&[
            script("/project"),
            PathBuf::from("/project/venv/bin/python"),
        ]);

        let first = resolve(DeploymentMode::Development, Platform::Linux, &paths(), &probe);
        let second = resolve(DeploymentMode::Development, Platform::Linux, &paths(), &probe);

        assert_eq!(first, second);
    }

    #[test]
    fn override_takes_precedence_when_present() {
        let custom = PathBuf::from("/opt/backend/convert");
        let probe = probe_for(&[custom.clone(), script("/project")]);
        let resolver =
            BackendResolver::new(DeploymentMode::Development, Platform::Linux, paths(), probe)
                .with_override(Some(custom.clone()));

        assert_eq!(
            resolver.resolve().unwrap(),
            BackendInvocation::executable(custom)
        );
    }

    #[test]
    fn missing_override_falls_back_to_tables() {
        let probe = probe_for(&[script("/project")]);
        let resolver =
            BackendResolver::new(DeploymentMode::Development, Platform::Linux, paths(), probe)
                .with_override(Some(PathBuf::from("/missing/processor.py")));

        assert_eq!(
            resolver.resolve().unwrap().command,
            PathBuf::from("python3")
        );
    }

    #[test]
    fn script_override_runs_through_interpreter() {
        let custom = PathBuf::from("/opt/backend/processor.py");
        let probe = probe_for(&[custom.clone()]);
        let resolver =
            BackendResolver::new(DeploymentMode::Packaged, Platform::Windows, paths(), probe)
                .with_override(Some(custom.clone()));

        assert_eq!(
            resolver.resolve().unwrap(),
            BackendInvocation::interpreted("python", &custom)
        );
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!(DeploymentMode::parse("Dev"), Some(DeploymentMode::Development));
        assert_eq!(DeploymentMode::parse(" packaged "), Some(DeploymentMode::Packaged));
        assert_eq!(DeploymentMode::parse("staging"), None);
    }
}
