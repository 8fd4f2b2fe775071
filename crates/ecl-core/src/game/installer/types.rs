use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::sync::watch;

/// Progress reporter trait for acquisition operations
/// Implementations forward updates to the UI/notification system
pub trait ProgressReporter: Send + Sync {
    /// Start a new step with optional total steps
    fn start_step(&self, name: &str, total_steps: Option<u32>);

    /// Set overall percentage (0-100, or -1 for indeterminate)
    fn set_percent(&self, percent: i32);

    /// Set a short status message
    fn set_message(&self, message: &str);

    /// Set a numeric step count for the current step (e.g. "3/12").
    /// `total` may be None when unknown.
    fn set_step_count(&self, current: u32, total: Option<u32>);

    /// Mark operation as complete
    fn done(&self, success: bool, message: Option<&str>);
}

/// A progress reporter that does nothing (silent).
/// Useful for background verification or tests.
pub struct SilentProgressReporter;

impl ProgressReporter for SilentProgressReporter {
    fn start_step(&self, _name: &str, _total_steps: Option<u32>) {}
    fn set_percent(&self, _percent: i32) {}
    fn set_message(&self, _message: &str) {}
    fn set_step_count(&self, _current: u32, _total: Option<u32>) {}
    fn done(&self, _success: bool, _message: Option<&str>) {}
}

/// Cancellation token wrapper
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Sending half of a [`CancelToken`].
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Create a connected handle/token pair.
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that can never be cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves for a token
    /// whose handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Operating system types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Windows,
    MacOS,
    Linux,
}

impl OsType {
    /// Detect the current OS
    pub fn current() -> Self {
        #[cfg(target_os = "windows")]
        return OsType::Windows;

        #[cfg(target_os = "macos")]
        return OsType::MacOS;

        #[cfg(target_os = "linux")]
        return OsType::Linux;

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        compile_error!("Unsupported operating system");
    }

    /// Get the OS name as a string (for rule matching and `natives` keys)
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Windows => "windows",
            OsType::Linux => "linux",
            OsType::MacOS => "osx",
        }
    }

    /// Get the classpath separator for this OS
    pub fn classpath_separator(&self) -> &'static str {
        match self {
            OsType::Windows => ";",
            _ => ":",
        }
    }
}

/// Architecture types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86,
    X64,
    Arm32,
    Arm64,
}

impl Arch {
    /// Detect the current architecture
    pub fn current() -> Self {
        #[cfg(target_arch = "x86")]
        return Arch::X86;

        #[cfg(target_arch = "x86_64")]
        return Arch::X64;

        #[cfg(target_arch = "aarch64")]
        return Arch::Arm64;

        #[cfg(target_arch = "arm")]
        return Arch::Arm32;

        #[cfg(not(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "arm"
        )))]
        compile_error!("Unsupported architecture");
    }

    /// Directory tag used inside native archives (e.g. `windows/x64/lwjgl.dll`)
    pub fn native_tag(&self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X64 => "x64",
            Arch::Arm32 => "arm32",
            Arch::Arm64 => "arm64",
        }
    }

    /// Value substituted for `${arch}` in legacy `natives` classifier templates
    pub fn bits(&self) -> &'static str {
        match self {
            Arch::X86 | Arch::Arm32 => "32",
            Arch::X64 | Arch::Arm64 => "64",
        }
    }

    /// Whether a rule's `os.arch` value names this architecture.
    pub fn matches_rule(&self, value: &str) -> bool {
        let aliases: &[&str] = match self {
            Arch::X86 => &["x86", "i386", "i686", "32"],
            Arch::X64 => &["x86_64", "amd64", "x64", "64"],
            Arch::Arm32 => &["arm", "arm32", "armv7l"],
            Arch::Arm64 => &["arm64", "aarch64"],
        };
        aliases.iter().any(|a| a.eq_ignore_ascii_case(value))
    }
}

/// Identity of the machine the game is launched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: OsType,
    pub arch: Arch,
    /// OS version string matched by `os.version` rule expressions
    pub os_version: Option<String>,
}

impl Platform {
    pub fn new(os: OsType, arch: Arch) -> Self {
        Self {
            os,
            arch,
            os_version: None,
        }
    }

    /// Detect the running platform
    pub fn current() -> Self {
        Self {
            os: OsType::current(),
            arch: Arch::current(),
            os_version: sysinfo::System::os_version(),
        }
    }

    pub fn with_os_version(mut self, version: impl Into<String>) -> Self {
        self.os_version = Some(version.into());
        self
    }
}

/// True for non-empty relative paths made only of normal components.
pub fn is_safe_relative(relative: &str) -> bool {
    let rel = Path::new(relative);
    !relative.is_empty()
        && !rel.is_absolute()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// On-disk layout of a game data root (the `.minecraft` directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLayout {
    root: PathBuf,
}

impl GameLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path to the versions directory
    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn version_dir(&self, version_id: &str) -> PathBuf {
        self.versions_dir().join(version_id)
    }

    pub fn version_json(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id)
            .join(format!("{}.json", version_id))
    }

    pub fn client_jar(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id)
            .join(format!("{}.jar", version_id))
    }

    /// Natives are shared per version: `versions/<id>/<id>-natives`
    pub fn natives_dir(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id)
            .join(format!("{}-natives", version_id))
    }

    /// Cached copy of the version manifest
    pub fn manifest_cache(&self) -> PathBuf {
        self.versions_dir().join("version_manifest_v2.json")
    }

    /// Get the path to the libraries directory
    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join("libraries")
    }

    /// Resolve a library-relative artifact path. Returns `None` for paths that
    /// would escape the libraries directory.
    pub fn library_path(&self, relative: &str) -> Option<PathBuf> {
        is_safe_relative(relative).then(|| self.libraries_dir().join(relative))
    }

    /// Get the path to the assets directory
    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn asset_index_path(&self, index_id: &str) -> PathBuf {
        self.assets_dir()
            .join("indexes")
            .join(format!("{}.json", index_id))
    }

    /// Content-addressed object path: `assets/objects/<hash[0:2]>/<hash>`
    pub fn asset_object_path(&self, hash: &str) -> PathBuf {
        let prefix = hash.get(0..2).unwrap_or(hash);
        self.assets_dir().join("objects").join(prefix).join(hash)
    }

    /// Legacy `virtual` asset tree for an index
    pub fn virtual_assets_dir(&self, index_id: &str) -> PathBuf {
        self.assets_dir().join("virtual").join(index_id)
    }
}

/// What a download contributes to the installed version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Metadata,
    ClientJar,
    Library,
    Native,
    AssetIndex,
    Asset,
}

/// One file to fetch. Created per required artifact, consumed and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub dest: PathBuf,
    pub sha1: Option<String>,
    pub size: Option<u64>,
    pub kind: TaskKind,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>, kind: TaskKind) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            sha1: None,
            size: None,
            kind,
        }
    }

    pub fn with_sha1(mut self, sha1: impl Into<String>) -> Self {
        self.sha1 = Some(sha1.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}
