/// Core types for game launching
use crate::game::installer::config::{DEFAULT_LAUNCHER_NAME, DEFAULT_LAUNCHER_VERSION};
use crate::game::installer::types::GameLayout;
use crate::game::rules::FeatureSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A fully synthesized invocation: `<executable> <jvm_args> <main_class> <game_args>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub executable: PathBuf,
    pub jvm_args: Vec<String>,
    pub main_class: String,
    pub game_args: Vec<String>,
}

impl LaunchCommand {
    /// Everything after the executable, in order
    pub fn arguments(&self) -> Vec<&str> {
        self.jvm_args
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.main_class.as_str()))
            .chain(self.game_args.iter().map(String::as_str))
            .collect()
    }

    /// Human-readable command line for logs. `secrets` are masked.
    pub fn display_masked(&self, secrets: &[&str]) -> String {
        std::iter::once(self.executable.to_string_lossy().to_string())
            .chain(self.arguments().into_iter().map(|arg| {
                let mut arg = arg.to_string();
                for secret in secrets.iter().filter(|s| s.len() > 1) {
                    arg = arg.replace(secret, "***");
                }
                quote_arg(&arg)
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote an argument for display when it contains whitespace or quotes
pub(crate) fn quote_arg(s: &str) -> String {
    if s.is_empty() {
        return "\"\"".to_string();
    }
    if s.chars().any(|c| c.is_whitespace() || c == '"') {
        let esc = s.replace('\\', "\\\\").replace('"', "\\\"");
        return format!("\"{}\"", esc);
    }
    s.to_string()
}

/// Caller-supplied inputs to argument synthesis
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Java executable
    pub executable: PathBuf,

    /// Working directory of the game (`${game_directory}`)
    pub game_dir: PathBuf,

    pub library_dir: PathBuf,

    pub assets_root: PathBuf,

    /// Legacy virtual/resources asset directory; defaults to `assets_root`
    pub game_assets: Option<PathBuf>,

    pub launcher_name: String,

    pub launcher_version: String,

    /// Feature flags for conditional arguments; missing flags read as false
    pub features: FeatureSet,

    /// Window size (`${resolution_width}`/`${resolution_height}`)
    pub resolution: Option<(u32, u32)>,

    /// Prepended to the JVM arguments (memory flags and the like)
    pub extra_jvm_args: Vec<String>,

    /// Appended to the game arguments
    pub extra_game_args: Vec<String>,
}

impl LaunchOptions {
    pub fn new(executable: impl Into<PathBuf>, layout: &GameLayout, game_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            game_dir: game_dir.into(),
            library_dir: layout.libraries_dir(),
            assets_root: layout.assets_dir(),
            game_assets: None,
            launcher_name: DEFAULT_LAUNCHER_NAME.to_string(),
            launcher_version: DEFAULT_LAUNCHER_VERSION.to_string(),
            features: FeatureSet::new(),
            resolution: None,
            extra_jvm_args: Vec::new(),
            extra_game_args: Vec::new(),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some((width, height));
        self
    }

    pub fn with_feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(name.into(), enabled);
        self
    }

    pub fn with_game_assets(mut self, dir: impl Into<PathBuf>) -> Self {
        self.game_assets = Some(dir.into());
        self
    }

    pub fn with_launcher(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.launcher_name = name.into();
        self.launcher_version = version.into();
        self
    }
}

/// Periodic stdin signal sent to the running game
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlive {
    pub interval: Duration,
    pub payload: String,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            payload: "System.gc()\n".to_string(),
        }
    }
}

/// How the game process is started and observed
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub game_dir: PathBuf,
    pub keep_alive: Option<KeepAlive>,
    /// Every output line is also appended here
    pub log_file: Option<PathBuf>,
    /// Start the game in its own session so it outlives the launcher
    pub detach: bool,
}

impl ProcessOptions {
    pub fn new(game_dir: impl Into<PathBuf>) -> Self {
        Self {
            game_dir: game_dir.into(),
            keep_alive: None,
            log_file: None,
            detach: false,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn detached(mut self) -> Self {
        self.detach = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// One line of game output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("game directory {path:?} is unusable: {source}")]
    GameDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {executable:?}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for game process: {0}")]
    Wait(#[source] std::io::Error),
}
