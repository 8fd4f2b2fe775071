//! Centralized launcher settings.
//! URL constants used by the resolver and acquisition, plus the user-editable
//! settings file (`LauncherConfig`) with defaults for every field.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::game::installer::types::GameLayout;

// URL Constants
pub const VANILLA_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const RESOURCES_URL: &str = "https://resources.download.minecraft.net";
pub const LIBRARIES_URL: &str = "https://libraries.minecraft.net/";
pub const BMCLAPI_BASE_URL: &str = "https://bmclapi2.bangbang93.com";

pub const DEFAULT_LAUNCHER_NAME: &str = "ECL";
pub const DEFAULT_LAUNCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where game files are downloaded from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSource {
    #[default]
    Official,
    Bmclapi,
    /// Any server laid out like BMCLAPI (`/assets`, `/maven`, metadata at the root)
    Mirror(String),
}

impl DownloadSource {
    fn base_url(&self) -> Option<&str> {
        match self {
            DownloadSource::Official => None,
            DownloadSource::Bmclapi => Some(BMCLAPI_BASE_URL),
            DownloadSource::Mirror(base) => Some(base.trim_end_matches('/')),
        }
    }

    /// Rewrite an official URL for this source. Hosts the mirror does not
    /// carry are returned untouched.
    pub fn rewrite(&self, url: &str) -> String {
        let Some(base) = self.base_url() else {
            return url.to_string();
        };

        let Ok(parsed) = Url::parse(url) else {
            return url.to_string();
        };

        let prefix = match parsed.host_str() {
            Some("piston-meta.mojang.com")
            | Some("piston-data.mojang.com")
            | Some("launchermeta.mojang.com")
            | Some("launcher.mojang.com") => "",
            Some("resources.download.minecraft.net") => "/assets",
            Some("libraries.minecraft.net") => "/maven",
            _ => return url.to_string(),
        };

        let mut rewritten = format!("{}{}{}", base, prefix, parsed.path());
        if let Some(query) = parsed.query() {
            rewritten.push('?');
            rewritten.push_str(query);
        }
        rewritten
    }
}

/// Transfer tuning shared by every fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Size of the acquisition worker pool
    pub concurrency: usize,
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Base delay, multiplied by the attempt number
    pub retry_backoff_ms: u64,
    /// Minimum acceptable throughput over the stall window
    pub stall_floor_bytes_per_sec: u64,
    pub stall_window_ms: u64,
    /// Upper bound on a single chunk read
    pub read_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub source: DownloadSource,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_retries: 3,
            retry_backoff_ms: 1000,
            stall_floor_bytes_per_sec: 1024,
            stall_window_ms: 15_000,
            read_timeout_ms: 30_000,
            connect_timeout_ms: 15_000,
            source: DownloadSource::Official,
            user_agent: format!("{}/{}", DEFAULT_LAUNCHER_NAME, DEFAULT_LAUNCHER_VERSION),
        }
    }
}

impl DownloadConfig {
    pub fn stall_window(&self) -> Duration {
        Duration::from_millis(self.stall_window_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Java executables keyed by required major version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaSettings {
    pub executables: BTreeMap<u32, PathBuf>,
    /// Fall back to `java` on PATH when no executable is configured
    pub use_path: bool,
}

impl Default for JavaSettings {
    fn default() -> Self {
        Self {
            executables: BTreeMap::new(),
            use_path: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub min_mb: Option<u32>,
    pub max_mb: Option<u32>,
}

impl MemorySettings {
    /// `-Xms`/`-Xmx` flags for the configured bounds
    pub fn jvm_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(min) = self.min_mb {
            flags.push(format!("-Xms{}M", min));
        }
        if let Some(max) = self.max_mb {
            flags.push(format!("-Xmx{}M", max));
        }
        flags
    }
}

/// User-editable launcher settings, persisted as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub data_dir: PathBuf,
    pub download: DownloadConfig,
    pub launcher_name: String,
    pub launcher_version: String,
    pub java: JavaSettings,
    pub memory: MemorySettings,
    /// Interval of the stdin keep-alive signal; `None` disables it
    pub keep_alive_secs: Option<u64>,
    /// Run each version in `versions/<id>` instead of the data root
    pub isolate_versions: bool,
    /// Start the game in its own session so closing the launcher leaves it running
    pub detach_game: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".minecraft"),
            download: DownloadConfig::default(),
            launcher_name: DEFAULT_LAUNCHER_NAME.to_string(),
            launcher_version: DEFAULT_LAUNCHER_VERSION.to_string(),
            java: JavaSettings::default(),
            memory: MemorySettings::default(),
            keep_alive_secs: Some(10),
            isolate_versions: true,
            detach_game: false,
        }
    }
}

impl LauncherConfig {
    /// Load settings from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write settings file {:?}", path))?;
        Ok(())
    }

    pub fn manifest_url(&self) -> String {
        self.download.source.rewrite(VANILLA_MANIFEST_URL)
    }

    pub fn layout(&self) -> GameLayout {
        GameLayout::new(&self.data_dir)
    }

    /// Working directory of the game for `version_id`
    pub fn game_dir(&self, version_id: &str) -> PathBuf {
        if self.isolate_versions {
            self.layout().version_dir(version_id)
        } else {
            self.data_dir.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bmclapi_rewrites_known_hosts() {
        let src = DownloadSource::Bmclapi;
        assert_eq!(
            src.rewrite(VANILLA_MANIFEST_URL),
            "https://bmclapi2.bangbang93.com/mc/game/version_manifest_v2.json"
        );
        assert_eq!(
            src.rewrite("https://resources.download.minecraft.net/bd/bdf48ef6"),
            "https://bmclapi2.bangbang93.com/assets/bd/bdf48ef6"
        );
        assert_eq!(
            src.rewrite("https://libraries.minecraft.net/org/lwjgl/lwjgl/3.3.3/lwjgl-3.3.3.jar"),
            "https://bmclapi2.bangbang93.com/maven/org/lwjgl/lwjgl/3.3.3/lwjgl-3.3.3.jar"
        );
        assert_eq!(
            src.rewrite("https://maven.example.org/a/b.jar"),
            "https://maven.example.org/a/b.jar"
        );
    }

    #[test]
    fn mirror_uses_bmclapi_layout() {
        let src = DownloadSource::Mirror("http://127.0.0.1:8080/".to_string());
        assert_eq!(
            src.rewrite("https://libraries.minecraft.net/a/b.jar"),
            "http://127.0.0.1:8080/maven/a/b.jar"
        );
        assert_eq!(
            src.rewrite("https://piston-data.mojang.com/v1/objects/cc/client.jar?x=1"),
            "http://127.0.0.1:8080/v1/objects/cc/client.jar?x=1"
        );
    }

    #[test]
    fn official_source_is_identity() {
        let url = "https://libraries.minecraft.net/x.jar";
        assert_eq!(DownloadSource::Official.rewrite(url), url);
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"download": {"concurrency": 32, "source": "bmclapi"}, "java": {"executables": {"17": "/opt/jdk17/bin/java"}}}"#,
        )
        .unwrap();

        let config = LauncherConfig::load(&path).unwrap();
        assert_eq!(config.download.concurrency, 32);
        assert_eq!(config.download.source, DownloadSource::Bmclapi);
        assert_eq!(config.download.max_retries, 3);
        assert_eq!(config.launcher_name, "ECL");
        assert_eq!(
            config.java.executables.get(&17),
            Some(&PathBuf::from("/opt/jdk17/bin/java"))
        );
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, LauncherConfig::default());
    }

    #[test]
    fn game_dir_follows_isolation() {
        let mut config = LauncherConfig {
            data_dir: PathBuf::from("/mc"),
            ..LauncherConfig::default()
        };
        assert_eq!(config.game_dir("1.8.9"), PathBuf::from("/mc/versions/1.8.9"));
        config.isolate_versions = false;
        assert_eq!(config.game_dir("1.8.9"), PathBuf::from("/mc"));
    }

    #[test]
    fn memory_flags() {
        let mem = MemorySettings {
            min_mb: Some(512),
            max_mb: Some(4096),
        };
        assert_eq!(mem.jvm_flags(), vec!["-Xms512M", "-Xmx4096M"]);
    }
}
