/// Java runtime selection and verification
use crate::game::installer::config::JavaSettings;
use crate::utils::process::GameCommandExt;
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JavaError {
    #[error("no Java runtime configured for Java {major}")]
    NotFound { major: u32 },

    #[error("failed to execute {path:?}: {source}")]
    Exec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} -version exited with {status}")]
    Failed { path: PathBuf, status: String },

    #[error("could not read a Java version from {path:?} output: {output}")]
    UnknownVersion { path: PathBuf, output: String },
}

/// Supplies a Java executable for a required major version
pub trait JavaRuntimeProvider: Send + Sync {
    fn java_for(&self, major: u32) -> Result<PathBuf, JavaError>;
}

/// Executables from the launcher settings, then `java` on PATH
pub struct ConfiguredJava {
    settings: JavaSettings,
}

impl ConfiguredJava {
    pub fn new(settings: JavaSettings) -> Self {
        Self { settings }
    }
}

impl JavaRuntimeProvider for ConfiguredJava {
    fn java_for(&self, major: u32) -> Result<PathBuf, JavaError> {
        if let Some(path) = self.settings.executables.get(&major) {
            return Ok(path.clone());
        }

        // Closest newer runtime
        if let Some((found, path)) = self.settings.executables.range(major..).next() {
            log::warn!("No Java {} configured, using Java {} at {:?}", major, found, path);
            return Ok(path.clone());
        }

        if self.settings.use_path {
            if let Ok(path) = which::which("java") {
                log::info!("Using Java from PATH for Java {}: {:?}", major, path);
                return Ok(path);
            }
        }

        Err(JavaError::NotFound { major })
    }
}

/// Extract the major version from `java -version` output.
/// `1.8.0_392` is Java 8; `17.0.9` is Java 17.
pub fn parse_java_major(output: &str) -> Option<u32> {
    let re = Regex::new(r#"version "(\d+)(?:\.(\d+))?"#).ok()?;
    let caps = re.captures(output)?;
    let first: u32 = caps.get(1)?.as_str().parse().ok()?;
    if first == 1 {
        caps.get(2)?.as_str().parse().ok()
    } else {
        Some(first)
    }
}

/// Run `java -version` and return the runtime's major version
pub async fn verify_java(java_path: &Path) -> Result<u32, JavaError> {
    let mut command = tokio::process::Command::new(java_path);
    command.arg("-version").suppress_console();
    let output = command.output().await.map_err(|source| JavaError::Exec {
        path: java_path.to_path_buf(),
        source,
    })?;

    if !output.status.success() {
        return Err(JavaError::Failed {
            path: java_path.to_path_buf(),
            status: output.status.to_string(),
        });
    }

    // The version banner goes to stderr
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
    let major = parse_java_major(&text).ok_or_else(|| JavaError::UnknownVersion {
        path: java_path.to_path_buf(),
        output: text.lines().next().unwrap_or_default().to_string(),
    })?;

    log::debug!("Java verification successful: {:?} is Java {}", java_path, major);
    Ok(major)
}
