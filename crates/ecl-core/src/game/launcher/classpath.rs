/// Classpath construction for Minecraft launcher
use crate::game::installer::core::library::ResolvedLibrary;
use crate::game::installer::types::{GameLayout, OsType};
use std::collections::HashSet;
use std::path::PathBuf;

/// Validation errors that occur during launch preparation
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing {} required classpath entries: {}", .missing.len(), join_paths(.missing))]
    MissingEntries { missing: Vec<PathBuf> },

    #[error("Library path escapes the libraries directory: {path}")]
    UnsafePath { path: String },
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Classpath entries: every library artifact in declaration order (each path
/// once), then the client jar. Legacy native classifiers are never included.
pub fn classpath_entries(
    libraries: &[ResolvedLibrary],
    layout: &GameLayout,
    version_id: &str,
) -> Result<Vec<PathBuf>, ValidationError> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(libraries.len() + 1);

    for library in libraries {
        let Some(artifact) = &library.artifact else {
            continue;
        };
        if !seen.insert(artifact.path.as_str()) {
            log::debug!("Duplicate classpath entry skipped: {}", artifact.path);
            continue;
        }
        let path = layout
            .library_path(&artifact.path)
            .ok_or_else(|| ValidationError::UnsafePath {
                path: artifact.path.clone(),
            })?;
        entries.push(path);
    }

    entries.push(layout.client_jar(version_id));
    Ok(entries)
}

/// Fail if any classpath entry is missing on disk
pub fn validate_classpath(entries: &[PathBuf]) -> Result<(), ValidationError> {
    let missing: Vec<PathBuf> = entries.iter().filter(|p| !p.is_file()).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingEntries { missing })
    }
}

/// Build the classpath string for `os`
pub fn build_classpath(
    libraries: &[ResolvedLibrary],
    layout: &GameLayout,
    version_id: &str,
    os: OsType,
) -> Result<String, ValidationError> {
    let entries = classpath_entries(libraries, layout, version_id)?;
    Ok(join_classpath(&entries, os))
}

pub fn join_classpath(entries: &[PathBuf], os: OsType) -> String {
    entries
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(os.classpath_separator())
}
