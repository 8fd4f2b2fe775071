//! Library entry resolution: rule filtering, native classifier selection and
//! Maven path/URL derivation, done once per library per launch.

use crate::game::installer::config::LIBRARIES_URL;
use crate::game::installer::types::{is_safe_relative, Platform};
use crate::game::launcher::version_parser::{Artifact, Library, ManifestFormatError};
use crate::game::rules::{self, FeatureSet, RuleEvaluationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryResolveError {
    #[error(transparent)]
    Rules(#[from] RuleEvaluationError),
    #[error(transparent)]
    Format(#[from] ManifestFormatError),
}

/// A downloadable file belonging to a library, path relative to `libraries/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub path: String,
    pub url: String,
    pub sha1: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLibrary {
    pub name: String,
    /// Main artifact; goes on the classpath
    pub artifact: Option<ResolvedArtifact>,
    /// Legacy `natives` classifier archive; extracted, never on the classpath
    pub native: Option<ResolvedArtifact>,
    pub extract_exclude: Vec<String>,
}

impl ResolvedLibrary {
    /// Modern LWJGL ships natives as regular artifacts with a `natives-*` classifier.
    pub fn artifact_carries_natives(&self) -> bool {
        self.name
            .split(':')
            .nth(3)
            .map(|classifier| classifier.starts_with("natives-"))
            .unwrap_or(false)
    }

    /// Archives the native extractor should unpack for this library
    pub fn native_archives(&self) -> Vec<&ResolvedArtifact> {
        let mut archives = Vec::new();
        if let Some(native) = &self.native {
            archives.push(native);
        }
        if self.artifact_carries_natives() {
            if let Some(artifact) = &self.artifact {
                archives.push(artifact);
            }
        }
        archives
    }
}

/// Convert Maven coordinates to relative path string
/// Format: group:artifact:version[:classifier][@extension]
/// Example: "com.google.guava:guava:21.0" -> "com/google/guava/guava/21.0/guava-21.0.jar"
pub fn maven_to_path(coords: &str) -> Option<String> {
    let (coords, extension) = match coords.split_once('@') {
        Some((c, ext)) => (c, ext),
        None => (coords, "jar"),
    };

    let parts: Vec<&str> = coords.split(':').collect();
    if parts.len() < 3 || parts.iter().take(3).any(|p| p.is_empty()) {
        return None;
    }

    let group = parts[0].replace('.', "/");
    let artifact = parts[1];
    let version = parts[2];

    let filename = match parts.get(3) {
        Some(classifier) => format!("{}-{}-{}.{}", artifact, version, classifier, extension),
        None => format!("{}-{}.{}", artifact, version, extension),
    };

    Some(format!("{}/{}/{}/{}", group, artifact, version, filename))
}

fn join_url(base: &str, path: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

fn invalid(library: &Library, field: &str, reason: String) -> ManifestFormatError {
    ManifestFormatError::InvalidValue {
        document: library.name.clone(),
        field: field.to_string(),
        reason,
    }
}

fn resolve_artifact(
    library: &Library,
    coords: &str,
    declared: Option<&Artifact>,
) -> Result<ResolvedArtifact, ManifestFormatError> {
    let path = match declared.and_then(|a| a.path.clone()) {
        Some(path) => path,
        None => maven_to_path(coords).ok_or_else(|| {
            invalid(library, "name", format!("`{}` is not a Maven coordinate", coords))
        })?,
    };

    if !is_safe_relative(&path) {
        return Err(invalid(
            library,
            "downloads.path",
            format!("`{}` escapes the libraries directory", path),
        ));
    }

    let url = match declared.and_then(|a| a.url.as_deref()).filter(|u| !u.is_empty()) {
        Some(url) => url.to_string(),
        None => join_url(library.url.as_deref().unwrap_or(LIBRARIES_URL), &path),
    };

    Ok(ResolvedArtifact {
        path,
        url,
        sha1: declared.and_then(|a| a.sha1.clone()),
        size: declared.and_then(|a| a.size),
    })
}

/// Resolve a single, already rule-filtered library for `platform`.
pub fn resolve_library(
    library: &Library,
    platform: &Platform,
) -> Result<ResolvedLibrary, ManifestFormatError> {
    let natives_classifier = library
        .natives
        .as_ref()
        .and_then(|natives| natives.get(platform.os.as_str()))
        .map(|template| template.replace("${arch}", platform.arch.bits()));

    let artifact = match &library.downloads {
        Some(downloads) => downloads
            .artifact
            .as_ref()
            .map(|a| resolve_artifact(library, &library.name, Some(a)))
            .transpose()?,
        // Legacy natives-only entries without downloads have no main artifact
        None if natives_classifier.is_some() => None,
        None => Some(resolve_artifact(library, &library.name, None)?),
    };

    let native = match &natives_classifier {
        None => None,
        Some(classifier) => {
            let coords = format!("{}:{}", library.name, classifier);
            match &library.downloads {
                Some(downloads) => {
                    let declared = downloads
                        .classifiers
                        .as_ref()
                        .and_then(|c| c.get(classifier))
                        .ok_or_else(|| {
                            invalid(
                                library,
                                "downloads.classifiers",
                                format!("no `{}` classifier for {}", classifier, platform.os.as_str()),
                            )
                        })?;
                    Some(resolve_artifact(library, &coords, Some(declared))?)
                }
                None => Some(resolve_artifact(library, &coords, None)?),
            }
        }
    };

    Ok(ResolvedLibrary {
        name: library.name.clone(),
        artifact,
        native,
        extract_exclude: library
            .extract
            .as_ref()
            .map(|e| e.exclude.clone())
            .unwrap_or_default(),
    })
}

/// Filter libraries through their rules and resolve the survivors, keeping
/// declaration order.
pub fn resolve_libraries(
    libraries: &[Library],
    platform: &Platform,
    features: &FeatureSet,
) -> Result<Vec<ResolvedLibrary>, LibraryResolveError> {
    let mut resolved = Vec::with_capacity(libraries.len());
    for library in libraries {
        if !rules::evaluate_opt(library.rules.as_deref(), platform, features)? {
            log::debug!("Skipping library {} (rules)", library.name);
            continue;
        }
        resolved.push(resolve_library(library, platform)?);
    }
    Ok(resolved)
}
