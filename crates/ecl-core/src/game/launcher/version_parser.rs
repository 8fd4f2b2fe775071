//! Version descriptor (`<id>.json`) parsing.
//!
//! The wire document is decoded into [`VersionManifest`] and then normalized
//! into a [`VersionDescriptor`], which is what the rest of the crate consumes.
//! Both argument eras (modern `arguments` and legacy `minecraftArguments`)
//! end up as the same `jvm_args`/`game_args` lists.

use crate::game::rules::Rule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Java major version assumed when a descriptor does not declare one
pub const DEFAULT_JAVA_MAJOR: u32 = 8;

#[derive(Debug, Error)]
pub enum ManifestFormatError {
    #[error("{document} is not valid JSON for its type: {source}")]
    Json {
        document: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{document} is missing required field `{field}`")]
    MissingField {
        document: String,
        field: &'static str,
    },

    #[error("{document} has an invalid `{field}`: {reason}")]
    InvalidValue {
        document: String,
        field: String,
        reason: String,
    },
}

/// Version descriptor as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Arguments>,

    /// Legacy arguments (pre-1.13)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minecraft_arguments: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub libraries: Option<Vec<Library>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_index: Option<AssetIndexRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<VersionDownloads>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_version: Option<JavaVersion>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub version_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// Game and JVM arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<Argument>,

    #[serde(default)]
    pub jvm: Vec<Argument>,
}

/// Argument that can be simple or conditional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    /// Simple string argument
    Simple(String),

    /// Conditional argument with rules
    Conditional {
        rules: Vec<Rule>,
        value: ArgumentValue,
    },
}

/// Argument value can be a single string or array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Single(String),
    Multiple(Vec<String>),
}

impl ArgumentValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            ArgumentValue::Single(s) => vec![s.as_str()],
            ArgumentValue::Multiple(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Library definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    /// Maven coordinates
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<LibraryDownloads>,

    /// Custom Maven repository URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,

    /// OS key -> classifier key (may contain `${arch}`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natives: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractRules>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifiers: Option<HashMap<String, Artifact>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractRules {
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Asset index reference carried by a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexRef {
    pub id: String,
    pub sha1: String,
    pub size: u64,
    #[serde(default)]
    pub total_size: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDownloads {
    pub client: Option<DownloadRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<DownloadRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRef {
    pub url: String,
    pub sha1: Option<String>,
    pub size: Option<u64>,
}

/// Java version requirements
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersion {
    #[serde(default)]
    pub component: Option<String>,
    pub major_version: u32,
}

/// Which descriptor era the argument lists came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentStyle {
    Modern,
    Legacy,
}

/// Normalized, validated version descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct VersionDescriptor {
    pub id: String,
    pub main_class: String,
    pub java_major: u32,
    pub version_type: String,
    pub client: DownloadRef,
    pub libraries: Vec<Library>,
    pub asset_index: AssetIndexRef,
    pub jvm_args: Vec<Argument>,
    pub game_args: Vec<Argument>,
    pub argument_style: ArgumentStyle,
}

/// JVM arguments synthesized for legacy descriptors, which carry none
fn legacy_jvm_arguments() -> Vec<Argument> {
    vec![
        Argument::Simple("-Djava.library.path=${natives_directory}".to_string()),
        Argument::Simple("-cp".to_string()),
        Argument::Simple("${classpath}".to_string()),
    ]
}

impl VersionManifest {
    /// Validate required fields and normalize both argument eras.
    pub fn into_descriptor(self) -> Result<VersionDescriptor, ManifestFormatError> {
        let id = self.id.ok_or_else(|| ManifestFormatError::MissingField {
            document: "version descriptor".to_string(),
            field: "id",
        })?;
        let missing = |field: &'static str| ManifestFormatError::MissingField {
            document: id.clone(),
            field,
        };

        let main_class = self.main_class.ok_or_else(|| missing("mainClass"))?;
        let libraries = self.libraries.ok_or_else(|| missing("libraries"))?;
        let asset_index = self.asset_index.ok_or_else(|| missing("assetIndex"))?;
        let client = self
            .downloads
            .and_then(|d| d.client)
            .ok_or_else(|| missing("downloads.client"))?;

        let (jvm_args, game_args, argument_style) = match (self.arguments, self.minecraft_arguments)
        {
            (Some(arguments), _) => (arguments.jvm, arguments.game, ArgumentStyle::Modern),
            (None, Some(legacy)) => {
                let split = shlex::split(&legacy).ok_or_else(|| {
                    ManifestFormatError::InvalidValue {
                        document: id.clone(),
                        field: "minecraftArguments".to_string(),
                        reason: "unbalanced quoting".to_string(),
                    }
                })?;
                let game = split.into_iter().map(Argument::Simple).collect();
                (legacy_jvm_arguments(), game, ArgumentStyle::Legacy)
            }
            (None, None) => return Err(missing("arguments")),
        };

        for (index, library) in libraries.iter().enumerate() {
            if library.name.split(':').count() < 3 {
                return Err(ManifestFormatError::InvalidValue {
                    document: id.clone(),
                    field: format!("libraries[{}].name", index),
                    reason: format!("`{}` is not group:artifact:version", library.name),
                });
            }
        }

        Ok(VersionDescriptor {
            main_class,
            java_major: self
                .java_version
                .map(|j| j.major_version)
                .unwrap_or(DEFAULT_JAVA_MAJOR),
            version_type: self.version_type.unwrap_or_else(|| "release".to_string()),
            client,
            libraries,
            asset_index,
            jvm_args,
            game_args,
            argument_style,
            id,
        })
    }
}

/// Decode and normalize a descriptor. `document` names it in errors.
pub fn parse_version_descriptor(
    bytes: &[u8],
    document: &str,
) -> Result<VersionDescriptor, ManifestFormatError> {
    let manifest: VersionManifest =
        serde_json::from_slice(bytes).map_err(|source| ManifestFormatError::Json {
            document: document.to_string(),
            source,
        })?;
    manifest.into_descriptor()
}

/// Parse a version.json file from disk
pub async fn parse_version_json(path: &Path) -> anyhow::Result<VersionDescriptor> {
    use anyhow::Context;

    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read version.json at {:?}", path))?;
    let descriptor = parse_version_descriptor(&content, &path.display().to_string())
        .with_context(|| format!("Failed to parse version.json at {:?}", path))?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODERN: &str = r#"{
        "id": "1.20.4",
        "type": "release",
        "mainClass": "net.minecraft.client.main.Main",
        "javaVersion": {"component": "java-runtime-gamma", "majorVersion": 17},
        "assetIndex": {"id": "12", "sha1": "aa", "size": 1, "totalSize": 2, "url": "https://piston-meta.mojang.com/v1/packages/aa/12.json"},
        "downloads": {"client": {"url": "https://piston-data.mojang.com/v1/objects/cc/client.jar", "sha1": "cc", "size": 3}},
        "libraries": [{"name": "com.mojang:brigadier:1.2.9", "downloads": {"artifact": {"path": "com/mojang/brigadier/1.2.9/brigadier-1.2.9.jar", "url": "https://libraries.minecraft.net/com/mojang/brigadier/1.2.9/brigadier-1.2.9.jar", "sha1": "dd", "size": 4}}}],
        "arguments": {
            "game": ["--username", "${auth_player_name}", {"rules": [{"action": "allow", "features": {"has_custom_resolution": true}}], "value": ["--width", "${resolution_width}"]}],
            "jvm": [{"rules": [{"action": "allow", "os": {"name": "osx"}}], "value": "-XstartOnFirstThread"}, "-cp", "${classpath}"]
        }
    }"#;

    const LEGACY: &str = r#"{
        "id": "1.8.9",
        "type": "release",
        "mainClass": "net.minecraft.client.main.Main",
        "assetIndex": {"id": "1.8", "sha1": "aa", "size": 1, "totalSize": 2, "url": "https://launchermeta.mojang.com/v1/packages/aa/1.8.json"},
        "downloads": {"client": {"url": "https://launcher.mojang.com/v1/objects/cc/client.jar", "sha1": "cc", "size": 3}},
        "libraries": [],
        "minecraftArguments": "--username ${auth_player_name} --version ${version_name} --userProperties ${user_properties}"
    }"#;

    #[test]
    fn modern_descriptor_normalizes() {
        let d = parse_version_descriptor(MODERN.as_bytes(), "1.20.4").unwrap();
        assert_eq!(d.argument_style, ArgumentStyle::Modern);
        assert_eq!(d.java_major, 17);
        assert_eq!(d.game_args.len(), 3);
        assert_eq!(d.jvm_args.len(), 3);
        assert!(matches!(&d.jvm_args[0], Argument::Conditional { .. }));
        assert_eq!(d.client.sha1.as_deref(), Some("cc"));
    }

    #[test]
    fn legacy_descriptor_gets_jvm_arguments() {
        let d = parse_version_descriptor(LEGACY.as_bytes(), "1.8.9").unwrap();
        assert_eq!(d.argument_style, ArgumentStyle::Legacy);
        assert_eq!(d.java_major, DEFAULT_JAVA_MAJOR);
        assert_eq!(
            d.jvm_args,
            vec![
                Argument::Simple("-Djava.library.path=${natives_directory}".into()),
                Argument::Simple("-cp".into()),
                Argument::Simple("${classpath}".into()),
            ]
        );
        assert_eq!(d.game_args.len(), 6);
        assert_eq!(d.game_args[1], Argument::Simple("${auth_player_name}".into()));
    }

    #[test]
    fn missing_main_class_is_a_format_error() {
        let broken = MODERN.replace(r#""mainClass": "net.minecraft.client.main.Main","#, "");
        let err = parse_version_descriptor(broken.as_bytes(), "1.20.4").unwrap_err();
        assert!(matches!(
            err,
            ManifestFormatError::MissingField {
                field: "mainClass",
                ..
            }
        ));
    }

    #[test]
    fn descriptor_without_any_arguments_is_rejected() {
        let broken = LEGACY.replace(
            r#""minecraftArguments": "--username ${auth_player_name} --version ${version_name} --userProperties ${user_properties}""#,
            r#""assets": "1.8""#,
        );
        let err = parse_version_descriptor(broken.as_bytes(), "1.8.9").unwrap_err();
        assert!(matches!(
            err,
            ManifestFormatError::MissingField {
                field: "arguments",
                ..
            }
        ));
    }

    #[test]
    fn malformed_json_is_a_format_error() {
        let err = parse_version_descriptor(b"{\"id\": 5}", "x").unwrap_err();
        assert!(matches!(err, ManifestFormatError::Json { .. }));
    }

    #[test]
    fn bad_library_coordinates_are_rejected() {
        let broken = MODERN.replace("com.mojang:brigadier:1.2.9", "brigadier");
        let err = parse_version_descriptor(broken.as_bytes(), "1.20.4").unwrap_err();
        assert!(matches!(err, ManifestFormatError::InvalidValue { .. }));
    }
}
