use crate::game::launcher::version_parser::ManifestFormatError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// The version manifest (`version_manifest_v2.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionManifestIndex {
    pub latest: LatestVersions,
    pub versions: Vec<VersionSummary>,
}

/// Latest version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

/// One entry per known game version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: String,
    /// Version type (release, snapshot, old_alpha, old_beta)
    #[serde(rename = "type")]
    pub version_type: String,
    pub url: String,
    /// Present in the v2 manifest only
    #[serde(default)]
    pub sha1: Option<String>,
    pub time: DateTime<Utc>,
    pub release_time: DateTime<Utc>,
}

impl VersionManifestIndex {
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestFormatError> {
        serde_json::from_slice(bytes).map_err(|source| ManifestFormatError::Json {
            document: "version manifest".to_string(),
            source,
        })
    }

    pub fn find(&self, id: &str) -> Option<&VersionSummary> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Resolve a selector to a concrete version id
    pub fn select(&self, selector: &VersionSelector) -> Option<&VersionSummary> {
        match selector {
            VersionSelector::Id(id) => self.find(id),
            VersionSelector::LatestRelease => self.find(&self.latest.release),
            VersionSelector::LatestSnapshot => self.find(&self.latest.snapshot),
        }
    }

    pub fn releases(&self) -> impl Iterator<Item = &VersionSummary> {
        self.versions.iter().filter(|v| v.version_type == "release")
    }
}

/// Which version to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Id(String),
    LatestRelease,
    LatestSnapshot,
}

impl FromStr for VersionSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "latest" | "latest-release" | "release" => VersionSelector::LatestRelease,
            "latest-snapshot" | "snapshot" => VersionSelector::LatestSnapshot,
            id => VersionSelector::Id(id.to_string()),
        })
    }
}

impl std::fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionSelector::Id(id) => write!(f, "{}", id),
            VersionSelector::LatestRelease => write!(f, "latest release"),
            VersionSelector::LatestSnapshot => write!(f, "latest snapshot"),
        }
    }
}

/// Asset index document (`assets/indexes/<id>.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetIndex {
    pub objects: BTreeMap<String, AssetObject>,
    /// Pre-1.6 indexes: objects are also laid out by name under `assets/virtual/<id>`
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    /// Pre-1.6 indexes: objects are also copied into `<game_dir>/resources`
    #[serde(default)]
    pub map_to_resources: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

impl AssetIndex {
    /// Decode and check that every object hash is a 40-character hex digest.
    pub fn parse(bytes: &[u8], index_id: &str) -> Result<Self, ManifestFormatError> {
        let index: AssetIndex =
            serde_json::from_slice(bytes).map_err(|source| ManifestFormatError::Json {
                document: format!("asset index {}", index_id),
                source,
            })?;

        for (name, object) in &index.objects {
            if object.hash.len() != 40 || !object.hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ManifestFormatError::InvalidValue {
                    document: format!("asset index {}", index_id),
                    field: format!("objects[{}].hash", name),
                    reason: format!("`{}` is not a SHA1 digest", object.hash),
                });
            }
        }

        Ok(index)
    }

    /// Whether objects also need a name-addressed copy
    pub fn needs_named_copies(&self) -> bool {
        self.is_virtual || self.map_to_resources
    }

    pub fn total_size(&self) -> u64 {
        self.objects.values().map(|o| o.size).sum()
    }
}
