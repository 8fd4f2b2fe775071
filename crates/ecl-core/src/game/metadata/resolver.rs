use crate::game::installer::core::downloader::{FetchError, Fetcher};
use crate::game::installer::types::{CancelToken, DownloadTask, GameLayout, TaskKind};
use crate::game::launcher::version_parser::{
    parse_version_descriptor, AssetIndexRef, ManifestFormatError, VersionDescriptor,
};
use crate::game::metadata::types::{AssetIndex, VersionManifestIndex, VersionSelector};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Format(#[from] ManifestFormatError),

    #[error("version {0} not found in the manifest or on disk")]
    VersionNotFound(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ResolveError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolveError::Fetch(e) if e.is_cancelled())
    }
}

/// Turns a version selector into typed descriptor and asset index documents.
///
/// Documents are fetched one after another through the shared [`Fetcher`] and
/// cached at their layout paths; a cached copy whose hash matches the parent
/// document's declaration is reused without a request.
pub struct ManifestResolver {
    fetcher: Fetcher,
    layout: GameLayout,
    manifest_url: String,
    cancel: CancelToken,
}

impl ManifestResolver {
    pub fn new(
        fetcher: Fetcher,
        layout: GameLayout,
        manifest_url: impl Into<String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            fetcher,
            layout,
            manifest_url: manifest_url.into(),
            cancel,
        }
    }

    pub fn layout(&self) -> &GameLayout {
        &self.layout
    }

    /// Fetch the version manifest, refreshing the on-disk copy. When the
    /// remote is unreachable the cached copy is used instead.
    pub async fn load_manifest(&self) -> Result<VersionManifestIndex, ResolveError> {
        let cache = self.layout.manifest_cache();

        match self
            .fetcher
            .fetch_bytes(&self.manifest_url, None, &self.cancel)
            .await
        {
            Ok(bytes) => {
                let manifest = VersionManifestIndex::parse(&bytes)?;
                if let Err(e) = write_cache(&cache, &bytes).await {
                    log::warn!("Failed to cache version manifest at {:?}: {}", cache, e);
                }
                Ok(manifest)
            }
            Err(e) if e.is_cancelled() => Err(e.into()),
            Err(e) => {
                let Ok(bytes) = tokio::fs::read(&cache).await else {
                    return Err(e.into());
                };
                log::warn!(
                    "Version manifest unavailable ({}), using cached copy {:?}",
                    e,
                    cache
                );
                Ok(VersionManifestIndex::parse(&bytes)?)
            }
        }
    }

    /// Resolve a selector to a descriptor.
    ///
    /// An explicit id that the manifest does not list, or any id while the
    /// manifest cannot be fetched, falls back to a descriptor already on disk.
    pub async fn resolve_version(
        &self,
        selector: &VersionSelector,
    ) -> Result<VersionDescriptor, ResolveError> {
        let manifest = match self.load_manifest().await {
            Ok(manifest) => Some(manifest),
            Err(e) if e.is_cancelled() => return Err(e),
            // Only an unreachable manifest is tolerated; a malformed one is an error
            Err(e @ ResolveError::Fetch(_)) if matches!(selector, VersionSelector::Id(_)) => {
                log::warn!("Resolving {} without a manifest: {}", selector, e);
                None
            }
            Err(e) => return Err(e),
        };

        let summary = manifest.as_ref().and_then(|m| m.select(selector));
        let Some(summary) = summary else {
            if let VersionSelector::Id(id) = selector {
                let local = self.layout.version_json(id);
                if local.exists() {
                    log::info!("Using local descriptor for {}: {:?}", id, local);
                    return self.read_descriptor(&local).await;
                }
                return Err(ResolveError::VersionNotFound(id.clone()));
            }
            return Err(ResolveError::VersionNotFound(selector.to_string()));
        };

        log::info!("Resolving version {} ({})", summary.id, summary.version_type);
        let path = self.layout.version_json(&summary.id);
        let mut task = DownloadTask::new(&summary.url, &path, TaskKind::Metadata);
        if let Some(sha1) = &summary.sha1 {
            task = task.with_sha1(sha1);
        }
        self.fetcher.fetch(&task, &self.cancel).await?;

        self.read_descriptor(&path).await
    }

    pub async fn resolve_asset_index(
        &self,
        reference: &AssetIndexRef,
    ) -> Result<AssetIndex, ResolveError> {
        let path = self.layout.asset_index_path(&reference.id);
        let task = DownloadTask::new(&reference.url, &path, TaskKind::AssetIndex)
            .with_sha1(&reference.sha1)
            .with_size(reference.size);
        self.fetcher.fetch(&task, &self.cancel).await?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ResolveError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(AssetIndex::parse(&bytes, &reference.id)?)
    }

    async fn read_descriptor(&self, path: &Path) -> Result<VersionDescriptor, ResolveError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ResolveError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(parse_version_descriptor(
            &bytes,
            &path.display().to_string(),
        )?)
    }
}

async fn write_cache(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// Ids of versions with a descriptor under `versions/<id>/<id>.json`, sorted.
pub fn installed_versions(layout: &GameLayout) -> io::Result<Vec<String>> {
    let dir = layout.versions_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(id) = entry.file_name().into_string() else {
            continue;
        };
        if layout.version_json(&id).is_file() {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}
