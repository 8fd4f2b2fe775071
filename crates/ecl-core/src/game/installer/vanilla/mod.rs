//! Vanilla acquisition: expands a resolved descriptor into every file the
//! version needs and drives them through the bounded download pool.

use crate::game::installer::config::RESOURCES_URL;
use crate::game::installer::core::batch::{dedupe_by_dest, BatchDownloader, BatchReport, FailedTask};
use crate::game::installer::core::downloader::Fetcher;
use crate::game::installer::core::library::{resolve_libraries, LibraryResolveError, ResolvedLibrary};
use crate::game::installer::types::{
    CancelToken, DownloadTask, GameLayout, Platform, ProgressReporter, TaskKind,
};
use crate::game::launcher::version_parser::VersionDescriptor;
use crate::game::metadata::types::AssetIndex;
use crate::game::rules::FeatureSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("{} download(s) failed ({succeeded} succeeded): {}", .failures.len(), summarize(.failures))]
    Incomplete {
        succeeded: usize,
        failures: Vec<FailedTask>,
    },

    #[error("acquisition cancelled")]
    Cancelled,

    #[error(transparent)]
    Libraries(#[from] LibraryResolveError),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AcquisitionError {
    /// Every URL that could not be fetched
    pub fn failed_urls(&self) -> Vec<&str> {
        match self {
            AcquisitionError::Incomplete { failures, .. } => {
                failures.iter().map(|f| f.url()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn summarize(failures: &[FailedTask]) -> String {
    const SHOWN: usize = 5;
    let mut text = failures
        .iter()
        .take(SHOWN)
        .map(|f| f.url())
        .collect::<Vec<_>>()
        .join(", ");
    if failures.len() > SHOWN {
        text.push_str(&format!(" and {} more", failures.len() - SHOWN));
    }
    text
}

/// Result of a complete acquisition
#[derive(Debug)]
pub struct AcquiredVersion {
    pub libraries: Vec<ResolvedLibrary>,
    pub total: usize,
    pub cached: usize,
    pub downloaded: usize,
    pub downloaded_bytes: u64,
    /// Name-addressed asset copy for legacy indexes (`${game_assets}`)
    pub game_assets: Option<PathBuf>,
}

pub fn asset_url(hash: &str) -> String {
    format!("{}/{}/{}", RESOURCES_URL, &hash[..2.min(hash.len())], hash)
}

/// Expand a descriptor into download tasks, deduplicated by destination.
///
/// Order: client archive, library artifacts and native classifiers in
/// declaration order, the asset index file, then asset objects.
pub fn plan_downloads(
    layout: &GameLayout,
    descriptor: &VersionDescriptor,
    libraries: &[ResolvedLibrary],
    asset_index: &AssetIndex,
) -> Vec<DownloadTask> {
    let mut tasks = Vec::new();

    let mut client = DownloadTask::new(
        &descriptor.client.url,
        layout.client_jar(&descriptor.id),
        TaskKind::ClientJar,
    );
    client.sha1 = descriptor.client.sha1.clone();
    client.size = descriptor.client.size;
    tasks.push(client);

    for library in libraries {
        let entries = library
            .artifact
            .iter()
            .map(|a| (a, TaskKind::Library))
            .chain(library.native.iter().map(|a| (a, TaskKind::Native)));

        for (artifact, kind) in entries {
            let Some(dest) = layout.library_path(&artifact.path) else {
                continue;
            };
            tasks.push(DownloadTask {
                url: artifact.url.clone(),
                dest,
                sha1: artifact.sha1.clone(),
                size: artifact.size,
                kind,
            });
        }
    }

    let index_ref = &descriptor.asset_index;
    tasks.push(
        DownloadTask::new(
            &index_ref.url,
            layout.asset_index_path(&index_ref.id),
            TaskKind::AssetIndex,
        )
        .with_sha1(&index_ref.sha1)
        .with_size(index_ref.size),
    );

    for object in asset_index.objects.values() {
        tasks.push(
            DownloadTask::new(
                asset_url(&object.hash),
                layout.asset_object_path(&object.hash),
                TaskKind::Asset,
            )
            .with_sha1(&object.hash)
            .with_size(object.size),
        );
    }

    dedupe_by_dest(tasks)
}

/// Copy content-addressed objects to their legacy name-addressed locations.
/// Returns the directory `${game_assets}` should point at.
pub async fn materialize_named_assets(
    layout: &GameLayout,
    index_id: &str,
    index: &AssetIndex,
    game_dir: &Path,
) -> Result<Option<PathBuf>, AcquisitionError> {
    let target = if index.map_to_resources {
        game_dir.join("resources")
    } else if index.is_virtual {
        layout.virtual_assets_dir(index_id)
    } else {
        return Ok(None);
    };

    log::info!(
        "Laying out {} legacy assets under {:?}",
        index.objects.len(),
        target
    );

    for (name, object) in &index.objects {
        let dest = target.join(name);
        if tokio::fs::metadata(&dest)
            .await
            .map(|m| m.len() == object.size)
            .unwrap_or(false)
        {
            continue;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| AcquisitionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let src = layout.asset_object_path(&object.hash);
        tokio::fs::copy(&src, &dest)
            .await
            .map_err(|source| AcquisitionError::Io { path: src, source })?;
    }

    Ok(Some(target))
}

/// Acquisition context shared by one install run
pub struct Acquisition {
    layout: GameLayout,
    game_dir: PathBuf,
    downloader: BatchDownloader,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
    retry_passes: u32,
}

impl Acquisition {
    pub fn new(
        fetcher: Fetcher,
        layout: GameLayout,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancelToken,
    ) -> Self {
        let concurrency = fetcher.config().concurrency;
        Self {
            game_dir: layout.root().to_path_buf(),
            layout,
            downloader: BatchDownloader::new(fetcher, concurrency),
            reporter,
            cancel,
            retry_passes: 0,
        }
    }

    /// Extra passes over exactly the failed subset before giving up
    pub fn with_retry_passes(mut self, passes: u32) -> Self {
        self.retry_passes = passes;
        self
    }

    /// Directory legacy `map_to_resources` assets are copied into
    pub fn with_game_dir(mut self, game_dir: impl Into<PathBuf>) -> Self {
        self.game_dir = game_dir.into();
        self
    }

    pub fn layout(&self) -> &GameLayout {
        &self.layout
    }

    /// Fetch every file the version needs. All tasks run to completion;
    /// failures are reported together.
    pub async fn acquire(
        &self,
        descriptor: &VersionDescriptor,
        asset_index: &AssetIndex,
        platform: &Platform,
        features: &FeatureSet,
    ) -> Result<AcquiredVersion, AcquisitionError> {
        log::info!("Acquiring version {}", descriptor.id);
        self.reporter.start_step("Resolving libraries", None);
        let libraries = resolve_libraries(&descriptor.libraries, platform, features)?;

        let tasks = plan_downloads(&self.layout, descriptor, &libraries, asset_index);
        log::info!(
            "Planned {} downloads ({} libraries, {} assets)",
            tasks.len(),
            libraries.len(),
            asset_index.objects.len()
        );

        self.reporter.start_step("Downloading game files", None);
        let total = tasks.len();
        let mut report = self.run(tasks, 10, 80.0).await;
        let mut succeeded = report.succeeded();
        let mut cached = report.cached;
        let mut downloaded = report.downloaded;
        let mut downloaded_bytes = report.downloaded_bytes;

        let mut pass = 0;
        while !report.failures.is_empty() && pass < self.retry_passes && !self.cancel.is_cancelled()
        {
            pass += 1;
            log::warn!(
                "Retrying {} failed download(s) (pass {}/{})",
                report.failures.len(),
                pass,
                self.retry_passes
            );
            self.reporter
                .set_message(&format!("Retrying {} failed downloads", report.failures.len()));
            let failed = report.failures.into_iter().map(|f| f.task).collect();
            report = self.run(failed, 90, 0.0).await;
            succeeded += report.succeeded();
            cached += report.cached;
            downloaded += report.downloaded;
            downloaded_bytes += report.downloaded_bytes;
        }

        let earlier = succeeded - report.succeeded();
        self.check(report, earlier)?;

        let game_assets = materialize_named_assets(
            &self.layout,
            &descriptor.asset_index.id,
            asset_index,
            &self.game_dir,
        )
        .await?;

        Ok(AcquiredVersion {
            libraries,
            total,
            cached,
            downloaded,
            downloaded_bytes,
            game_assets,
        })
    }

    /// Run an explicit task list, e.g. a previously failed subset.
    pub async fn run(
        &self,
        tasks: Vec<DownloadTask>,
        base_progress: i32,
        progress_weight: f32,
    ) -> BatchReport {
        self.downloader
            .download_all(
                tasks,
                self.reporter.clone(),
                &self.cancel,
                base_progress,
                progress_weight,
            )
            .await
    }

    /// Turn a batch report into a result. `already_succeeded` counts tasks
    /// completed by earlier passes.
    fn check(
        &self,
        report: BatchReport,
        already_succeeded: usize,
    ) -> Result<BatchReport, AcquisitionError> {
        if self.cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }
        if !report.failures.is_empty() {
            let succeeded = already_succeeded + report.succeeded();
            return Err(AcquisitionError::Incomplete {
                succeeded,
                failures: report.failures,
            });
        }
        Ok(report)
    }
}
