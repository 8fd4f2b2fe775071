pub mod config;
pub mod core;
pub mod types;
pub mod vanilla;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::game::installer::config::LauncherConfig;
use crate::game::installer::core::downloader::Fetcher;
use crate::game::installer::types::{CancelToken, Platform, ProgressReporter};
use crate::game::installer::vanilla::{AcquiredVersion, Acquisition, AcquisitionError};
use crate::game::launcher::natives::extract_all_natives;
use crate::game::launcher::version_parser::VersionDescriptor;
use crate::game::metadata::{ManifestResolver, VersionSelector};
use crate::game::rules::FeatureSet;

/// Everything the launch step needs from a finished install
#[derive(Debug)]
pub struct InstalledVersion {
    pub descriptor: VersionDescriptor,
    pub acquired: AcquiredVersion,
    pub natives_dir: PathBuf,
    pub game_dir: PathBuf,
}

/// Resolve, download and unpack a version so it is ready to launch.
///
/// Re-running is cheap: verified files are skipped and partial downloads
/// resume.
pub async fn install_version(
    config: &LauncherConfig,
    selector: &VersionSelector,
    platform: &Platform,
    features: &FeatureSet,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
) -> Result<InstalledVersion> {
    log::info!("Starting installation: version={}", selector);
    let layout = config.layout();

    reporter.set_message("Starting installation...");
    reporter.set_percent(0);

    let fetcher = Fetcher::new(config.download.clone()).context("Failed to build HTTP client")?;
    let resolver = ManifestResolver::new(
        fetcher.clone(),
        layout.clone(),
        config.manifest_url(),
        cancel.clone(),
    );

    reporter.start_step("Resolving version", None);
    let descriptor = resolver
        .resolve_version(selector)
        .await
        .with_context(|| format!("Failed to resolve version {}", selector))?;
    let asset_index = resolver
        .resolve_asset_index(&descriptor.asset_index)
        .await
        .with_context(|| format!("Failed to fetch asset index {}", descriptor.asset_index.id))?;
    reporter.set_percent(10);

    let game_dir = config.game_dir(&descriptor.id);
    tokio::fs::create_dir_all(&game_dir)
        .await
        .with_context(|| format!("Failed to create game directory {:?}", game_dir))?;

    let acquisition = Acquisition::new(fetcher, layout.clone(), reporter.clone(), cancel)
        .with_game_dir(&game_dir)
        .with_retry_passes(1);
    let acquired = match acquisition
        .acquire(&descriptor, &asset_index, platform, features)
        .await
    {
        Ok(acquired) => acquired,
        Err(err) => {
            let message = match &err {
                AcquisitionError::Cancelled => "Installation cancelled",
                _ => "Installation failed",
            };
            reporter.done(false, Some(message));
            return Err(err).with_context(|| format!("Failed to acquire {}", descriptor.id));
        }
    };

    reporter.start_step("Extracting natives", None);
    let natives_dir = layout.natives_dir(&descriptor.id);
    let libraries = acquired.libraries.clone();
    let extract_into = natives_dir.clone();
    let arch = platform.arch;
    let natives = tokio::task::spawn_blocking(move || {
        extract_all_natives(&libraries, &layout, &extract_into, arch)
    })
    .await
    .context("Native extraction task failed")?;

    if !natives.failures.is_empty() {
        reporter.done(false, Some("Native extraction failed"));
        let detail = natives
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.library, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        anyhow::bail!("Failed to extract natives for {}: {}", descriptor.id, detail);
    }

    log::info!(
        "Installed {}: {} files ({} cached, {} downloaded, {} bytes), {} natives",
        descriptor.id,
        acquired.total,
        acquired.cached,
        acquired.downloaded,
        acquired.downloaded_bytes,
        natives.extracted
    );
    reporter.set_percent(100);
    reporter.done(true, Some("Installation complete"));

    Ok(InstalledVersion {
        descriptor,
        acquired,
        natives_dir,
        game_dir,
    })
}
