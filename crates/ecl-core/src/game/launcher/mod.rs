/// Game launcher module: natives, classpath, arguments and the game process
pub mod arguments;
pub mod classpath;
pub mod natives;
pub mod process;
pub mod types;
pub mod version_parser;

pub use arguments::{substitute, synthesize, SynthesisError};
pub use classpath::{build_classpath, classpath_entries, validate_classpath};
pub use natives::{extract_all_natives, extract_natives, ExtractError};
pub use process::{launch, GameProcess, OUTPUT_BUFFER};
pub use types::{
    KeepAlive, LaunchCommand, LaunchError, LaunchOptions, OutputLine, OutputStream,
    ProcessOptions,
};
pub use version_parser::{parse_version_json, Argument, Library, VersionDescriptor};

use crate::game::identity::LaunchIdentity;
use crate::game::installer::config::LauncherConfig;
use crate::game::installer::types::Platform;
use crate::game::installer::InstalledVersion;
use crate::game::java::{verify_java, JavaRuntimeProvider};
use crate::game::rules::FeatureSet;
use anyhow::{Context, Result};
use std::time::Duration;

/// A synthesized command plus how to run it
#[derive(Debug, Clone)]
pub struct PreparedLaunch {
    pub command: LaunchCommand,
    pub process: ProcessOptions,
}

/// Turn an installed version into a ready-to-spawn command
pub async fn prepare_launch(
    config: &LauncherConfig,
    installed: &InstalledVersion,
    platform: &Platform,
    identity: &LaunchIdentity,
    java: &dyn JavaRuntimeProvider,
    features: &FeatureSet,
    resolution: Option<(u32, u32)>,
) -> Result<PreparedLaunch> {
    let descriptor = &installed.descriptor;
    let layout = config.layout();
    log::info!("[prepare_launch] start: version_id={}", descriptor.id);

    let java_path = java
        .java_for(descriptor.java_major)
        .with_context(|| format!("No Java runtime for {}", descriptor.id))?;
    let java_major = verify_java(&java_path)
        .await
        .context("Java verification failed")?;
    if java_major < descriptor.java_major {
        log::warn!(
            "{} wants Java {} but {:?} is Java {}",
            descriptor.id,
            descriptor.java_major,
            java_path,
            java_major
        );
    }

    log::debug!("Building classpath");
    let entries = classpath_entries(&installed.acquired.libraries, &layout, &descriptor.id)
        .context("Failed to build classpath")?;
    validate_classpath(&entries)
        .context("Classpath validation failed - missing required libraries")?;
    let classpath = classpath::join_classpath(&entries, platform.os);

    let mut options = LaunchOptions::new(&java_path, &layout, &installed.game_dir)
        .with_launcher(&config.launcher_name, &config.launcher_version);
    options.features = features.clone();
    options.resolution = resolution;
    options.game_assets = installed.acquired.game_assets.clone();
    options.extra_jvm_args = config.memory.jvm_flags();

    let command = synthesize(
        descriptor,
        platform,
        &classpath,
        &installed.natives_dir,
        identity,
        &options,
    )
    .with_context(|| format!("Failed to build arguments for {}", descriptor.id))?;

    log::info!(
        "Exec command: {}",
        command.display_masked(&[identity.access_token.as_str()])
    );

    let mut process = ProcessOptions::new(&installed.game_dir)
        .with_log_file(config.data_dir.join("logs").join(format!("{}.log", descriptor.id)));
    if let Some(secs) = config.keep_alive_secs.filter(|s| *s > 0) {
        process = process.with_keep_alive(KeepAlive {
            interval: Duration::from_secs(secs),
            ..KeepAlive::default()
        });
    }
    if config.detach_game {
        process = process.detached();
    }

    Ok(PreparedLaunch { command, process })
}

/// Prepare and start the game
pub async fn launch_version(
    config: &LauncherConfig,
    installed: &InstalledVersion,
    platform: &Platform,
    identity: &LaunchIdentity,
    java: &dyn JavaRuntimeProvider,
    features: &FeatureSet,
    resolution: Option<(u32, u32)>,
) -> Result<GameProcess> {
    let prepared = prepare_launch(config, installed, platform, identity, java, features, resolution)
        .await?;
    let game = launch(&prepared.command, &prepared.process)
        .await
        .context("Failed to spawn game process")?;
    log::info!(
        "[launch_version] {} started (pid={:?})",
        installed.descriptor.id,
        game.pid()
    );
    Ok(game)
}
