use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;

use ecl_core::game::installer::types::CancelToken;
use ecl_core::game::rules::FeatureSet;
use ecl_core::game::{
    install_version, launch_version, ConfiguredJava, LaunchIdentity, LauncherConfig, Platform,
    ProgressReporter, VersionSelector,
};

struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn start_step(&self, name: &str, total_steps: Option<u32>) {
        println!("[STEP START] {} (total: {:?})", name, total_steps);
    }

    fn set_percent(&self, percent: i32) {
        println!("[PROGRESS] {}%", percent);
    }

    fn set_message(&self, message: &str) {
        println!("[MSG] {}", message);
    }

    fn set_step_count(&self, current: u32, total: Option<u32>) {
        println!("[STEP COUNT] {}/{:?}", current, total);
    }

    fn done(&self, success: bool, message: Option<&str>) {
        println!("[DONE] success={} message={:?}", success, message);
    }
}

/// Usage: test_install [version|latest] [player] [--launch]
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let selector: VersionSelector = args
        .first()
        .map(String::as_str)
        .unwrap_or("latest")
        .parse()?;
    let player = args.get(1).cloned().unwrap_or_else(|| "Player".to_string());
    let should_launch = args.iter().any(|a| a == "--launch");

    let settings = std::env::var_os("ECL_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ecl-settings.json"));
    let config = LauncherConfig::load(&settings)?;
    let platform = Platform::current();
    println!(
        "Installing {} into {} for {}/{:?}",
        selector,
        config.data_dir.display(),
        platform.os.as_str(),
        platform.arch
    );

    let (handle, cancel) = CancelToken::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Cancelling...");
            handle.cancel();
        }
    });

    let features = FeatureSet::new();
    let installed = match install_version(
        &config,
        &selector,
        &platform,
        &features,
        Arc::new(ConsoleReporter),
        cancel,
    )
    .await
    {
        Ok(installed) => installed,
        Err(e) => {
            println!("Install failed: {:?}", e);
            std::process::exit(1);
        }
    };
    println!(
        "Installed {} ({} files, {} downloaded)",
        installed.descriptor.id, installed.acquired.total, installed.acquired.downloaded
    );

    if !should_launch {
        return Ok(());
    }

    let java = ConfiguredJava::new(config.java.clone());
    let identity = LaunchIdentity::offline(player);
    let mut game = launch_version(
        &config,
        &installed,
        &platform,
        &identity,
        &java,
        &features,
        None,
    )
    .await?;

    if let Some(mut output) = game.output() {
        while let Some(line) = output.next().await {
            println!("[{}] {}", line.stream.as_str(), line.line);
        }
    }
    let code = game.wait().await?;
    println!("Game exited with {:?}", code);

    Ok(())
}
