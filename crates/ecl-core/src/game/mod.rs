pub mod identity;
pub mod installer;
pub mod java;
pub mod launcher;
pub mod metadata;
pub mod rules;

// Re-export commonly used types
pub use identity::LaunchIdentity;
pub use installer::config::LauncherConfig;
pub use installer::types::{CancelHandle, CancelToken, GameLayout, Platform, ProgressReporter};
pub use installer::{install_version, InstalledVersion};
pub use java::{ConfiguredJava, JavaRuntimeProvider};
pub use launcher::{launch_version, prepare_launch, GameProcess, LaunchCommand, PreparedLaunch};
pub use metadata::{installed_versions, VersionSelector};
