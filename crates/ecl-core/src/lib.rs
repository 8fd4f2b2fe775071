//! Acquisition and launch engine for a Minecraft launcher: resolves version
//! manifests, downloads and verifies game files, extracts natives and builds
//! the game command line.

pub mod game;
pub mod utils;
