//! Config loading shared by commands

use anyhow::{Context, Result};
use logtrail_core::config::{IdentityStrategyKind, StartPosition, WatchBackend};
use logtrail_core::TailConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default config location: `~/.config/logtrail/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("logtrail").join("config.toml"))
}

/// Load the config named on the command line, else the default file if it
/// exists, else built-in defaults
pub fn load_config(explicit: Option<&Path>) -> Result<TailConfig> {
    if let Some(path) = explicit {
        return TailConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }
    match default_config_path() {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "Loading default config");
            TailConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))
        }
        _ => Ok(TailConfig::default()),
    }
}

/// Command-line flags win over the config file
pub fn apply_overrides(
    config: &mut TailConfig,
    from_start: bool,
    signature: bool,
    poll: bool,
    offsets: Option<PathBuf>,
) {
    if from_start {
        config.reader.start = StartPosition::Beginning;
    }
    if signature {
        config.identity.strategy = IdentityStrategyKind::Signature;
    }
    if poll {
        config.watch.backend = WatchBackend::Poll;
    }
    if offsets.is_some() {
        config.offsets.path = offsets;
    }
}
