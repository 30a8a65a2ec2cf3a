//! Tailing configuration
//!
//! Loaded from TOML; every field has a default so partial files work.
//!
//! ```toml
//! [identity]
//! strategy = "signature"
//! signature_window = 1024
//! freshness_ms = 2000
//!
//! [reader]
//! start = "end"
//!
//! [filter]
//! patterns = ["*.gz"]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    pub identity: IdentityConfig,
    pub reader: ReaderConfig,
    pub tail: StreamConfig,
    pub watch: WatchConfig,
    pub filter: FilterConfig,
    pub offsets: OffsetsConfig,
}

/// How file identity is established
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStrategyKind {
    /// Device + inode
    #[default]
    Native,
    /// Leading-bytes fingerprint (network filesystems)
    Signature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub strategy: IdentityStrategyKind,
    /// Prefix window read for content signatures (default: 1024)
    pub signature_window: usize,
    /// Cached signatures older than this are reloaded (default: 2000ms)
    pub freshness_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            strategy: IdentityStrategyKind::Native,
            signature_window: 1024,
            freshness_ms: 2000,
        }
    }
}

impl IdentityConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }
}

/// Where a reader starts on a file that was already present when tailing began
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    Beginning,
    #[default]
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Bytes read per disk read (default: 8192)
    pub buffer_size: usize,
    pub start: StartPosition,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            start: StartPosition::End,
        }
    }
}

/// When per-file streams open their file handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenPolicy {
    /// As soon as the file is tracked
    Eager,
    /// On first read interest
    #[default]
    Lazy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub open: OpenPolicy,
    /// Track files in subdirectories too (default: false)
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// inotify / FSEvents / ReadDirectoryChangesW
    #[default]
    Native,
    /// Periodic stat polling
    Poll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub backend: WatchBackend,
    /// Poll backend interval (default: 500ms)
    pub poll_interval_ms: u64,
    /// Maximum raw events per batch (default: 256)
    pub batch_size: usize,
    /// How long the worker keeps collecting a batch (default: 20ms)
    pub batch_window_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backend: WatchBackend::Native,
            poll_interval_ms: 500,
            batch_size: 256,
            batch_window_ms: 20,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Exclude editor temp files and OS metadata files (default: true)
    pub builtin: bool,
    /// Additional gitignore-style exclude patterns
    pub patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            patterns: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetsConfig {
    /// Directory of the persistent offset database; in-memory when unset
    pub path: Option<PathBuf>,
}

impl TailConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TailConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        check_range(
            "identity.signature_window",
            self.identity.signature_window as u64,
            16,
            65_536,
        )?;
        check_range("identity.freshness_ms", self.identity.freshness_ms, 0, 3_600_000)?;
        check_range(
            "reader.buffer_size",
            self.reader.buffer_size as u64,
            64,
            16 * 1024 * 1024,
        )?;
        check_range("watch.poll_interval_ms", self.watch.poll_interval_ms, 10, 60_000)?;
        check_range("watch.batch_size", self.watch.batch_size as u64, 1, 65_536)?;
        check_range("watch.batch_window_ms", self.watch.batch_window_ms, 0, 10_000)?;
        Ok(())
    }

    /// Annotated example config
    pub fn example() -> &'static str {
        r#"# logtrail configuration

[identity]
# "native" (device + inode) or "signature" (leading bytes, for network mounts)
strategy = "native"
signature_window = 1024
freshness_ms = 2000

[reader]
buffer_size = 8192
# where files present at startup are read from: "beginning" or "end"
start = "end"

[tail]
# "eager" opens every tracked file immediately, "lazy" on first read
open = "lazy"
recursive = false

[watch]
# "native" or "poll"
backend = "native"
poll_interval_ms = 500
batch_size = 256
batch_window_ms = 20

[filter]
builtin = true
patterns = ["*.gz", "*.zip"]

[offsets]
# path = "/var/lib/logtrail/offsets"
"#
    }
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(Error::Config(format!(
            "{} = {} is out of range ({}..={})",
            key, value, min, max
        )));
    }
    Ok(())
}
