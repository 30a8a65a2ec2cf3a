//! Path eligibility for tailing
//!
//! Combines three sources, any of which can exclude a path:
//! 1. Built-in exclusions (editor temp files, OS metadata files)
//! 2. Configured gitignore-style patterns
//! 3. A caller-supplied predicate (must return `true` to accept)

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use logtrail_core::config::FilterConfig;
use logtrail_core::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Caller predicate deciding whether a path is eligible
pub type PathPredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Decides which files inside a watched directory are tailed
#[derive(Clone)]
pub struct PathFilter {
    /// Directory patterns are relative to
    root: PathBuf,
    builtin: bool,
    patterns: Option<Gitignore>,
    predicate: Option<PathPredicate>,
}

impl PathFilter {
    /// Filter accepting everything except built-in exclusions
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            builtin: true,
            patterns: None,
            predicate: None,
        }
    }

    /// Build from config for a watched root
    pub fn from_config(root: impl Into<PathBuf>, config: &FilterConfig) -> Result<Self> {
        let mut filter = Self::new(root);
        filter.builtin = config.builtin;
        filter.set_patterns(&config.patterns)?;
        Ok(filter)
    }

    /// Replace the gitignore-style patterns
    pub fn set_patterns<S: AsRef<str>>(&mut self, patterns: &[S]) -> Result<()> {
        if patterns.is_empty() {
            self.patterns = None;
            return Ok(());
        }
        let mut builder = GitignoreBuilder::new(&self.root);
        for pattern in patterns {
            builder
                .add_line(None, pattern.as_ref())
                .map_err(|e| Error::Config(format!("filter pattern {:?}: {}", pattern.as_ref(), e)))?;
        }
        let built = builder
            .build()
            .map_err(|e| Error::Config(format!("filter patterns: {}", e)))?;
        self.patterns = Some(built);
        Ok(())
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` should be tailed
    pub fn accepts(&self, path: &Path) -> bool {
        if self.builtin && is_builtin_excluded(path) {
            return false;
        }

        // Patterns only apply below the root
        if let (Some(patterns), Ok(relative)) = (&self.patterns, path.strip_prefix(&self.root)) {
            if patterns
                .matched_path_or_any_parents(relative, false)
                .is_ignore()
            {
                return false;
            }
        }

        match &self.predicate {
            Some(predicate) => predicate(path),
            None => true,
        }
    }

    /// Number of active exclusion sources
    pub fn active_sources(&self) -> usize {
        usize::from(self.builtin)
            + usize::from(self.patterns.is_some())
            + usize::from(self.predicate.is_some())
    }
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathFilter")
            .field("root", &self.root)
            .field("builtin", &self.builtin)
            .field("patterns", &self.patterns.as_ref().map(|p| p.num_ignores()))
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Editor swap/backup files and OS metadata files
fn is_builtin_excluded(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    // Vim swap files
    if name.ends_with(".swp") || name.ends_with(".swo") || name.ends_with(".swx") {
        return true;
    }
    // Backup files
    if name.ends_with('~') {
        return true;
    }
    // Emacs auto-save and lock files
    if (name.starts_with('#') && name.ends_with('#')) || name.starts_with(".#") {
        return true;
    }
    // macOS
    if name == ".DS_Store" || name.starts_with("._") {
        return true;
    }
    // Windows
    name == "Thumbs.db" || name == "desktop.ini"
}
