//! Identity resolution
//!
//! Maps paths to [`FileKey`]s through a pluggable [`IdentityStrategy`] and
//! keeps one generation of history:
//!
//! - [`Snapshot`]: immutable path -> key map as of the end of the previous batch
//! - [`Resolution`]: the generation being built for the current batch; each
//!   path is resolved at most once, later lookups hit the cache
//!
//! Only one prior snapshot is retained: correlation never looks further back
//! than one batch.

use ahash::AHashMap;
use logtrail_core::config::{IdentityConfig, IdentityStrategyKind};
use logtrail_core::{ContentSignature, FileKey, NativeId, SignatureMatch};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Strategy turning a path into an identity
pub trait IdentityStrategy: Send {
    /// Identity of the regular file at `path`, `None` if it does not exist or
    /// cannot be read right now
    fn identify(&mut self, path: &Path) -> Option<FileKey>;

    /// Drop cached state for a file that is gone for good
    fn forget(&mut self, _key: &FileKey) {}

    fn name(&self) -> &'static str;
}

/// Build the strategy selected in config
pub fn strategy_for(config: &IdentityConfig) -> Box<dyn IdentityStrategy> {
    match config.strategy {
        IdentityStrategyKind::Native => Box::new(NativeStrategy),
        IdentityStrategyKind::Signature => Box::new(SignatureStrategy::new(
            config.signature_window,
            config.freshness(),
        )),
    }
}

/// Device + inode identity: one stat per call
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeStrategy;

impl IdentityStrategy for NativeStrategy {
    fn identify(&mut self, path: &Path) -> Option<FileKey> {
        NativeId::of_path(path).map(FileKey::Native)
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

struct CachedSignature {
    serial: u64,
    signature: ContentSignature,
    observed: Instant,
}

/// Content-signature identity for filesystems without stable inodes
///
/// Each distinct file gets a serial. A path is re-fingerprinted when its cached
/// signature is older than the freshness threshold, its window is not yet
/// full, or its native identity changed. A fresh fingerprint keeps the serial
/// of a known signature it matches exactly or as a prefix.
pub struct SignatureStrategy {
    window: usize,
    freshness: Duration,
    next_serial: u64,
    /// Latest signature seen for each serial
    known: AHashMap<u64, ContentSignature>,
    /// Last path each serial was seen at
    owners: AHashMap<u64, PathBuf>,
    by_path: AHashMap<PathBuf, CachedSignature>,
}

impl SignatureStrategy {
    pub fn new(window: usize, freshness: Duration) -> Self {
        Self {
            window,
            freshness,
            next_serial: 1,
            known: AHashMap::new(),
            owners: AHashMap::new(),
            by_path: AHashMap::new(),
        }
    }

    fn cached(&self, path: &Path, native: NativeId) -> Option<u64> {
        let cached = self.by_path.get(path)?;
        let fresh = cached.observed.elapsed() < self.freshness;
        if fresh && cached.signature.is_full(self.window) && cached.signature.native == Some(native)
        {
            Some(cached.serial)
        } else {
            None
        }
    }

    /// Pick the serial of a known signature matching `signature`.
    ///
    /// Exact beats partial; ties go to the same native identity, then to the
    /// serial this path held before, then to the oldest serial. A serial whose
    /// owner still exists elsewhere as a different native file is skipped.
    fn match_known(&self, path: &Path, signature: &ContentSignature) -> Option<u64> {
        let previous = self.by_path.get(path).map(|c| c.serial);
        let mut best: Option<(u64, (u8, u8, u8))> = None;

        for (&serial, known) in &self.known {
            let grade = match known.compare(signature) {
                SignatureMatch::Exact => 2,
                SignatureMatch::Partial => 1,
                SignatureMatch::Mismatch => continue,
            };
            if self.owned_elsewhere(serial, path, known.native, signature.native) {
                continue;
            }
            let same_native = u8::from(known.native.is_some() && known.native == signature.native);
            let same_path = u8::from(previous == Some(serial));
            let rank = (grade, same_native, same_path);

            let better = match best {
                None => true,
                Some((best_serial, best_rank)) => {
                    rank > best_rank || (rank == best_rank && serial < best_serial)
                }
            };
            if better {
                best = Some((serial, rank));
            }
        }
        best.map(|(serial, _)| serial)
    }

    fn owned_elsewhere(
        &self,
        serial: u64,
        path: &Path,
        known_native: Option<NativeId>,
        native: Option<NativeId>,
    ) -> bool {
        let Some(owner) = self.owners.get(&serial) else {
            return false;
        };
        if owner == path || known_native.is_none() || known_native == native {
            return false;
        }
        NativeId::of_path(owner) == known_native
    }
}

impl IdentityStrategy for SignatureStrategy {
    fn identify(&mut self, path: &Path) -> Option<FileKey> {
        let Some(native) = NativeId::of_path(path) else {
            self.by_path.remove(path);
            return None;
        };
        if let Some(serial) = self.cached(path, native) {
            return Some(FileKey::Signature(serial));
        }

        let signature = match ContentSignature::load(path, 0, self.window) {
            Ok(signature) => signature,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Signature load failed");
                return None;
            }
        };

        let serial = match self.match_known(path, &signature) {
            Some(serial) => serial,
            None => {
                let serial = self.next_serial;
                self.next_serial += 1;
                trace!(path = %path.display(), serial, "New content signature");
                serial
            }
        };

        self.known.insert(serial, signature.clone());
        self.owners.insert(serial, path.to_path_buf());
        self.by_path.insert(
            path.to_path_buf(),
            CachedSignature {
                serial,
                signature,
                observed: Instant::now(),
            },
        );
        Some(FileKey::Signature(serial))
    }

    fn forget(&mut self, key: &FileKey) {
        if let FileKey::Signature(serial) = key {
            self.known.remove(serial);
            self.owners.remove(serial);
            self.by_path.retain(|_, cached| cached.serial != *serial);
        }
    }

    fn name(&self) -> &'static str {
        "signature"
    }
}

/// Identity of every known path at the end of one batch
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    generation: u64,
    paths: AHashMap<PathBuf, FileKey>,
}

impl Snapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, path: &Path) -> Option<FileKey> {
        self.paths.get(path).copied()
    }

    /// A path other than `except` that held `key`
    pub fn holder_of(&self, key: &FileKey, except: &Path) -> Option<&Path> {
        self.paths
            .iter()
            .find(|(path, k)| *k == key && path.as_path() != except)
            .map(|(path, _)| path.as_path())
    }

    pub fn contains_key(&self, key: &FileKey) -> bool {
        self.paths.values().any(|k| k == key)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FileKey)> {
        self.paths.iter().map(|(p, k)| (p.as_path(), k))
    }
}

/// The generation being resolved for the current batch
pub struct Resolution<'a> {
    previous: Arc<Snapshot>,
    resolved: AHashMap<PathBuf, Option<FileKey>>,
    strategy: &'a mut dyn IdentityStrategy,
}

impl<'a> Resolution<'a> {
    /// Current identity of `path` (cached for the rest of this generation)
    pub fn resolve(&mut self, path: &Path) -> Option<FileKey> {
        if let Some(key) = self.resolved.get(path) {
            return *key;
        }
        let key = self.strategy.identify(path);
        self.resolved.insert(path.to_path_buf(), key);
        key
    }

    /// Identity `path` had at the end of the previous batch
    pub fn history(&self, path: &Path) -> Option<FileKey> {
        self.previous.get(path)
    }

    pub fn previous(&self) -> &Snapshot {
        &self.previous
    }

    /// A path other than `except` holding `key` now.
    ///
    /// Paths touched in this batch are answered from their resolution; paths
    /// the previous snapshot associates with `key` are re-resolved (once) to
    /// confirm they still hold it.
    pub fn holder_of(&mut self, key: &FileKey, except: &Path) -> Option<PathBuf> {
        if let Some(path) = self
            .resolved
            .iter()
            .find(|(path, k)| k.as_ref() == Some(key) && path.as_path() != except)
            .map(|(path, _)| path.clone())
        {
            return Some(path);
        }

        let candidates: Vec<PathBuf> = self
            .previous
            .iter()
            .filter(|(path, k)| *k == key && *path != except)
            .map(|(path, _)| path.to_path_buf())
            .collect();
        candidates
            .into_iter()
            .find(|candidate| self.resolve(candidate).as_ref() == Some(key))
    }

    /// A path other than `except` that held `key` before this batch
    pub fn previous_holder_of(&self, key: &FileKey, except: &Path) -> Option<PathBuf> {
        self.previous
            .holder_of(key, except)
            .map(Path::to_path_buf)
    }

    /// Fold this generation's resolutions into the next snapshot
    pub fn into_snapshot(self) -> Snapshot {
        let mut paths = self.previous.paths.clone();
        for (path, key) in self.resolved {
            match key {
                Some(key) => {
                    paths.insert(path, key);
                }
                None => {
                    paths.remove(&path);
                }
            }
        }
        Snapshot {
            generation: self.previous.generation + 1,
            paths,
        }
    }
}

/// Owns the strategy and the latest snapshot
pub struct IdentityResolver {
    strategy: Box<dyn IdentityStrategy>,
    snapshot: Arc<Snapshot>,
}

impl IdentityResolver {
    pub fn new(strategy: Box<dyn IdentityStrategy>) -> Self {
        Self {
            strategy,
            snapshot: Arc::new(Snapshot::default()),
        }
    }

    /// Resolve an initial set of paths into the first snapshot
    pub fn seed<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) {
        let mut resolution = self.begin();
        for path in paths {
            resolution.resolve(&path);
        }
        let snapshot = resolution.into_snapshot();
        self.install(snapshot);
    }

    /// Start a new generation on top of the current snapshot
    pub fn begin(&mut self) -> Resolution<'_> {
        Resolution {
            previous: Arc::clone(&self.snapshot),
            resolved: AHashMap::new(),
            strategy: self.strategy.as_mut(),
        }
    }

    pub fn install(&mut self, snapshot: Snapshot) {
        self.snapshot = Arc::new(snapshot);
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Identity of `path`, from the snapshot if known, otherwise resolved now
    /// and recorded so the next batch has history for it.
    pub fn lookup_or_adopt(&mut self, path: &Path) -> Option<FileKey> {
        if let Some(key) = self.snapshot.get(path) {
            return Some(key);
        }
        let key = self.strategy.identify(path)?;
        Arc::make_mut(&mut self.snapshot)
            .paths
            .insert(path.to_path_buf(), key);
        Some(key)
    }

    pub fn forget(&mut self, key: &FileKey) {
        self.strategy.forget(key);
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}
