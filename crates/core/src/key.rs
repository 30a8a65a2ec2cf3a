//! File identity keys
//!
//! A [`FileKey`] names "the same underlying file across time", independent of
//! its current path. Two constructions exist:
//!
//! - [`FileKey::Native`]: device + inode (or the platform equivalent). Stable
//!   across rename, not across copy, and unreliable on filesystems that recycle
//!   identities (network mounts).
//! - [`FileKey::Signature`]: a serial handed out by the content-signature
//!   resolver, which maps a [`ContentSignature`] of the file's leading bytes to
//!   a stable serial (see `logtrail-watcher`).

use crate::hash::{hash_bytes, Blake3Hash};
use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// OS file identity (device + inode on Unix)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeId {
    pub dev: u64,
    pub ino: u64,
}

impl NativeId {
    /// Extract the identity from file metadata
    #[cfg(unix)]
    pub fn from_metadata(meta: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    /// Extract the identity from file metadata
    ///
    /// Without inode numbers the creation time is the best stable value std
    /// exposes; it survives rename and differs for a recreated file.
    #[cfg(not(unix))]
    pub fn from_metadata(meta: &Metadata) -> Option<Self> {
        let created = meta.created().ok()?;
        let nanos = created
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_nanos();
        Some(Self {
            dev: (nanos >> 64) as u64,
            ino: nanos as u64,
        })
    }

    /// Stat `path` and return its identity. `None` if it does not exist or
    /// cannot be read.
    pub fn of_path(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Self::from_metadata(&meta)
    }
}

/// Opaque, hashable identity of a logical file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileKey {
    Native(NativeId),
    Signature(u64),
}

impl FileKey {
    /// Key used for persisted reader positions
    pub fn storage_key(&self) -> String {
        match self {
            FileKey::Native(id) => format!("ino:{}:{}", id.dev, id.ino),
            FileKey::Signature(serial) => format!("sig:{}", serial),
        }
    }

    /// Whether the key means the same file in a later process. Signature
    /// serials are assigned per process.
    pub fn is_persistent(&self) -> bool {
        matches!(self, FileKey::Native(_))
    }
}

impl std::fmt::Display for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKey::Native(id) => write!(f, "{}:{}", id.dev, id.ino),
            FileKey::Signature(serial) => write!(f, "sig#{}", serial),
        }
    }
}

/// Outcome of comparing two content signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMatch {
    /// Same start offset, same bytes
    Exact,
    /// One is a strict byte prefix of the other (file still growing)
    Partial,
    Mismatch,
}

impl SignatureMatch {
    pub fn is_match(self) -> bool {
        !matches!(self, SignatureMatch::Mismatch)
    }
}

/// Fingerprint of a file's leading bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSignature {
    /// Byte offset the window starts at
    pub offset: u64,
    /// Window contents (at most the configured window size)
    pub bytes: Vec<u8>,
    /// Digest of `bytes`
    pub digest: Blake3Hash,
    /// Native identity at load time, used as tiebreaker
    pub native: Option<NativeId>,
}

impl ContentSignature {
    /// Build a signature from already-read bytes
    pub fn from_bytes(offset: u64, bytes: Vec<u8>, native: Option<NativeId>) -> Self {
        let digest = hash_bytes(&bytes);
        Self {
            offset,
            bytes,
            digest,
            native,
        }
    }

    /// Read up to `window` bytes starting at `offset`
    pub fn load(path: &Path, offset: u64, window: usize) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let native = NativeId::from_metadata(&meta);
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }

        let mut bytes = Vec::with_capacity(window.min(meta.len() as usize));
        file.take(window as u64).read_to_end(&mut bytes)?;
        Ok(Self::from_bytes(offset, bytes, native))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the window holds `window` bytes (further growth cannot change it)
    pub fn is_full(&self, window: usize) -> bool {
        self.bytes.len() >= window
    }

    /// Compare two signatures.
    ///
    /// An empty window carries no content, so the native identity decides.
    pub fn compare(&self, other: &ContentSignature) -> SignatureMatch {
        if self.offset != other.offset {
            return SignatureMatch::Mismatch;
        }
        if self.is_empty() || other.is_empty() {
            return match (self.native, other.native) {
                (Some(a), Some(b)) if a == b => SignatureMatch::Partial,
                _ => SignatureMatch::Mismatch,
            };
        }
        if self.bytes.len() == other.bytes.len() {
            return if self.digest == other.digest {
                SignatureMatch::Exact
            } else {
                SignatureMatch::Mismatch
            };
        }

        let (short, long) = if self.bytes.len() < other.bytes.len() {
            (&self.bytes, &other.bytes)
        } else {
            (&other.bytes, &self.bytes)
        };
        if long.starts_with(short) {
            SignatureMatch::Partial
        } else {
            SignatureMatch::Mismatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sig(bytes: &[u8]) -> ContentSignature {
        ContentSignature::from_bytes(0, bytes.to_vec(), None)
    }

    #[test]
    fn test_exact_and_partial_match() {
        assert_eq!(sig(b"alpha\n").compare(&sig(b"alpha\n")), SignatureMatch::Exact);
        assert_eq!(
            sig(b"alpha\n").compare(&sig(b"alpha\nbeta\n")),
            SignatureMatch::Partial
        );
        assert_eq!(
            sig(b"alpha\nbeta\n").compare(&sig(b"alpha\n")),
            SignatureMatch::Partial
        );
        assert_eq!(sig(b"alpha\n").compare(&sig(b"gamma\n")), SignatureMatch::Mismatch);
        assert_eq!(sig(b"alpha").compare(&sig(b"alpine")), SignatureMatch::Mismatch);
    }

    #[test]
    fn test_different_offsets_never_match() {
        let a = ContentSignature::from_bytes(0, b"same".to_vec(), None);
        let b = ContentSignature::from_bytes(4, b"same".to_vec(), None);
        assert_eq!(a.compare(&b), SignatureMatch::Mismatch);
    }

    #[test]
    fn test_empty_signature_falls_back_to_native() {
        let id = NativeId { dev: 1, ino: 42 };
        let other = NativeId { dev: 1, ino: 43 };
        let empty = ContentSignature::from_bytes(0, Vec::new(), Some(id));
        let same = ContentSignature::from_bytes(0, b"grown".to_vec(), Some(id));
        let different = ContentSignature::from_bytes(0, Vec::new(), Some(other));

        assert!(empty.compare(&same).is_match());
        assert_eq!(empty.compare(&different), SignatureMatch::Mismatch);
        assert_eq!(sig(b"").compare(&sig(b"")), SignatureMatch::Mismatch);
    }

    #[test]
    fn test_load_respects_window() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        fs::write(&path, vec![b'x'; 4096]).unwrap();

        let signature = ContentSignature::load(&path, 0, 1024).unwrap();
        assert_eq!(signature.len(), 1024);
        assert!(signature.is_full(1024));
        assert!(signature.native.is_some());

        let tail = ContentSignature::load(&path, 4000, 1024).unwrap();
        assert_eq!(tail.len(), 96);
    }

    #[test]
    fn test_native_id_stable_across_rename() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("a.log");
        let to = temp_dir.path().join("b.log");
        fs::write(&from, b"data\n").unwrap();

        let before = NativeId::of_path(&from).unwrap();
        fs::rename(&from, &to).unwrap();
        assert_eq!(NativeId::of_path(&to), Some(before));
        assert_eq!(NativeId::of_path(&from), None);
    }

    #[test]
    fn test_storage_key_format() {
        let key = FileKey::Native(NativeId { dev: 7, ino: 99 });
        assert_eq!(key.storage_key(), "ino:7:99");
        assert_eq!(FileKey::Signature(3).storage_key(), "sig:3");
    }
}
