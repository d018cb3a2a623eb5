//! Flat, content-addressed blob store.
//!
//! Every blob lives directly under the store root in a file named after its
//! [`Digest`]. The directory listing *is* the index: the in-memory counters
//! are only a cache of it and can be rebuilt with [`BlobStore::reload`] after
//! something outside this process has touched the directory.
//!
//! The store does no locking of its own. Concurrent readers are fine;
//! concurrent writers against the same root must be serialized by the caller.

use crate::digest::{BLOCK_SIZE, Digest, DigestWriter};
use crate::error::{ErrorKind, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::instrument;

/// Hidden prefix for files being copied into the store. Never a valid
/// digest, so listing/reloading skips them.
const STAGING_PREFIX: &str = ".staging-";

/// A stored blob whose content no longer matches its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    /// Digest the blob is stored under.
    pub expected: Digest,
    /// Digest of what is actually on disk.
    pub actual: Digest,
    pub path: PathBuf,
}

/// Outcome of [`BlobStore::hash_check`].
#[derive(Debug, Clone, Default)]
pub struct HashCheck {
    checked: u64,
    corrupted: Vec<Corruption>,
}
impl HashCheck {
    /// `true` when every stored blob hashed to its own name.
    pub fn passed(&self) -> bool {
        self.corrupted.is_empty()
    }

    /// Number of blobs that were re-hashed.
    pub fn checked(&self) -> u64 {
        self.checked
    }

    pub fn corrupted(&self) -> &[Corruption] {
        &self.corrupted
    }
}

/// Content-addressed cache of byte payloads keyed by [`Digest`].
///
/// # Examples
///
/// ```no_run
/// use vault_blobstore::BlobStore;
///
/// # async fn example() -> vault_blobstore::error::Result<()> {
/// let store = BlobStore::open("/var/cache/vault/blobs").await?;
/// let digest = store.add_file("/tmp/report.pdf", None).await?;
/// assert!(store.has_copy(&digest).await);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    /// Digest → size of every blob known to be stored.
    index: RwLock<HashMap<Digest, u64>>,
}

impl BlobStore {
    /// Open (creating if necessary) a blob store rooted at `root`, and build
    /// its index from whatever is already there.
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if `root` exists but
    /// isn't a directory.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        match fs::metadata(&root).await {
            Ok(metadata) if !metadata.is_dir() => exn::bail!(ErrorKind::InvalidPath(root)),
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&root).await.map_err(ErrorKind::Io)?;
            },
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        }
        let store = Self {
            root,
            index: RwLock::new(HashMap::new()),
        };
        store.reload().await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of blobs currently indexed.
    pub fn blob_count(&self) -> u64 {
        self.read_index().len() as u64
    }

    /// Sum of the sizes of every indexed blob.
    pub fn total_size(&self) -> u64 {
        self.read_index().values().sum()
    }

    /// Size of a stored blob, if indexed.
    pub fn blob_size(&self, digest: &Digest) -> Option<u64> {
        self.read_index().get(digest).copied()
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.to_hex())
    }

    /// Whether a copy of `digest` is stored.
    ///
    /// Checks the directory rather than the index, so a blob deleted behind
    /// the store's back is reported as missing.
    pub async fn has_copy(&self, digest: &Digest) -> bool {
        fs::metadata(self.blob_path(digest)).await.is_ok_and(|m| m.is_file())
    }

    /// Path of the stored copy of `digest`, if there is one.
    pub async fn get_blob_path(&self, digest: &Digest) -> Option<PathBuf> {
        let path = self.blob_path(digest);
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Some(path),
            _ => None,
        }
    }

    /// Copy a file into the store, returning its digest.
    ///
    /// The file is read in bounded blocks and hashed while it is copied to a
    /// staging file inside the store, so it is never held in memory. If the
    /// store already holds that digest the staged copy is discarded and the
    /// call is a no-op.
    ///
    /// # Errors
    /// - [`NotFound`](ErrorKind::NotFound) if `path` doesn't exist.
    /// - [`Integrity`](ErrorKind::Integrity) if `expected` is given and the
    ///   content hashes to something else. Nothing is left in the store.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display(), digest = tracing::field::Empty))]
    pub async fn add_file(&self, path: impl AsRef<Path>, expected: Option<&Digest>) -> Result<Digest> {
        let source = path.as_ref().to_path_buf();
        let root = self.root.clone();
        let (staged, digest, size) = tokio::task::spawn_blocking(move || stage(&root, &source))
            .await
            .map_err(|e| ErrorKind::Io(std::io::Error::other(e)))??;
        tracing::Span::current().record("digest", tracing::field::display(digest));

        if let Some(expected) = expected
            && *expected != digest
        {
            // Dropping the staged file removes it.
            drop(staged);
            exn::bail!(ErrorKind::Integrity {
                expected: *expected,
                actual: digest,
            });
        }

        let target = self.blob_path(&digest);
        if self.has_copy(&digest).await {
            tracing::debug!("Blob already stored; discarding duplicate");
            self.write_index().entry(digest).or_insert(size);
            return Ok(digest);
        }
        staged.persist(&target).map_err(|e| ErrorKind::Io(e.error))?;
        self.write_index().insert(digest, size);
        tracing::debug!(size, "Blob stored");
        Ok(digest)
    }

    /// Delete the stored copy of `digest`. Returns whether there was one.
    pub async fn remove(&self, digest: &Digest) -> Result<bool> {
        let removed = match fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        };
        self.write_index().remove(digest);
        Ok(removed)
    }

    /// Re-hash every stored blob and compare it with its name.
    ///
    /// This detects corruption, it doesn't repair it: corrupted blobs are
    /// reported and left where they are.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn hash_check(&self) -> Result<HashCheck> {
        let mut report = HashCheck::default();
        for (expected, path, _) in self.scan().await? {
            let actual = Digest::of_file(&path).await?;
            report.checked += 1;
            if actual != expected {
                tracing::warn!(%expected, %actual, path = %path.display(), "Stored blob does not match its digest");
                report.corrupted.push(Corruption { expected, actual, path });
            }
        }
        Ok(report)
    }

    /// Create an empty staging file inside the root, for callers that want
    /// to write content themselves before handing it to
    /// [`add_file()`](Self::add_file).
    ///
    /// The file is deleted when the handle is dropped. One left behind by a
    /// crash is removed by [`clear()`](Self::clear) and never mistaken for a
    /// blob.
    pub fn staging_file(&self) -> Result<NamedTempFile> {
        staging_file(&self.root)
    }

    /// Remove every blob (and any abandoned staging file). Calling this on
    /// an empty store does nothing.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.root).await.map_err(ErrorKind::Io)?;
        let mut removed = 0u64;
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(STAGING_PREFIX) && blob_name(&name).is_none() {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => exn::bail!(ErrorKind::Io(e)),
            }
        }
        self.write_index().clear();
        tracing::info!(removed, "Blob store cleared");
        Ok(())
    }

    /// Rebuild the in-memory index from the directory contents.
    pub async fn reload(&self) -> Result<()> {
        let index: HashMap<Digest, u64> = self.scan().await?.into_iter().map(|(d, _, size)| (d, size)).collect();
        tracing::debug!(root = %self.root.display(), blobs = index.len(), "Blob store index loaded");
        *self.write_index() = index;
        Ok(())
    }

    /// Every regular file in the root named exactly as [`Digest::to_hex`]
    /// would name it.
    async fn scan(&self) -> Result<Vec<(Digest, PathBuf, u64)>> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| ErrorKind::from_io(e, &self.root))?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            let Some(digest) = blob_name(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            // Something else may delete the file between listing and stat.
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_file() {
                found.push((digest, entry.path(), metadata.len()));
            }
        }
        Ok(found)
    }

    fn read_index(&self) -> RwLockReadGuard<'_, HashMap<Digest, u64>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, HashMap<Digest, u64>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The digest a directory entry is the blob of, if any.
///
/// Only the canonical lowercase name counts: `DA39...` is not the blob
/// `da39...`, and `get_blob_path` would never find it.
fn blob_name(name: &str) -> Option<Digest> {
    Digest::from_hex(name).ok().filter(|digest| digest.to_hex() == name)
}

fn staging_file(root: &Path) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new().prefix(STAGING_PREFIX).tempfile_in(root).map_err(ErrorKind::Io)?)
}

/// Copy `source` into a staging file under `root`, hashing as we go.
fn stage(root: &Path, source: &Path) -> Result<(NamedTempFile, Digest, u64)> {
    let input = File::open(source).map_err(|e| ErrorKind::from_io(e, source))?;
    let staged = staging_file(root)?;
    let mut reader = BufReader::with_capacity(BLOCK_SIZE, input);
    let mut writer = DigestWriter::new(BufWriter::with_capacity(BLOCK_SIZE, staged));
    let size = std::io::copy(&mut reader, &mut writer).map_err(ErrorKind::Io)?;
    let (buffered, digest) = writer.finish();
    let staged = buffered.into_inner().map_err(|e| ErrorKind::Io(e.into_error()))?;
    Ok((staged, digest, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("blobs")).await.unwrap();
        (dir, store)
    }

    fn write(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_open_creates_root() {
        let (_dir, store) = store().await;
        assert!(store.root().is_dir());
        assert_eq!(store.blob_count(), 0);
        assert_eq!(store.total_size(), 0);
    }

    #[tokio::test]
    async fn test_open_rejects_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, "not-a-dir", b"data");
        let err = BlobStore::open(&file).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_add_file_stores_under_digest() {
        let (dir, store) = store().await;
        let source = write(&dir, "a.txt", b"hello world");
        let digest = store.add_file(&source, None).await.unwrap();
        assert_eq!(digest, Digest::of_bytes(b"hello world"));
        let path = store.get_blob_path(&digest).await.unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), digest.to_hex());
        assert_eq!(std::fs::read(path).unwrap(), b"hello world");
        assert_eq!(store.blob_size(&digest), Some(11));
    }

    #[tokio::test]
    async fn test_add_file_is_idempotent() {
        let (dir, store) = store().await;
        let first = write(&dir, "first.txt", b"same bytes");
        let second = write(&dir, "second.txt", b"same bytes");
        let a = store.add_file(&first, None).await.unwrap();
        assert_eq!(store.blob_count(), 1);
        let b = store.add_file(&second, None).await.unwrap();
        let c = store.add_file(&first, None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(store.blob_count(), 1);
        assert_eq!(store.total_size(), 10);
    }

    #[tokio::test]
    async fn test_has_copy_before_and_after() {
        let (dir, store) = store().await;
        let digest = Digest::of_bytes(b"payload");
        assert!(!store.has_copy(&digest).await);
        assert!(store.get_blob_path(&digest).await.is_none());
        store.add_file(write(&dir, "p", b"payload"), None).await.unwrap();
        assert!(store.has_copy(&digest).await);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let (dir, store) = store().await;
        let digest = store.add_file(write(&dir, "empty", b""), None).await.unwrap();
        assert_eq!(digest.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(store.blob_size(&digest), Some(0));
    }

    #[tokio::test]
    async fn test_add_file_with_matching_expectation() {
        let (dir, store) = store().await;
        let expected = Digest::of_bytes(b"checked");
        let digest = store.add_file(write(&dir, "c", b"checked"), Some(&expected)).await.unwrap();
        assert_eq!(digest, expected);
    }

    #[tokio::test]
    async fn test_add_file_integrity_failure_leaves_nothing() {
        let (dir, store) = store().await;
        let source = write(&dir, "c", b"actual content");
        let err = store.add_file(&source, Some(&Digest::EMPTY)).await.unwrap_err();
        match &*err {
            ErrorKind::Integrity { expected, actual } => {
                assert_eq!(*expected, Digest::EMPTY);
                assert_eq!(*actual, Digest::of_bytes(b"actual content"));
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_add_missing_file() {
        let (dir, store) = store().await;
        let err = store.add_file(dir.path().join("missing"), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_hash_check_detects_corruption() {
        let (dir, store) = store().await;
        let good = store.add_file(write(&dir, "g", b"good"), None).await.unwrap();
        let bad = store.add_file(write(&dir, "b", b"soon to be bad"), None).await.unwrap();
        let report = store.hash_check().await.unwrap();
        assert!(report.passed());
        assert_eq!(report.checked(), 2);

        std::fs::write(store.get_blob_path(&bad).await.unwrap(), b"tampered").unwrap();
        let report = store.hash_check().await.unwrap();
        assert!(!report.passed());
        assert_eq!(report.corrupted().len(), 1);
        assert_eq!(report.corrupted()[0].expected, bad);
        assert_eq!(report.corrupted()[0].actual, Digest::of_bytes(b"tampered"));
        assert_ne!(report.corrupted()[0].expected, good);
    }

    #[tokio::test]
    async fn test_deleted_copy_is_absent() {
        let (dir, store) = store().await;
        let digest = store.add_file(write(&dir, "x", b"only copy"), None).await.unwrap();
        // Deleted behind the store's back.
        std::fs::remove_file(store.get_blob_path(&digest).await.unwrap()).unwrap();
        assert!(store.get_blob_path(&digest).await.is_none());
        assert!(!store.has_copy(&digest).await);
    }

    #[tokio::test]
    async fn test_remove() {
        let (dir, store) = store().await;
        let digest = store.add_file(write(&dir, "x", b"only copy"), None).await.unwrap();
        assert!(store.remove(&digest).await.unwrap());
        assert!(!store.remove(&digest).await.unwrap());
        assert!(store.get_blob_path(&digest).await.is_none());
        assert!(!store.has_copy(&digest).await);
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (dir, store) = store().await;
        store.add_file(write(&dir, "1", b"one"), None).await.unwrap();
        store.add_file(write(&dir, "2", b"two"), None).await.unwrap();
        assert_eq!(store.blob_count(), 2);
        store.clear().await.unwrap();
        assert_eq!(store.blob_count(), 0);
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
        store.clear().await.unwrap();
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_reload_picks_up_external_changes() {
        let (dir, store) = store().await;
        let digest = store.add_file(write(&dir, "1", b"one"), None).await.unwrap();
        // Another process drops a blob in, and removes ours.
        let outsider = Digest::of_bytes(b"outsider");
        std::fs::write(store.root().join(outsider.to_hex()), b"outsider").unwrap();
        std::fs::remove_file(store.root().join(digest.to_hex())).unwrap();
        // Junk that isn't named after a digest is ignored.
        std::fs::write(store.root().join("README"), b"not a blob").unwrap();
        assert_eq!(store.blob_count(), 1);
        store.reload().await.unwrap();
        assert_eq!(store.blob_count(), 1);
        assert_eq!(store.blob_size(&outsider), Some(8));
        assert_eq!(store.blob_size(&digest), None);
        assert_eq!(store.total_size(), 8);
    }

    #[tokio::test]
    async fn test_only_lowercase_names_are_blobs() {
        let (_dir, store) = store().await;
        let digest = Digest::of_bytes(b"shouting");
        let upper = store.root().join(digest.to_hex().to_uppercase());
        std::fs::write(&upper, b"shouting").unwrap();
        store.reload().await.unwrap();
        assert_eq!(store.blob_count(), 0);
        assert!(!store.has_copy(&digest).await);
        assert_eq!(store.hash_check().await.unwrap().checked(), 0);
        // Not a blob, so not ours to delete either.
        store.clear().await.unwrap();
        assert!(upper.exists());
    }

    #[tokio::test]
    async fn test_abandoned_staging_file_is_cleared() {
        let (_dir, store) = store().await;
        let staged = store.staging_file().unwrap();
        std::fs::write(staged.path(), b"half a download").unwrap();
        let (_, leftover) = staged.keep().unwrap();
        assert_eq!(leftover.parent(), Some(store.root()));
        store.reload().await.unwrap();
        assert_eq!(store.blob_count(), 0);
        store.clear().await.unwrap();
        assert!(!leftover.exists());
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_reopen_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blobs");
        let digest = {
            let store = BlobStore::open(&root).await.unwrap();
            store.add_file(write(&dir, "f", b"persisted"), None).await.unwrap()
        };
        let store = BlobStore::open(&root).await.unwrap();
        assert_eq!(store.blob_count(), 1);
        assert!(store.has_copy(&digest).await);
    }
}
