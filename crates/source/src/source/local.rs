//! Local filesystem source.
//!
//! Walks a directory tree with `tokio::fs`. The bytes are already local, so
//! retrieval never touches the blob cache: it only hashes the file in place.

use super::{KeyStream, LocalCopy, Source, Want, ensure_file, error_stream, folder_prefix};
use crate::error::{ErrorKind, Result};
use crate::key::Key;
use crate::metadata::Toolchain;
use crate::path::{to_value, validate as validate_value};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use vault_blobstore::Digest;
use vault_blobstore::error::ErrorKind as BlobErrorKind;
use vault_config::Scheme;

enum WalkEntry {
    File(Key),
    Folder(Key, PathBuf),
    Skip,
}

/// A directory tree on the local filesystem.
///
/// # Examples
///
/// ```no_run
/// use vault_source::{FilesystemSource, Toolchain};
///
/// # fn example() -> vault_source::error::Result<()> {
/// let source = FilesystemSource::new("scans", "/data/scans", Toolchain::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FilesystemSource {
    name: String,
    /// Absolute root directory
    root: PathBuf,
    toolchain: Toolchain,
}
impl FilesystemSource {
    /// Create a source rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendUnavailable`](ErrorKind::BackendUnavailable) if the
    /// root doesn't exist or isn't a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, toolchain: Toolchain) -> Result<Self> {
        let root = std::path::absolute(root.as_ref()).map_err(ErrorKind::Io)?;
        if !root.is_dir() {
            exn::bail!(ErrorKind::BackendUnavailable(format!("not a directory: {}", root.display())));
        }
        Ok(Self {
            name: name.into(),
            root,
            toolchain,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path behind a key value.
    fn absolute_path(&self, value: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_value(value)?))
    }

    /// Hash the file behind `key` in place.
    ///
    /// The file may vanish between the caller's `stat` and the read; that is
    /// still a missing key, not a cache failure.
    async fn hash(&self, key: &Key, path: &Path) -> Result<Digest> {
        match Digest::of_file(path).await {
            Ok(digest) => Ok(digest),
            Err(err) if matches!(&*err, BlobErrorKind::NotFound(_)) => {
                exn::bail!(ErrorKind::NotFound(key.value().to_string()))
            },
            Err(err) => Err(err).or_raise(|| ErrorKind::Cache),
        }
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.display().to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    fn modified(metadata: &Metadata) -> OffsetDateTime {
        metadata.modified().map(OffsetDateTime::from).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Classify one directory entry, following symlinks to files but never
    /// descending through symlinked directories.
    async fn process_entry(&self, path: PathBuf) -> Result<WalkEntry> {
        let link = fs::symlink_metadata(&path).await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = path.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::InvalidArgument(format!("path `{}` is not within root `{}`", path.display(), self.root.display()))
        })?;
        let value = to_value(relative);
        if link.is_dir() {
            return Ok(WalkEntry::Folder(Key::folder(value, Self::modified(&link)), path));
        }
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {
                Ok(WalkEntry::File(Key::file(value, metadata.len(), Self::modified(&metadata))))
            },
            // Note: silently drop broken symlinks, sockets, symlinked dirs...
            _ => Ok(WalkEntry::Skip),
        }
    }

    /// Entries of one directory, sorted so walks are deterministic. Only one
    /// directory's worth of names is held at a time.
    async fn read_sorted(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    fn walk<'a>(&'a self, filter: Option<&'a Key>, recurse: bool, want: Want) -> KeyStream<'a> {
        let start = match folder_prefix(filter).and_then(|prefix| self.absolute_path(prefix)) {
            Ok(start) => start,
            Err(e) => return error_stream(e),
        };

        Box::pin(stream! {
            // Worklist of directories still to read, with the key to yield
            // when each one is reached (none for the starting directory).
            let mut stack: Vec<(PathBuf, Option<Key>)> = vec![(start, None)];
            while let Some((dir, key)) = stack.pop() {
                if let Some(key) = key {
                    yield Ok(key);
                }
                let paths = match Self::read_sorted(&dir).await {
                    Ok(paths) => paths,
                    // Consistent with object storage: listing a folder that
                    // doesn't exist is empty, not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &dir)));
                        continue;
                    },
                };
                let mut children = Vec::new();
                for path in paths {
                    match self.process_entry(path).await {
                        Ok(WalkEntry::File(key)) if want == Want::Files => yield Ok(key),
                        Ok(WalkEntry::Folder(key, _)) if want == Want::Folders && !recurse => yield Ok(key),
                        Ok(WalkEntry::Folder(key, path)) if recurse => {
                            let key = (want == Want::Folders).then_some(key);
                            children.push((path, key));
                        },
                        Ok(_) => {},
                        Err(e) => yield Err(e),
                    }
                }
                // Reversed, so the first child is visited first.
                stack.extend(children.into_iter().rev());
            }
        })
    }
}

#[async_trait]
impl Source for FilesystemSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scheme(&self) -> Scheme {
        Scheme::LocalFile
    }

    fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn list_folders<'a>(&'a self, filter: Option<&'a Key>, recurse: bool) -> KeyStream<'a> {
        self.walk(filter, recurse, Want::Folders)
    }

    fn list_files<'a>(&'a self, filter: Option<&'a Key>, recurse: bool) -> KeyStream<'a> {
        self.walk(filter, recurse, Want::Files)
    }

    async fn key_exists(&self, key: &Key) -> Result<bool> {
        let path = self.absolute_path(key.value())?;
        Ok(match fs::metadata(&path).await {
            Ok(metadata) => metadata.is_dir() == key.is_folder(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        })
    }

    async fn get_temp_file(&self, key: &Key) -> Result<LocalCopy> {
        ensure_file(key)?;
        let path = self.absolute_path(key.value())?;
        let metadata = fs::metadata(&path).await.map_err(|e| Self::map_io_error(e, &path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(key.value().to_string()));
        }
        let digest = self.hash(key, &path).await?;
        tracing::debug!(source = %self.name, key = key.value(), %digest, "Hashed local file");
        Ok(LocalCopy { path, digest })
    }
}
