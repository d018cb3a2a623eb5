//! The source contract and its two implementations.
//!
//! A [`Source`] is an immutable reference to one backend location. It owns no
//! keys: every enumeration builds fresh [`Key`]s lazily, as the caller polls
//! the returned stream. Dropping a stream part-way stops any further backend
//! work, which is the only cancellation mechanism there is.

mod local;
mod object;

pub use self::local::FilesystemSource;
pub use self::object::{EtagCache, ObjectStorageSource};

use crate::error::{ErrorKind, Result};
use crate::key::Key;
use crate::metadata::Toolchain;
use async_trait::async_trait;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use vault_blobstore::Digest;
use vault_config::Scheme;

/// Lazily produced keys. Errors are yielded in-line; enumeration carries on
/// past them where it can.
pub type KeyStream<'a> = Pin<Box<dyn Stream<Item = Result<Key>> + Send + 'a>>;

/// A file's bytes, available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCopy {
    /// Readable path holding the content: the original file for local
    /// sources, the blob cache entry for remote ones.
    pub path: PathBuf,
    pub digest: Digest,
}

/// Unified interface over a local directory tree and a remote bucket.
///
/// # Examples
///
/// ```no_run
/// use futures::TryStreamExt;
/// # use vault_source::{Source, error::Result};
/// # async fn example(source: &dyn Source) -> Result<()> {
/// let mut files = source.all_file_keys();
/// while let Some(key) = files.try_next().await? {
///     let enriched = source.get_file_metadata(&key).await?;
///     println!("{}: {:?}", enriched.value(), enriched.digest());
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Source: Send + Sync {
    /// Name from the source descriptor (used for logging).
    fn name(&self) -> &str;

    fn scheme(&self) -> Scheme;

    /// Tools run by [`get_file_metadata()`](Self::get_file_metadata).
    fn toolchain(&self) -> &Toolchain;

    /// Folders under `filter` (or the root).
    ///
    /// Without `recurse` only immediate children are produced. With it,
    /// every descendant folder is produced exactly once, depth first. The
    /// stream yields a single [`InvalidArgument`](ErrorKind::InvalidArgument)
    /// error if `filter` is a file key.
    fn list_folders<'a>(&'a self, filter: Option<&'a Key>, recurse: bool) -> KeyStream<'a>;

    /// Files under `filter` (or the root), with size and modification time
    /// filled in from backend metadata. Same rules as
    /// [`list_folders()`](Self::list_folders).
    fn list_files<'a>(&'a self, filter: Option<&'a Key>, recurse: bool) -> KeyStream<'a>;

    /// Every file in the source.
    fn all_file_keys(&self) -> KeyStream<'_> {
        self.list_files(None, true)
    }

    /// Cheap existence probe. Never downloads content.
    async fn key_exists(&self, key: &Key) -> Result<bool>;

    /// Make the file's bytes available locally and report their digest.
    async fn get_temp_file(&self, key: &Key) -> Result<LocalCopy>;

    /// Resolve the file's bytes, attach their digest, then run every enabled
    /// tool over them.
    ///
    /// Failure to resolve the bytes fails the whole call. A tool failing only
    /// omits that tool's properties.
    async fn get_file_metadata(&self, key: &Key) -> Result<Key> {
        ensure_file(key)?;
        let local = self.get_temp_file(key).await?;
        let key = key.clone().with_digest(local.digest);
        Ok(self.toolchain().enrich(key, &local.path).await)
    }
}

/// Value prefix of an optional folder filter.
pub(crate) fn folder_prefix(filter: Option<&Key>) -> Result<&str> {
    match filter {
        None => Ok(""),
        Some(key) if key.is_folder() => Ok(key.value()),
        Some(key) => exn::bail!(ErrorKind::InvalidArgument(format!("expected a folder key, got file `{}`", key.value()))),
    }
}

pub(crate) fn ensure_file(key: &Key) -> Result<()> {
    if key.is_folder() {
        exn::bail!(ErrorKind::InvalidArgument(format!("expected a file key, got folder `{}`", key.value())));
    }
    Ok(())
}

pub(crate) fn error_stream<'a>(err: crate::error::Error) -> KeyStream<'a> {
    Box::pin(futures::stream::once(async { Err(err) }))
}

/// What a walk should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Want {
    Files,
    Folders,
}
