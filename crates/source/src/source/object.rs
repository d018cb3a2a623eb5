//! Object storage source.
//!
//! Listings page through the bucket with `/` as delimiter, one prefix at a
//! time. Key values are object keys with the source prefix cut off, byte for
//! byte: `a//b`, `/x` and `a/../b` are all distinct objects and are never
//! normalized into one another. Retrieval downloads into the shared [`BlobStore`], and remembers
//! which digest each ETag resolved to so unchanged objects are only ever
//! downloaded once.

use super::{KeyStream, LocalCopy, Source, Want, ensure_file, error_stream, folder_prefix};
use crate::error::{ErrorKind, Result};
use crate::key::Key;
use crate::metadata::Toolchain;
use crate::remote::{ObjectEntry, ObjectStoreHandle};
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vault_blobstore::{BLOCK_SIZE, BlobStore, Digest, DigestHasher};
use vault_config::Scheme;

const DELIMITER: &str = "/";

/// Remote ETag → digest of the content it was last downloaded as.
///
/// Filled on each successful download and never invalidated on its own.
#[derive(Debug, Default)]
pub struct EtagCache {
    entries: RwLock<HashMap<String, Digest>>,
}

impl EtagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, etag: &str) -> Option<Digest> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(etag).copied()
    }

    pub fn insert(&self, etag: impl Into<String>, digest: Digest) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(etag.into(), digest);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// A bucket, optionally narrowed to a key prefix.
pub struct ObjectStorageSource {
    name: String,
    store: ObjectStoreHandle,
    /// Empty, or a prefix ending with `/`.
    prefix: String,
    blobs: Arc<BlobStore>,
    etags: EtagCache,
    toolchain: Toolchain,
}

impl ObjectStorageSource {
    /// Connect to a bucket, checking that it exists.
    ///
    /// `prefix` is used as given, with a `/` appended if it lacks one.
    ///
    /// # Errors
    ///
    /// [`BackendUnavailable`](ErrorKind::BackendUnavailable) if the bucket
    /// doesn't exist or can't be reached.
    #[tracing::instrument(skip_all, fields(source = %name.as_ref(), bucket = store.bucket()))]
    pub async fn connect(
        name: impl AsRef<str>,
        store: ObjectStoreHandle,
        prefix: Option<&str>,
        blobs: Arc<BlobStore>,
        toolchain: Toolchain,
    ) -> Result<Self> {
        let prefix = match prefix {
            Some(prefix) if !prefix.is_empty() && !prefix.ends_with(DELIMITER) => format!("{prefix}{DELIMITER}"),
            Some(prefix) => prefix.to_string(),
            None => String::new(),
        };
        if !store.bucket_exists().await? {
            exn::bail!(ErrorKind::BackendUnavailable(format!("no such bucket: {}", store.bucket())));
        }
        tracing::debug!(prefix, "Connected to bucket");
        Ok(Self {
            name: name.as_ref().to_string(),
            store,
            prefix,
            blobs,
            etags: EtagCache::new(),
            toolchain,
        })
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    /// Key prefix every value is relative to (empty for the whole bucket).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn etag_cache(&self) -> &EtagCache {
        &self.etags
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    /// Full object key for a file value.
    fn object_key(&self, value: &str) -> Result<String> {
        // No listing ever produces these as a file.
        if value.is_empty() || value.ends_with(DELIMITER) || value.contains('\0') {
            exn::bail!(ErrorKind::InvalidArgument(format!("not an object key: `{value}`")));
        }
        Ok(format!("{}{value}", self.prefix))
    }

    /// Full listing prefix for a folder value (empty, or ending with `/`).
    fn folder_key(&self, value: &str) -> Result<String> {
        if (!value.is_empty() && !value.ends_with(DELIMITER)) || value.contains('\0') {
            exn::bail!(ErrorKind::InvalidArgument(format!("not a folder prefix: `{value}`")));
        }
        Ok(format!("{}{value}", self.prefix))
    }

    fn relative<'k>(&self, key: &'k str) -> &'k str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }

    fn file_key(&self, entry: ObjectEntry) -> Key {
        let key = Key::file(self.relative(&entry.key), entry.size, entry.last_modified);
        match entry.etag {
            Some(etag) => key.with_metadata(crate::key::ETAG_PROPERTY, etag),
            None => key,
        }
    }

    fn walk<'a>(&'a self, filter: Option<&'a Key>, recurse: bool, want: Want) -> KeyStream<'a> {
        let start = match folder_prefix(filter).and_then(|value| self.folder_key(value)) {
            Ok(start) => start,
            Err(e) => return error_stream(e),
        };

        Box::pin(stream! {
            // Worklist of prefixes still to list, with the key to yield when
            // each one is reached (none for the starting prefix).
            let mut stack: Vec<(String, Option<Key>)> = vec![(start, None)];
            while let Some((prefix, key)) = stack.pop() {
                if let Some(key) = key {
                    yield Ok(key);
                }
                let mut children = Vec::new();
                let mut token = None;
                loop {
                    let page = match self.store.list_page(&prefix, Some(DELIMITER), token.take(), None).await {
                        Ok(page) => page,
                        Err(e) => {
                            yield Err(e);
                            break;
                        },
                    };
                    for folder in page.common_prefixes {
                        let key = Key::folder(self.relative(&folder), OffsetDateTime::UNIX_EPOCH);
                        match (want, recurse) {
                            (Want::Folders, false) => yield Ok(key),
                            (Want::Folders, true) => children.push((folder, Some(key))),
                            (Want::Files, true) => children.push((folder, None)),
                            (Want::Files, false) => {},
                        }
                    }
                    if want == Want::Files {
                        for entry in page.contents {
                            // Zero-byte "directory marker" objects.
                            if entry.key.ends_with(DELIMITER) {
                                continue;
                            }
                            yield Ok(self.file_key(entry));
                        }
                    }
                    match page.next_token {
                        Some(next) => token = Some(next),
                        None => break,
                    }
                }
                // Reversed, so the first child is visited first.
                stack.extend(children.into_iter().rev());
            }
        })
    }

    /// Stream an object into the blob store, hashing it on the way.
    ///
    /// The download lands in a staging file inside the blob store root,
    /// which is removed when this returns, whatever the outcome.
    #[tracing::instrument(skip(self), fields(source = %self.name, digest = tracing::field::Empty))]
    async fn download(&self, object_key: &str) -> Result<Digest> {
        let mut body = self.store.get_object(object_key).await?;
        let temp = self.blobs.staging_file().or_raise(|| ErrorKind::Cache)?;
        let mut file = tokio::fs::File::from_std(temp.as_file().try_clone().map_err(ErrorKind::Io)?);

        let mut hasher = DigestHasher::new();
        let mut buf = vec![0u8; BLOCK_SIZE];
        loop {
            let n = body.read(&mut buf).await.map_err(|e| ErrorKind::Network(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await.map_err(ErrorKind::Io)?;
        }
        file.flush().await.map_err(ErrorKind::Io)?;
        drop(file);

        let size = hasher.len();
        let digest = hasher.finish();
        tracing::Span::current().record("digest", tracing::field::display(digest));
        self.blobs.add_file(temp.path(), Some(&digest)).await.or_raise(|| ErrorKind::Cache)?;
        tracing::info!(size, "Downloaded object");
        Ok(digest)
    }
}

#[async_trait]
impl Source for ObjectStorageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scheme(&self) -> Scheme {
        Scheme::ObjectStorage
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
        if key.is_file() {
            return Ok(self.store.head_object(&self.object_key(key.value())?).await?.is_some());
        }
        let prefix = self.folder_key(key.value())?;
        if prefix.is_empty() {
            return self.store.bucket_exists().await;
        }
        let page = self.store.list_page(&prefix, None, None, Some(1)).await?;
        Ok(!page.contents.is_empty() || !page.common_prefixes.is_empty())
    }

    async fn get_temp_file(&self, key: &Key) -> Result<LocalCopy> {
        ensure_file(key)?;
        let object_key = self.object_key(key.value())?;
        let etag = match key.etag() {
            Some(etag) => Some(etag.to_string()),
            None => {
                let entry = self.store.head_object(&object_key).await?;
                entry.ok_or_raise(|| ErrorKind::NotFound(key.value().to_string()))?.etag
            },
        };

        if let Some(etag) = &etag
            && let Some(digest) = self.etags.get(etag)
            && let Some(path) = self.blobs.get_blob_path(&digest).await
        {
            tracing::debug!(source = %self.name, key = key.value(), %digest, "Blob cache hit");
            return Ok(LocalCopy { path, digest });
        }

        let digest = self.download(&object_key).await?;
        if let Some(etag) = etag {
            self.etags.insert(etag, digest);
        }
        let path = self.blobs.get_blob_path(&digest).await.ok_or_raise(|| ErrorKind::Cache)?;
        Ok(LocalCopy { path, digest })
    }
}
