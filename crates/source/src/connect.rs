//! Resolve a source descriptor into a live source.

use crate::error::{ErrorKind, Result};
use crate::metadata::Toolchain;
use crate::source::{FilesystemSource, Source};
use std::sync::Arc;
use vault_blobstore::BlobStore;
use vault_config::{ObjectStorageOptions, Scheme, SourceDescriptor};

/// Shared handle to a connected source.
pub type SourceHandle = Arc<dyn Source + Send + Sync>;

/// Connect to the backend named by `descriptor`.
///
/// The scheme is resolved here, once; everything after works through the
/// [`Source`] trait. Object storage sources download into `blobs`.
///
/// # Errors
///
/// [`BackendUnavailable`](ErrorKind::BackendUnavailable) if the location
/// doesn't exist, or if object storage support isn't compiled in (the `s3`
/// feature).
#[tracing::instrument(skip_all, fields(source = %descriptor.name, scheme = ?descriptor.scheme))]
pub async fn connect(
    descriptor: &SourceDescriptor,
    blobs: Arc<BlobStore>,
    toolchain: Toolchain,
    options: &ObjectStorageOptions,
) -> Result<SourceHandle> {
    let source: SourceHandle = match descriptor.scheme {
        // Local files are read in place; the blob store isn't needed.
        Scheme::LocalFile => Arc::new(FilesystemSource::new(&descriptor.name, &descriptor.location, toolchain)?),
        Scheme::ObjectStorage => connect_object_storage(descriptor, blobs, toolchain, options).await?,
    };
    tracing::info!(location = %descriptor.location, "Source connected");
    Ok(source)
}

#[cfg(feature = "s3")]
async fn connect_object_storage(
    descriptor: &SourceDescriptor,
    blobs: Arc<BlobStore>,
    toolchain: Toolchain,
    options: &ObjectStorageOptions,
) -> Result<SourceHandle> {
    use crate::remote::S3ObjectStore;
    use crate::source::ObjectStorageSource;

    let (bucket, prefix) = descriptor.bucket_and_prefix();
    if bucket.is_empty() {
        exn::bail!(ErrorKind::InvalidArgument(format!("source `{}` has no bucket", descriptor.name)));
    }
    let store = Arc::new(S3ObjectStore::new(bucket, options)?);
    let source = ObjectStorageSource::connect(&descriptor.name, store, prefix, blobs, toolchain).await?;
    Ok(Arc::new(source))
}

#[cfg(not(feature = "s3"))]
async fn connect_object_storage(
    descriptor: &SourceDescriptor,
    _blobs: Arc<BlobStore>,
    _toolchain: Toolchain,
    _options: &ObjectStorageOptions,
) -> Result<SourceHandle> {
    exn::bail!(ErrorKind::BackendUnavailable(format!(
        "source `{}` needs object storage support (the `s3` feature)",
        descriptor.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn blobs() -> (tempfile::TempDir, Arc<BlobStore>) {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::open(dir.path().join("blobs")).await.unwrap());
        (dir, blobs)
    }

    #[tokio::test]
    async fn test_connect_local() {
        let (dir, blobs) = blobs().await;
        let root = dir.path().join("data");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        let descriptor = SourceDescriptor::new("local", Scheme::LocalFile, root.to_string_lossy());
        let source = connect(&descriptor, blobs, Toolchain::default(), &ObjectStorageOptions::default())
            .await
            .unwrap();
        assert_eq!(source.name(), "local");
        assert_eq!(source.scheme(), Scheme::LocalFile);
        let files: Vec<_> = source.all_file_keys().try_collect().await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_local_missing_root() {
        let (dir, blobs) = blobs().await;
        let descriptor = SourceDescriptor::new("local", Scheme::LocalFile, dir.path().join("nope").to_string_lossy());
        let err = connect(&descriptor, blobs, Toolchain::default(), &ObjectStorageOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(&*err, ErrorKind::BackendUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[cfg(not(feature = "s3"))]
    #[tokio::test]
    async fn test_connect_object_storage_without_s3() {
        let (_dir, blobs) = blobs().await;
        let descriptor = SourceDescriptor::new("remote", Scheme::ObjectStorage, "bucket/prefix");
        let err = connect(&descriptor, blobs, Toolchain::default(), &ObjectStorageOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(&*err, ErrorKind::BackendUnavailable(_)));
    }

    #[cfg(feature = "s3")]
    #[tokio::test]
    async fn test_connect_object_storage_without_credentials() {
        let (_dir, blobs) = blobs().await;
        let descriptor = SourceDescriptor::new("remote", Scheme::ObjectStorage, "bucket/prefix");
        let err = connect(&descriptor, blobs, Toolchain::default(), &ObjectStorageOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
    }
}
