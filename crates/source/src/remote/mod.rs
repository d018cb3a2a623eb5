//! Object storage client seam.
//!
//! [`ObjectStorageSource`](crate::ObjectStorageSource) only ever talks to a
//! bucket through [`ObjectStore`], which covers the handful of requests it
//! needs: a bucket probe, one page of a delimited listing, a HEAD and a GET.

#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(feature = "s3")]
mod s3;

#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockObjectStore;
#[cfg(feature = "s3")]
pub use self::s3::S3ObjectStore;

use crate::error::Result;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::AsyncRead;

/// Shared handle to an object store client.
pub type ObjectStoreHandle = Arc<dyn ObjectStore>;

/// Streamed object content.
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// One object, as reported by a listing or a HEAD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full object key, including any source prefix.
    pub key: String,
    pub size: u64,
    pub last_modified: OffsetDateTime,
    /// Entity tag with surrounding quotes removed.
    pub etag: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Full prefixes rolled up by the delimiter, each ending with it.
    pub common_prefixes: Vec<String>,
    pub contents: Vec<ObjectEntry>,
    /// Pass back to [`ObjectStore::list_page`] to fetch the next page.
    pub next_token: Option<String>,
}

/// The requests a bucket-backed source makes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> Result<bool>;

    /// List one page of keys starting with `prefix`.
    ///
    /// With a `delimiter`, keys containing it past the prefix are rolled up
    /// into [`ListPage::common_prefixes`] instead of being listed.
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
        max_keys: Option<i32>,
    ) -> Result<ListPage>;

    /// Object metadata, or `None` if there's no such object.
    async fn head_object(&self, key: &str) -> Result<Option<ObjectEntry>>;

    /// Stream an object's content. A missing object is
    /// [`NotFound`](crate::error::ErrorKind::NotFound).
    async fn get_object(&self, key: &str) -> Result<ObjectBody>;
}

/// Entity tags come back quoted; compare them without the quotes.
pub(crate) fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("\"abc123\"", "abc123")]
    #[case("abc123", "abc123")]
    #[case("\"d41d8cd98f00b204e9800998ecf8427e-2\"", "d41d8cd98f00b204e9800998ecf8427e-2")]
    fn test_normalize_etag(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_etag(raw), expected);
    }
}
