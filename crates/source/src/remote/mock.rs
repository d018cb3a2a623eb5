//! In-memory object store for testing.

use super::{ListPage, ObjectBody, ObjectEntry, ObjectStore};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::RwLock;
use vault_blobstore::Digest;

/// In-memory bucket that counts the requests made against it.
///
/// ETags are the SHA-1 of the content, so identical content under different
/// keys shares an ETag (as it would for single-part uploads to S3).
///
/// Needs the `mock` feature outside this crate's own tests.
///
/// # Examples
///
/// ```ignore
/// use vault_source::remote::{MockObjectStore, ObjectStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> vault_source::error::Result<()> {
/// let store = MockObjectStore::with_objects("bucket", [("a/one.txt", "one")]);
/// assert!(store.head_object("a/one.txt").await?.is_some());
/// assert_eq!(store.head_calls(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockObjectStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, (OffsetDateTime, Vec<u8>)>>,
    page_size: usize,
    available: bool,
    /// Bodies fail after this many bytes.
    broken_after: Option<usize>,
    list_calls: AtomicUsize,
    head_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MockObjectStore {
    const DEFAULT_PAGE_SIZE: usize = 1000;

    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
            page_size: Self::DEFAULT_PAGE_SIZE,
            available: true,
            broken_after: None,
            list_calls: AtomicUsize::new(0),
            head_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_objects(
        bucket: impl Into<String>,
        objects: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        let map = objects.into_iter().map(|(key, data)| (key.into(), (now, data.into()))).collect();
        Self {
            objects: RwLock::new(map),
            ..Self::new(bucket)
        }
    }

    /// Cap every listing page at `page_size` entries, to exercise
    /// continuation tokens.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// A store whose bucket doesn't exist.
    pub fn unavailable(bucket: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(bucket)
        }
    }

    /// Every object body fails with a connection error after `bytes` bytes,
    /// like a download cut off half way.
    pub fn with_broken_bodies(mut self, bytes: usize) -> Self {
        self.broken_after = Some(bytes);
        self
    }

    pub async fn put(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.into(), (OffsetDateTime::now_utc(), data.into()));
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.objects.write().await.remove(key).is_some()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::Relaxed)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }

    fn entry(key: &str, modified: OffsetDateTime, data: &[u8]) -> ObjectEntry {
        ObjectEntry {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: modified,
            etag: Some(Digest::of_bytes(data).to_hex()),
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if !self.available {
            exn::bail!(ErrorKind::BackendUnavailable(format!("no such bucket: {}", self.bucket)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        Ok(self.available)
    }

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
        max_keys: Option<i32>,
    ) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        self.ensure_available()?;
        let objects = self.objects.read().await;

        // Prefixes and objects share one ordering, like a real listing.
        let mut items: BTreeMap<String, Option<ObjectEntry>> = BTreeMap::new();
        for (key, (modified, data)) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else { break };
            match delimiter.and_then(|d| rest.find(d).map(|idx| idx + d.len())) {
                Some(end) => {
                    items.entry(format!("{prefix}{}", &rest[..end])).or_insert(None);
                },
                None => {
                    items.insert(key.clone(), Some(Self::entry(key, *modified, data)));
                },
            }
        }

        let limit = max_keys.map_or(self.page_size, |m| (m.max(1) as usize).min(self.page_size));
        let mut remaining = items
            .into_iter()
            .filter(|(name, _)| continuation.as_ref().is_none_or(|token| name > token))
            .peekable();
        let mut page = ListPage::default();
        let mut last = None;
        for (name, entry) in remaining.by_ref().take(limit) {
            match entry {
                Some(entry) => page.contents.push(entry),
                None => page.common_prefixes.push(name.clone()),
            }
            last = Some(name);
        }
        if remaining.peek().is_some() {
            page.next_token = last;
        }
        Ok(page)
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectEntry>> {
        self.head_calls.fetch_add(1, Ordering::Relaxed);
        self.ensure_available()?;
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|(modified, data)| Self::entry(key, *modified, data)))
    }

    async fn get_object(&self, key: &str) -> Result<ObjectBody> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.ensure_available()?;
        let objects = self.objects.read().await;
        match objects.get(key) {
            Some((_, data)) => match self.broken_after {
                Some(n) => {
                    let head = data[..n.min(data.len())].to_vec();
                    Ok(Box::pin(std::io::Cursor::new(head).chain(ConnectionReset)))
                },
                None => Ok(Box::pin(std::io::Cursor::new(data.clone()))),
            },
            None => exn::bail!(ErrorKind::NotFound(key.to_string())),
        }
    }
}

/// A reader that only ever fails.
struct ConnectionReset;

impl AsyncRead for ConnectionReset {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::ErrorKind::ConnectionReset.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MockObjectStore {
        MockObjectStore::with_objects(
            "bucket",
            [("a/1", "1"), ("a/b/2", "2"), ("a/c/3", "3"), ("a/c/4", "4"), ("z", "z")],
        )
    }

    #[tokio::test]
    async fn test_delimited_listing() {
        let page = store().list_page("a/", Some("/"), None, None).await.unwrap();
        assert_eq!(page.common_prefixes, vec!["a/b/", "a/c/"]);
        assert_eq!(page.contents.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), vec!["a/1"]);
        assert_eq!(page.next_token, None);
    }

    #[tokio::test]
    async fn test_flat_listing() {
        let page = store().list_page("", None, None, None).await.unwrap();
        assert!(page.common_prefixes.is_empty());
        assert_eq!(page.contents.len(), 5);
    }

    #[tokio::test]
    async fn test_pagination() {
        let store = store().with_page_size(2);
        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = store.list_page("", None, token, None).await.unwrap();
            seen.extend(page.contents.into_iter().map(|e| e.key));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen, vec!["a/1", "a/b/2", "a/c/3", "a/c/4", "z"]);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_shared_content_shares_etag() {
        let store = MockObjectStore::with_objects("bucket", [("x", "same"), ("y", "same")]);
        let x = store.head_object("x").await.unwrap().unwrap();
        let y = store.head_object("y").await.unwrap().unwrap();
        assert_eq!(x.etag, y.etag);
        assert!(store.head_object("missing").await.unwrap().is_none());
        assert_eq!(store.head_calls(), 3);
    }

    #[tokio::test]
    async fn test_broken_body() {
        let store = MockObjectStore::with_objects("bucket", [("x", "0123456789")]).with_broken_bodies(4);
        let mut body = store.get_object("x").await.unwrap();
        let mut buf = Vec::new();
        let err = body.read_to_end(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
        assert_eq!(buf, b"0123");
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MockObjectStore::unavailable("gone");
        assert!(!store.bucket_exists().await.unwrap());
        let err = store.list_page("", None, None, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendUnavailable(_)));
    }
}
