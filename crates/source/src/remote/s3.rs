//! S3-compatible object store client.
//!
//! # Credentials
//!
//! Credentials are taken verbatim from configuration (`key_id` and
//! `key_secret`). There is no profile or environment discovery.

use super::{ListPage, ObjectBody, ObjectEntry, ObjectStore, normalize_etag};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::DateTime,
};
use exn::OptionExt;
use time::OffsetDateTime;
use vault_config::ObjectStorageOptions;

/// A bucket on AWS S3, Backblaze B2, MinIO or another S3-compatible service.
///
/// # Examples
///
/// ```no_run
/// use vault_config::ObjectStorageOptions;
/// use vault_source::remote::S3ObjectStore;
///
/// # fn example() -> vault_source::error::Result<()> {
/// let options = ObjectStorageOptions {
///     region: "us-west-004".to_string(),
///     endpoint: Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     key_id: Some("access_key_id".to_string()),
///     key_secret: Some("secret_access_key".to_string()),
/// };
/// let store = S3ObjectStore::new("my-bucket", &options)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client for `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`](ErrorKind::InvalidArgument) if either
    /// credential is missing.
    pub fn new(bucket: impl Into<String>, options: &ObjectStorageOptions) -> Result<Self> {
        let key_id = options
            .key_id
            .as_deref()
            .ok_or_raise(|| ErrorKind::InvalidArgument("object storage key_id is not configured".to_string()))?;
        let key_secret = options
            .key_secret
            .as_deref()
            .ok_or_raise(|| ErrorKind::InvalidArgument("object storage key_secret is not configured".to_string()))?;
        let credentials = Credentials::new(key_id, key_secret, None, None, "vault-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(options.region.clone()))
            // Errors propagate; retrying is the caller's call.
            .retry_config(RetryConfig::disabled())
            // Path-style addressing for S3-compatible services (Backblaze,
            // MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = &options.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self::from_client(Client::from_conf(config_builder.build()), bucket))
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn parse_datetime(dt: Option<&DateTime>) -> OffsetDateTime {
        dt.and_then(|dt| OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Map a failed request to an error kind. Requests that never got a
    /// response are network failures; the rest are the backend refusing.
    fn request_error<E, R>(&self, operation: &str, err: SdkError<E, R>) -> ErrorKind
    where
        E: std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        let message = format!("{operation} on bucket {}: {}", self.bucket, DisplayErrorContext(&err));
        match err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                ErrorKind::Network(message)
            },
            _ => ErrorKind::BackendUnavailable(message),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => match err.as_service_error() {
                Some(service) if service.is_not_found() => Ok(false),
                _ => exn::bail!(self.request_error("HeadBucket", err)),
            },
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
        max_keys: Option<i32>,
    ) -> Result<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .set_continuation_token(continuation)
            .set_max_keys(max_keys)
            .send()
            .await
            .map_err(|err| self.request_error("ListObjectsV2", err))?;
        let common_prefixes = output.common_prefixes().iter().filter_map(|p| p.prefix().map(str::to_string)).collect();
        let contents = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectEntry {
                    key: object.key()?.to_string(),
                    size: object.size().map_or(0, |size| size.max(0) as u64),
                    last_modified: Self::parse_datetime(object.last_modified()),
                    etag: object.e_tag().map(normalize_etag),
                })
            })
            .collect();
        let next_token = match output.is_truncated() {
            Some(true) => output.next_continuation_token().map(str::to_string),
            _ => None,
        };
        Ok(ListPage {
            common_prefixes,
            contents,
            next_token,
        })
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectEntry>> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => Ok(Some(ObjectEntry {
                key: key.to_string(),
                size: output.content_length().map_or(0, |size| size.max(0) as u64),
                last_modified: Self::parse_datetime(output.last_modified()),
                etag: output.e_tag().map(normalize_etag),
            })),
            Err(err) => match err.as_service_error() {
                Some(service) if service.is_not_found() => Ok(None),
                _ => exn::bail!(self.request_error("HeadObject", err)),
            },
        }
    }

    async fn get_object(&self, key: &str) -> Result<ObjectBody> {
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => Ok(Box::pin(output.body.into_async_read())),
            Err(err) => match err.as_service_error() {
                Some(service) if service.is_no_such_key() => exn::bail!(ErrorKind::NotFound(key.to_string())),
                _ => exn::bail!(self.request_error("GetObject", err)),
            },
        }
    }
}
