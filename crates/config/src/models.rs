use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the local blob cache lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    pub root: PathBuf,
}
impl Default for BlobStoreConfig {
    fn default() -> Self {
        let root = ProjectDirs::from("org", "vault", "vault")
            .map(|dirs| dirs.cache_dir().join("blobs"))
            .unwrap_or_else(|| PathBuf::from("blobs"));
        Self { root }
    }
}

/// Which kind of backend a source lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    /// A directory tree on a local (or locally mounted) filesystem.
    LocalFile,
    /// A bucket on an S3-compatible object store.
    ObjectStorage,
}

/// Describes one data source: `{name, scheme, location}`.
///
/// For [`LocalFile`](Scheme::LocalFile) the location is the root directory.
/// For [`ObjectStorage`](Scheme::ObjectStorage) it is `bucket` or
/// `bucket/key/prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub scheme: Scheme,
    pub location: String,
}
impl SourceDescriptor {
    pub fn new(name: impl Into<String>, scheme: Scheme, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme,
            location: location.into(),
        }
    }

    /// Split an object storage location into bucket and (optional) prefix.
    pub fn bucket_and_prefix(&self) -> (&str, Option<&str>) {
        let location = self.location.trim_matches('/');
        match location.split_once('/') {
            Some((bucket, prefix)) if !prefix.trim_matches('/').is_empty() => (bucket, Some(prefix.trim_matches('/'))),
            Some((bucket, _)) => (bucket, None),
            None => (location, None),
        }
    }
}

/// Client options for S3-compatible object storage.
///
/// Credentials are passed through to the client untouched; nothing here
/// manages or refreshes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorageOptions {
    pub region: String,
    /// Custom endpoint for non-AWS services (MinIO, Backblaze, ...).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub key_secret: Option<String>,
}
impl Default for ObjectStorageOptions {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            key_id: None,
            key_secret: None,
        }
    }
}

/// An external identification program.
///
/// Invoked as `program args... <path>`; its output is read as `name=value`
/// (or `name: value`) lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Namespace for the tool's properties. Must not contain `.`.
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("bucket", ("bucket", None))]
    #[case("bucket/", ("bucket", None))]
    #[case("bucket/incoming", ("bucket", Some("incoming")))]
    #[case("/bucket/a/b/", ("bucket", Some("a/b")))]
    fn test_bucket_and_prefix(#[case] location: &str, #[case] expected: (&str, Option<&str>)) {
        let descriptor = SourceDescriptor::new("s", Scheme::ObjectStorage, location);
        assert_eq!(descriptor.bucket_and_prefix(), expected);
    }
}
