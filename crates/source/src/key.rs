//! Handles to items inside a source.

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use time::OffsetDateTime;
use vault_blobstore::Digest;

/// Metadata entry holding the content digest once it's known.
pub const DIGEST_PROPERTY: &str = "sha1";
/// Metadata entry holding the remote ETag for object storage keys.
pub const ETAG_PROPERTY: &str = "etag";

/// Current version of the [`Key::to_json`] record.
const KEY_RECORD_VERSION: u32 = 1;

/// A file or folder inside a [`Source`](crate::Source).
///
/// Values are relative to the source root, always use `/` as separator, and
/// folder values always end with `/`. Equality and hashing only consider the
/// value and the folder flag; size, timestamps and metadata are along for
/// the ride.
#[derive(Debug, Clone)]
pub struct Key {
    value: String,
    is_folder: bool,
    /// Size in bytes. Always 0 for folders.
    pub size: u64,
    pub last_modified: OffsetDateTime,
    pub metadata: HashMap<String, String>,
}

impl Key {
    /// A file key. The value is kept as given, apart from trailing `/`
    /// characters, which only folders may end with.
    pub fn file(value: impl Into<String>, size: u64, last_modified: OffsetDateTime) -> Self {
        let mut value = value.into();
        value.truncate(value.trim_end_matches('/').len());
        Self {
            value,
            is_folder: false,
            size,
            last_modified,
            metadata: HashMap::new(),
        }
    }

    /// A folder key. A trailing `/` is added if missing; an empty value is
    /// the source root. Nothing else is normalized: `"/"` and `"a//"` are
    /// folders of their own in object storage.
    pub fn folder(value: impl Into<String>, last_modified: OffsetDateTime) -> Self {
        let mut value = value.into();
        if !value.is_empty() && !value.ends_with('/') {
            value.push('/');
        }
        Self {
            value,
            is_folder: true,
            size: 0,
            last_modified,
            metadata: HashMap::new(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_folder(&self) -> bool {
        self.is_folder
    }

    pub fn is_file(&self) -> bool {
        !self.is_folder
    }

    /// Value without the folder's own trailing `/`.
    fn stem(&self) -> &str {
        match self.is_folder {
            true => self.value.strip_suffix('/').unwrap_or(&self.value),
            false => &self.value,
        }
    }

    /// Last path segment (without the trailing `/` for folders).
    pub fn name(&self) -> &str {
        let stem = self.stem();
        stem.rsplit_once('/').map_or(stem, |(_, name)| name)
    }

    /// Value of the folder containing this key; `""` for the root.
    pub fn parent(&self) -> &str {
        self.stem().rfind('/').map_or("", |idx| &self.value[..=idx])
    }

    /// Whether this key sits directly inside `folder` (`None` is the root).
    pub fn is_direct_child_of(&self, folder: Option<&Key>) -> bool {
        !self.value.is_empty() && self.parent() == folder.map_or("", Key::value)
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Attach a content digest under [`DIGEST_PROPERTY`].
    pub fn with_digest(self, digest: Digest) -> Self {
        self.with_metadata(DIGEST_PROPERTY, digest.to_hex())
    }

    /// Content digest, if one has been attached.
    ///
    /// `None` means "not retrieved yet", which is different from
    /// [`Digest::EMPTY`] (retrieved, and zero bytes long).
    pub fn digest(&self) -> Option<Digest> {
        self.metadata.get(DIGEST_PROPERTY).and_then(|hex| Digest::from_hex(hex).ok())
    }

    pub fn etag(&self) -> Option<&str> {
        self.metadata.get(ETAG_PROPERTY).map(String::as_str)
    }

    /// Serialize to the versioned JSON record.
    pub fn to_json(&self) -> Result<String> {
        let record = KeyRecord {
            version: KEY_RECORD_VERSION,
            value: self.value.clone(),
            folder: self.is_folder,
            size: self.size,
            modified: self.last_modified,
            metadata: self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        Ok(serde_json::to_string(&record).map_err(|e| ErrorKind::InvalidData(e.to_string()))?)
    }

    /// Deserialize a record written by [`to_json()`](Self::to_json).
    ///
    /// Records from a version this build doesn't understand are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: KeyRecord = serde_json::from_str(json).map_err(|e| ErrorKind::InvalidData(e.to_string()))?;
        if record.version != KEY_RECORD_VERSION {
            exn::bail!(ErrorKind::InvalidData(format!("unsupported key record version {}", record.version)));
        }
        // Values are taken verbatim, so they must already agree with the flag.
        if record.folder != (record.value.is_empty() || record.value.ends_with('/')) {
            exn::bail!(ErrorKind::InvalidData(format!(
                "`{}` doesn't match its folder flag ({})",
                record.value, record.folder
            )));
        }
        Ok(Self {
            value: record.value,
            is_folder: record.folder,
            size: if record.folder { 0 } else { record.size },
            last_modified: record.modified,
            metadata: record.metadata.into_iter().collect(),
        })
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.is_folder == other.is_folder
    }
}
impl Eq for Key {}
impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.is_folder.hash(state);
    }
}

/// On-the-wire shape of a [`Key`]. Field names are part of the format.
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    #[serde(rename = "v")]
    version: u32,
    value: String,
    folder: bool,
    #[serde(default)]
    size: u64,
    #[serde(with = "time::serde::rfc3339")]
    modified: OffsetDateTime,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}
