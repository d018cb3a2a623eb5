//! SHA-1 content digests.
//!
//! A [`Digest`] is the identity of a blob: the blob store names files after
//! it, and sources use it to verify what they retrieved.

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest as _, Sha1};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncReadExt;

/// SHA-1 produces 160-bit digests.
pub const DIGEST_LEN: usize = 20;

/// Block size used whenever a digest is computed from a file or stream.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// A 160-bit SHA-1 content digest.
///
/// Textual form is always 40 lowercase hexadecimal characters.
///
/// ```
/// use vault_blobstore::Digest;
///
/// assert_eq!(Digest::of_bytes(b""), Digest::EMPTY);
/// assert_eq!(Digest::EMPTY.to_string(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Digest of zero bytes of content.
    pub const EMPTY: Digest = Digest([
        0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60, 0x18, 0x90, 0xaf, 0xd8,
        0x07, 0x09,
    ]);

    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Parse a digest from its hex form. Upper-case input is accepted.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != DIGEST_LEN * 2 {
            exn::bail!(ErrorKind::InvalidDigest(hex_str.to_string()));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(hex_str, &mut bytes).map_err(|_| ErrorKind::InvalidDigest(hex_str.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether this is the digest of zero-length content.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = DigestHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Hash everything a reader yields, in bounded blocks.
    pub fn of_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut writer = DigestWriter::new(std::io::sink());
        std::io::copy(&mut reader, &mut writer).map_err(ErrorKind::Io)?;
        Ok(writer.finish().1)
    }

    /// Hash a file on disk without loading it into memory.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if the path doesn't exist.
    pub async fn of_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = tokio::fs::File::open(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        let mut hasher = DigestHasher::new();
        let mut buffer = vec![0u8; BLOCK_SIZE];
        loop {
            let read = file.read(&mut buffer).await.map_err(ErrorKind::Io)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finish())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(|_| serde::de::Error::custom(format!("invalid SHA-1 digest: {text:?}")))
    }
}

/// Incremental digest computation, for callers that see content in chunks
/// (network downloads, for instance).
#[derive(Clone, Default)]
pub struct DigestHasher {
    inner: Sha1,
    length: u64,
}
impl DigestHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.length += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn finish(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}

/// A [`Write`] adapter that hashes everything passing through it.
///
/// Lets a copy compute the digest of what it writes in the same pass.
pub struct DigestWriter<W> {
    inner: W,
    hasher: DigestHasher,
}
impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: DigestHasher::new(),
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.hasher.len()
    }

    pub fn finish(self) -> (W, Digest) {
        (self.inner, self.hasher.finish())
    }
}
impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"", "da39a3ee5e6b4b0d3255bfef95601890afd80709")]
    #[case(b"abc", "a9993e364706816aba3e25717850c26c9cd0d89d")]
    #[case(b"The quick brown fox jumps over the lazy dog", "2fd4e1c67a2d28fced849ee1bb76e7391b93eb12")]
    fn test_known_digests(#[case] input: &[u8], #[case] expected: &str) {
        assert_eq!(Digest::of_bytes(input).to_string(), expected);
    }

    #[test]
    fn test_empty_constant() {
        assert!(Digest::of_bytes(b"").is_empty());
        assert!(!Digest::of_bytes(b"x").is_empty());
        assert_eq!(Digest::of_reader(std::io::empty()).unwrap(), Digest::EMPTY);
    }

    #[rstest]
    #[case("")]
    #[case("da39a3ee")]
    #[case("zz39a3ee5e6b4b0d3255bfef95601890afd80709")]
    #[case("da39a3ee5e6b4b0d3255bfef95601890afd807090")]
    fn test_invalid_hex(#[case] input: &str) {
        let err = Digest::from_hex(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidDigest(_)));
    }

    #[test]
    fn test_hex_is_case_insensitive_on_input() {
        let upper: Digest = "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709".parse().unwrap();
        assert_eq!(upper, Digest::EMPTY);
        assert_eq!(upper.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_reader_matches_bytes() {
        // Larger than a single block.
        let data = vec![7u8; BLOCK_SIZE * 2 + 13];
        assert_eq!(Digest::of_reader(data.as_slice()).unwrap(), Digest::of_bytes(&data));
    }

    #[test]
    fn test_writer_counts_and_hashes() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        assert_eq!(writer.written(), 11);
        let (inner, digest) = writer.finish();
        assert_eq!(inner, b"hello world");
        assert_eq!(digest, Digest::of_bytes(b"hello world"));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&Digest::EMPTY).unwrap();
        assert_eq!(json, r#""da39a3ee5e6b4b0d3255bfef95601890afd80709""#);
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Digest::EMPTY);
        assert!(serde_json::from_str::<Digest>(r#""nope""#).is_err());
    }

    #[tokio::test]
    async fn test_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(Digest::of_file(&path).await.unwrap(), Digest::of_bytes(b"abc"));
        let err = Digest::of_file(dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
