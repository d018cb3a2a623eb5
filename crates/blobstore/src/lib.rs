mod digest;
pub mod error;
mod store;

pub use crate::digest::{BLOCK_SIZE, Digest, DigestHasher, DigestWriter};
pub use crate::store::{BlobStore, Corruption, HashCheck};
