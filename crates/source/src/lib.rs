//! Unified enumeration and retrieval over heterogeneous data sources.
//!
//! A [`Source`] walks a local directory tree ([`FilesystemSource`]) or pages
//! through an object storage bucket ([`ObjectStorageSource`]) behind one
//! contract. Keys come out as lazy streams; file bytes are resolved on
//! demand (remote content through the shared blob store) and then run
//! through a [`Toolchain`] of identification tools.

mod connect;
pub mod error;
mod key;
mod metadata;
mod path;
pub mod remote;
mod source;
pub mod tool;

pub use crate::connect::{SourceHandle, connect};
pub use crate::key::{DIGEST_PROPERTY, ETAG_PROPERTY, Key};
pub use crate::metadata::Toolchain;
pub use crate::source::{EtagCache, FilesystemSource, KeyStream, LocalCopy, ObjectStorageSource, Source};
pub use crate::tool::{CommandTool, Properties, Tool, ToolHandle};
