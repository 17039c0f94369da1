//! In-memory model of a filesystem subtree.
//!
//! A [`FileWrapper`] is either a directory owning its children by key, a
//! regular file owning its contents, or a symbolic link owning its
//! destination. Trees can be read from disk, decoded from an archive,
//! edited in memory, encoded again, written back to disk and reconciled
//! with a live path.

mod archive;
pub mod attributes;
mod disk;
mod error;
mod file_wrapper;
mod fingerprint;
mod icon;
mod sync;

pub use archive::{ArchiveError, ArchiveOptions, DEFAULT_COMPRESSION_LEVEL, MAX_DEPTH};
pub use attributes::{AttributeValue, FileAttributes};
pub use error::FileWrapperError;
pub use file_wrapper::{FileWrapper, WrapperContents, WrapperId, WrapperKind};
pub use fingerprint::{Fingerprint, Stamp};
pub use icon::Icon;
