//! In-memory file wrapper trees: read a filesystem subtree, edit it, archive
//! it, write it back and keep it in sync with disk.
#![allow(clippy::enum_variant_names)]

pub mod application;
pub mod cli;
pub mod config;
pub mod ext;
pub mod wrapper;

pub use wrapper::{FileWrapper, FileWrapperError, WrapperContents, WrapperId, WrapperKind};
