use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use derive_more::Display;
use snafu::OptionExt;
use tracing::debug;

use crate::wrapper::error::{NotFoundSnafu, StateSnafu};
use crate::wrapper::{FileAttributes, FileWrapperError, Fingerprint, Icon};

/// Key used when a child carries no usable name of its own.
const UNTITLED: &str = "untitled";

static NEXT_WRAPPER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a wrapper.
///
/// Directories own their children outright, so anything outside the tree
/// refers to a node through its id instead of a second reference.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{_0}")]
pub struct WrapperId(u64);

impl WrapperId {
    fn next() -> Self {
        Self(NEXT_WRAPPER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapperKind {
    #[display("directory")]
    Directory,
    #[display("regular file")]
    RegularFile,
    #[display("symbolic link")]
    SymbolicLink,
}

/// Kind-specific payload of a wrapper.
#[derive(Debug, Clone)]
pub enum WrapperContents {
    Directory(BTreeMap<String, FileWrapper>),
    RegularFile(Vec<u8>),
    SymbolicLink(PathBuf),
}

impl WrapperContents {
    pub fn kind(&self) -> WrapperKind {
        match self {
            WrapperContents::Directory(_) => WrapperKind::Directory,
            WrapperContents::RegularFile(_) => WrapperKind::RegularFile,
            WrapperContents::SymbolicLink(_) => WrapperKind::SymbolicLink,
        }
    }
}

/// One node of an in-memory filesystem subtree.
#[derive(Debug)]
pub struct FileWrapper {
    id: WrapperId,
    filename: Option<String>,
    preferred_filename: Option<String>,
    attributes: FileAttributes,
    icon: Option<Icon>,
    contents: WrapperContents,
    pub(crate) fingerprint: Option<Fingerprint>,
    /// Directory entries that were present but could not be read last time.
    pub(crate) skipped: BTreeSet<String>,
}

impl Clone for FileWrapper {
    /// Deep copy. Every node of the copy gets a fresh id.
    fn clone(&self) -> Self {
        Self {
            id: WrapperId::next(),
            filename: self.filename.clone(),
            preferred_filename: self.preferred_filename.clone(),
            attributes: self.attributes.clone(),
            icon: self.icon.clone(),
            contents: self.contents.clone(),
            fingerprint: self.fingerprint,
            skipped: self.skipped.clone(),
        }
    }
}

impl FileWrapper {
    pub(crate) fn from_contents(contents: WrapperContents) -> Self {
        Self {
            id: WrapperId::next(),
            filename: None,
            preferred_filename: None,
            attributes: FileAttributes::new(),
            icon: None,
            contents,
            fingerprint: None,
            skipped: BTreeSet::new(),
        }
    }

    /// Creates a directory wrapper owning exactly the given children.
    pub fn directory(children: impl IntoIterator<Item = (String, FileWrapper)>) -> Self {
        Self::from_contents(WrapperContents::Directory(children.into_iter().collect()))
    }

    pub fn regular_file(contents: impl Into<Vec<u8>>) -> Self {
        Self::from_contents(WrapperContents::RegularFile(contents.into()))
    }

    pub fn symbolic_link(destination: impl Into<PathBuf>) -> Self {
        Self::from_contents(WrapperContents::SymbolicLink(destination.into()))
    }

    pub fn id(&self) -> WrapperId {
        self.id
    }

    pub fn kind(&self) -> WrapperKind {
        self.contents.kind()
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == WrapperKind::Directory
    }

    pub fn is_regular_file(&self) -> bool {
        self.kind() == WrapperKind::RegularFile
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.kind() == WrapperKind::SymbolicLink
    }

    pub fn contents(&self) -> &WrapperContents {
        &self.contents
    }

    pub(crate) fn contents_mut(&mut self) -> &mut WrapperContents {
        &mut self.contents
    }

    /// Name last used when this wrapper was read from or written to disk.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, filename: Option<String>) {
        self.filename = filename;
    }

    pub fn preferred_filename(&self) -> Option<&str> {
        self.preferred_filename.as_deref()
    }

    pub fn set_preferred_filename(&mut self, preferred_filename: Option<String>) {
        self.preferred_filename = preferred_filename;
    }

    pub fn attributes(&self) -> &FileAttributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut FileAttributes {
        &mut self.attributes
    }

    pub fn set_attributes(&mut self, attributes: FileAttributes) {
        self.attributes = attributes;
    }

    pub fn icon(&self) -> Option<&Icon> {
        self.icon.as_ref()
    }

    pub fn set_icon(&mut self, icon: Option<Icon>) {
        self.icon = icon;
    }

    /// Disk state recorded at the last read or write, for regular files.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn regular_file_contents(&self) -> Result<&[u8], FileWrapperError> {
        match &self.contents {
            WrapperContents::RegularFile(contents) => Ok(contents),
            _ => self.kind_mismatch("regular_file_contents", WrapperKind::RegularFile),
        }
    }

    pub fn symbolic_link_destination(&self) -> Result<&Path, FileWrapperError> {
        match &self.contents {
            WrapperContents::SymbolicLink(destination) => Ok(destination),
            _ => self.kind_mismatch("symbolic_link_destination", WrapperKind::SymbolicLink),
        }
    }

    /// Read view of the children of a directory, by key.
    pub fn file_wrappers(&self) -> Result<&BTreeMap<String, FileWrapper>, FileWrapperError> {
        self.children("file_wrappers")
    }

    pub fn file_wrapper(&self, key: &str) -> Result<Option<&FileWrapper>, FileWrapperError> {
        Ok(self.children("file_wrapper")?.get(key))
    }

    pub fn file_wrapper_mut(
        &mut self,
        key: &str,
    ) -> Result<Option<&mut FileWrapper>, FileWrapperError> {
        Ok(self.children_mut("file_wrapper_mut")?.get_mut(key))
    }

    /// Inserts `child` and returns the key it was stored under.
    ///
    /// The key is the child's preferred filename, else its filename, else
    /// `untitled`. A taken key is made unique by numbering it (`notes-2.txt`).
    pub fn add_file_wrapper(&mut self, child: FileWrapper) -> Result<String, FileWrapperError> {
        let children = self.children_mut("add_file_wrapper")?;

        let base = [child.preferred_filename(), child.filename()]
            .into_iter()
            .flatten()
            .find(|name| is_usable_name(name))
            .unwrap_or(UNTITLED);
        let key = unique_key(children, base);

        debug!("Adding {} {} under key '{}'", child.kind(), child.id, key);
        children.insert(key.clone(), child);
        Ok(key)
    }

    /// Removes the direct child with the given identity and hands it back.
    pub fn remove_file_wrapper(&mut self, id: WrapperId) -> Result<FileWrapper, FileWrapperError> {
        let children = self.children_mut("remove_file_wrapper")?;

        let key = children
            .iter()
            .find(|(_, child)| child.id == id)
            .map(|(key, _)| key.clone())
            .context(NotFoundSnafu { id })?;

        debug!("Removing {} stored under key '{}'", id, key);
        children.remove(&key).context(NotFoundSnafu { id })
    }

    pub fn key_for_file_wrapper(&self, id: WrapperId) -> Result<Option<&str>, FileWrapperError> {
        Ok(self
            .children("key_for_file_wrapper")?
            .iter()
            .find(|(_, child)| child.id == id)
            .map(|(key, _)| key.as_str()))
    }

    pub fn add_regular_file_with_contents(
        &mut self,
        contents: impl Into<Vec<u8>>,
        preferred_filename: impl Into<String>,
    ) -> Result<String, FileWrapperError> {
        self.ensure_directory("add_regular_file_with_contents")?;
        let mut child = FileWrapper::regular_file(contents);
        child.preferred_filename = Some(preferred_filename.into());
        self.add_file_wrapper(child)
    }

    pub fn add_symbolic_link_with_destination(
        &mut self,
        destination: impl Into<PathBuf>,
        preferred_filename: impl Into<String>,
    ) -> Result<String, FileWrapperError> {
        self.ensure_directory("add_symbolic_link_with_destination")?;
        let mut child = FileWrapper::symbolic_link(destination);
        child.preferred_filename = Some(preferred_filename.into());
        self.add_file_wrapper(child)
    }

    /// Compares kinds, keys and leaf payloads, ignoring names, attributes,
    /// icons and identities.
    pub fn same_structure(&self, other: &FileWrapper) -> bool {
        match (&self.contents, &other.contents) {
            (WrapperContents::Directory(ours), WrapperContents::Directory(theirs)) => {
                ours.len() == theirs.len()
                    && ours.iter().zip(theirs).all(|((our_key, our), (their_key, their))| {
                        our_key == their_key && our.same_structure(their)
                    })
            }
            (WrapperContents::RegularFile(ours), WrapperContents::RegularFile(theirs)) => {
                ours == theirs
            }
            (WrapperContents::SymbolicLink(ours), WrapperContents::SymbolicLink(theirs)) => {
                ours == theirs
            }
            _ => false,
        }
    }

    pub(crate) fn ensure_directory(&self, operation: &'static str) -> Result<(), FileWrapperError> {
        self.children(operation).map(|_| ())
    }

    fn children(
        &self,
        operation: &'static str,
    ) -> Result<&BTreeMap<String, FileWrapper>, FileWrapperError> {
        match &self.contents {
            WrapperContents::Directory(children) => Ok(children),
            _ => self.kind_mismatch(operation, WrapperKind::Directory),
        }
    }

    fn children_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut BTreeMap<String, FileWrapper>, FileWrapperError> {
        let actual = self.kind();
        match &mut self.contents {
            WrapperContents::Directory(children) => Ok(children),
            _ => StateSnafu {
                operation,
                expected: WrapperKind::Directory,
                actual,
            }
            .fail(),
        }
    }

    fn kind_mismatch<T>(
        &self,
        operation: &'static str,
        expected: WrapperKind,
    ) -> Result<T, FileWrapperError> {
        StateSnafu {
            operation,
            expected,
            actual: self.kind(),
        }
        .fail()
    }
}

/// Whether `name` can be used as a single path component.
pub(crate) fn is_usable_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn unique_key(children: &BTreeMap<String, FileWrapper>, base: &str) -> String {
    if !children.contains_key(base) {
        return base.to_string();
    }

    let (stem, extension) = match base.rfind('.') {
        Some(dot) if dot > 0 => base.split_at(dot),
        _ => (base, ""),
    };

    (2u64..)
        .map(|counter| format!("{stem}-{counter}{extension}"))
        .find(|candidate| !children.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}
