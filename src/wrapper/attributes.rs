use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::Path;

use bincode::{Decode, Encode};
use derive_more::{Display, From};

use crate::ext::{SystemTimeExt, Timestamp};

/// Permission bits, as `Unsigned`.
pub const POSIX_PERMISSIONS: &str = "posix_permissions";
/// Size in bytes as reported by the filesystem, as `Unsigned`.
pub const SIZE: &str = "size";
/// Last modification time, as `Timestamp`.
pub const MODIFICATION_DATE: &str = "modification_date";
/// Numeric owner id, as `Unsigned`.
pub const OWNER_ACCOUNT_ID: &str = "owner_account_id";
/// Numeric group id, as `Unsigned`.
pub const GROUP_OWNER_ACCOUNT_ID: &str = "group_owner_account_id";
/// Read-only flag on platforms without permission bits, as `Boolean`.
pub const READ_ONLY: &str = "read_only";

#[derive(Debug, Display, Clone, PartialEq, Eq, From, Encode, Decode)]
pub enum AttributeValue {
    Integer(i64),
    Unsigned(u64),
    Text(String),
    Boolean(bool),
    Timestamp(Timestamp),
}

/// Attribute name to value mapping attached to every wrapper.
///
/// Values are carried opaquely. The only attributes acted upon are the
/// permission ones, which are applied back when a wrapper is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, From, Encode, Decode)]
pub struct FileAttributes(BTreeMap<String, AttributeValue>);

impl FileAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn posix_permissions(&self) -> Option<u32> {
        match self.0.get(POSIX_PERMISSIONS) {
            Some(AttributeValue::Unsigned(mode)) => u32::try_from(*mode).ok(),
            Some(AttributeValue::Integer(mode)) => u32::try_from(*mode).ok(),
            _ => None,
        }
    }

    /// Captures the attributes of an entry from its (not followed) metadata.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mut attributes = Self::new();
        attributes.insert(SIZE, metadata.len());
        if let Ok(modified) = metadata.modified() {
            attributes.insert(MODIFICATION_DATE, modified.to_timestamp());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;

            attributes.insert(POSIX_PERMISSIONS, u64::from(metadata.mode() & 0o7777));
            attributes.insert(OWNER_ACCOUNT_ID, u64::from(metadata.uid()));
            attributes.insert(GROUP_OWNER_ACCOUNT_ID, u64::from(metadata.gid()));
        }
        #[cfg(not(unix))]
        {
            attributes.insert(READ_ONLY, metadata.permissions().readonly());
        }

        attributes
    }

    /// Applies the permission attributes to an entry that was just written.
    /// Symbolic links are left alone.
    pub(crate) fn apply_permissions(&self, path: &Path) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Some(mode) = self.posix_permissions() {
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
            }
        }
        #[cfg(not(unix))]
        {
            if let Some(AttributeValue::Boolean(read_only)) = self.0.get(READ_ONLY) {
                let mut permissions = std::fs::metadata(path)?.permissions();
                permissions.set_readonly(*read_only);
                std::fs::set_permissions(path, permissions)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn captures_size_and_modification_date() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        write!(temp_file, "twelve bytes").expect("Failed to write to temp file");
        let metadata = temp_file
            .path()
            .symlink_metadata()
            .expect("Failed to stat temp file");

        let attributes = FileAttributes::from_metadata(&metadata);

        assert_eq!(attributes.get(SIZE), Some(&AttributeValue::Unsigned(12)));
        assert!(matches!(
            attributes.get(MODIFICATION_DATE),
            Some(AttributeValue::Timestamp(_))
        ));
    }

    #[test]
    fn posix_permissions_accepts_integer_values() {
        let mut attributes = FileAttributes::new();
        assert_eq!(attributes.posix_permissions(), None);

        attributes.insert(POSIX_PERMISSIONS, 0o644_i64);
        assert_eq!(attributes.posix_permissions(), Some(0o644));

        attributes.insert(POSIX_PERMISSIONS, "rw-r--r--".to_string());
        assert_eq!(attributes.posix_permissions(), None);
    }

    #[cfg(unix)]
    #[test]
    fn applies_permissions_to_written_file() {
        use std::os::unix::fs::PermissionsExt;

        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let mut attributes = FileAttributes::new();
        attributes.insert(POSIX_PERMISSIONS, 0o600_u64);

        attributes
            .apply_permissions(temp_file.path())
            .expect("Failed to apply permissions");

        let mode = temp_file
            .path()
            .metadata()
            .expect("Failed to stat temp file")
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o600);
    }
}
