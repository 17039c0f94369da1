use std::fs::Metadata;
use std::hash::Hasher;

use metrohash::MetroHash64;

use crate::ext::{SystemTimeExt, Timestamp};

/// How a regular file's contents are identified between two observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stamp {
    ModifiedTime(Timestamp),
    /// Used where the platform cannot report modification times.
    Hash(u64),
}

/// Disk state of a regular file recorded when a wrapper last read or wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub size: u64,
    pub stamp: Stamp,
}

impl Fingerprint {
    /// Builds the fingerprint of a regular file whose contents are already in
    /// memory, avoiding a second read when the modification time is missing.
    pub fn observe(metadata: &Metadata, contents: &[u8]) -> Self {
        let stamp = match metadata.modified() {
            Ok(modified_time) => Stamp::ModifiedTime(modified_time.to_timestamp()),
            Err(_) => Stamp::Hash(content_hash(contents)),
        };

        Fingerprint {
            size: metadata.len(),
            stamp,
        }
    }

    /// Builds the fingerprint of a live file, reading it only when the
    /// modification time is unavailable.
    pub fn observe_path(
        path: &std::path::Path,
        metadata: &Metadata,
    ) -> std::io::Result<Self> {
        if let Ok(modified_time) = metadata.modified() {
            return Ok(Fingerprint {
                size: metadata.len(),
                stamp: Stamp::ModifiedTime(modified_time.to_timestamp()),
            });
        }

        let bytes = std::fs::read(path)?;
        Ok(Self::observe(metadata, &bytes))
    }
}

pub fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = MetroHash64::default();
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use std::thread;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn observe(temp_file: &NamedTempFile) -> Fingerprint {
        let metadata = temp_file
            .path()
            .symlink_metadata()
            .expect("Failed to stat temp file");
        Fingerprint::observe_path(temp_file.path(), &metadata)
            .expect("Failed to fingerprint temp file")
    }

    #[test]
    fn fingerprint_records_size() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        write!(temp_file, "test content").expect("Failed to write to temp file");

        assert_eq!(observe(&temp_file).size, 12);
    }

    #[test]
    fn fingerprint_is_stable_without_changes() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(temp_file, "test content for hash").expect("Failed to write to temp file");

        assert_eq!(observe(&temp_file), observe(&temp_file));
    }

    #[test]
    fn fingerprint_changes_after_modification() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(temp_file, "initial content").expect("Failed to write to temp file");
        let first = observe(&temp_file);

        thread::sleep(Duration::from_millis(10));
        writeln!(temp_file, "additional content").expect("Failed to write to temp file");
        temp_file.flush().expect("Failed to flush temp file");

        assert_ne!(first, observe(&temp_file));
    }

    #[test]
    fn in_memory_and_path_observations_agree() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        write!(temp_file, "same bytes").expect("Failed to write to temp file");
        let metadata = temp_file
            .path()
            .symlink_metadata()
            .expect("Failed to stat temp file");

        assert_eq!(
            Fingerprint::observe(&metadata, b"same bytes"),
            observe(&temp_file)
        );
    }

    #[rstest]
    #[case(b"hello world".as_slice())]
    #[case(b"".as_slice())]
    #[case("special chars: äöü🚀".as_bytes())]
    fn content_hash_depends_only_on_bytes(#[case] content: &[u8]) {
        assert_eq!(content_hash(content), content_hash(&content.to_vec()));
        assert_ne!(content_hash(content), content_hash(b"something else"));
    }
}
