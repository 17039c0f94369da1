use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, Metadata};
use std::path::Path;

use snafu::ResultExt;
use tracing::{debug, warn};

use crate::ext::BestEffortPathExt;
use crate::wrapper::disk::entry_name;
use crate::wrapper::error::{IoSnafu, StateSnafu};
use crate::wrapper::{
    FileAttributes, FileWrapper, FileWrapperError, Fingerprint, WrapperContents, WrapperKind,
};

impl FileWrapper {
    /// Whether the entry at `path` changed since this wrapper last read or
    /// wrote it.
    ///
    /// Regular files compare their recorded fingerprint, or their contents
    /// when nothing was recorded (e.g. after decoding an archive). Symbolic
    /// links compare their destination. Directories compare their keys with
    /// the entries on disk, ignoring the ones that could not be read last
    /// time, and recurse.
    pub fn needs_to_be_updated_from_path(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let stale = self.differs_from(path);
        debug!(
            "{} {} stale",
            path.best_effort_path_display(),
            if stale { "is" } else { "is not" }
        );
        stale
    }

    fn differs_from(&self, path: &Path) -> bool {
        let Ok(metadata) = path.symlink_metadata() else {
            return true;
        };
        if live_kind(&metadata) != Some(self.kind()) {
            return true;
        }

        match self.contents() {
            WrapperContents::RegularFile(contents) => match self.fingerprint {
                Some(recorded) => Fingerprint::observe_path(path, &metadata)
                    .map_or(true, |live| live != recorded),
                None => fs::read(path).map_or(true, |live| live != *contents),
            },
            WrapperContents::SymbolicLink(destination) => {
                fs::read_link(path).map_or(true, |live| live != *destination)
            }
            WrapperContents::Directory(children) => {
                let Ok(entries) = live_entries(path) else {
                    return true;
                };
                let unexpected = entries
                    .keys()
                    .any(|name| !children.contains_key(name) && !self.skipped.contains(name));
                unexpected
                    || children.keys().any(|key| !entries.contains_key(key))
                    || children
                        .iter()
                        .any(|(key, child)| child.differs_from(&path.join(key)))
            }
        }
    }

    /// Re-reads `path` and reconciles this wrapper with it in place.
    ///
    /// Changed contents and link destinations are replaced, new entries are
    /// added and vanished ones removed. Children that did not change keep
    /// their identity. Returns whether anything changed.
    pub fn update_from_path(&mut self, path: impl AsRef<Path>) -> Result<bool, FileWrapperError> {
        let path = path.as_ref();
        let metadata = path.symlink_metadata().context(IoSnafu { path })?;

        match live_kind(&metadata) {
            Some(kind) if kind == self.kind() => {}
            Some(kind) => {
                return StateSnafu {
                    operation: "update_from_path",
                    expected: kind,
                    actual: self.kind(),
                }
                .fail();
            }
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "not a directory, regular file or symbolic link",
                ))
                .context(IoSnafu { path });
            }
        }

        let changed = self.reconcile(path, &metadata)?;
        debug!(
            "Updated {} from {} (changed: {})",
            self.kind(),
            path.best_effort_path_display(),
            changed
        );
        Ok(changed)
    }

    fn reconcile(&mut self, path: &Path, metadata: &Metadata) -> Result<bool, FileWrapperError> {
        let recorded = self.fingerprint;
        let mut skipped = std::mem::take(&mut self.skipped);

        let changed = match self.contents_mut() {
            WrapperContents::RegularFile(contents) => {
                let untouched = recorded.is_some()
                    && Fingerprint::observe_path(path, metadata).ok() == recorded;
                if untouched {
                    false
                } else {
                    let live = fs::read(path).context(IoSnafu { path })?;
                    let changed = *contents != live;
                    *contents = live;
                    changed
                }
            }
            WrapperContents::SymbolicLink(destination) => {
                let live = fs::read_link(path).context(IoSnafu { path })?;
                let changed = *destination != live;
                *destination = live;
                changed
            }
            WrapperContents::Directory(children) => {
                reconcile_children(children, &mut skipped, path)?
            }
        };
        self.skipped = skipped;

        let fingerprint = match self.contents() {
            WrapperContents::RegularFile(contents) => Some(Fingerprint::observe(metadata, contents)),
            _ => None,
        };
        self.fingerprint = fingerprint;
        self.set_filename(entry_name(path));
        self.set_attributes(FileAttributes::from_metadata(metadata));
        Ok(changed)
    }
}

fn reconcile_children(
    children: &mut BTreeMap<String, FileWrapper>,
    skipped: &mut BTreeSet<String>,
    path: &Path,
) -> Result<bool, FileWrapperError> {
    let entries = live_entries(path).context(IoSnafu { path })?;
    let mut changed = false;
    skipped.clear();

    let vanished = children
        .keys()
        .filter(|key| !entries.contains_key(*key))
        .cloned()
        .collect::<Vec<_>>();
    for key in vanished {
        debug!("Removing '{}', it no longer exists on disk", key);
        children.remove(&key);
        changed = true;
    }

    for (name, metadata) in entries {
        let child_path = path.join(&name);
        match children.get_mut(&name) {
            Some(child) if live_kind(&metadata) == Some(child.kind()) => {
                match child.reconcile(&child_path, &metadata) {
                    Ok(child_changed) => changed |= child_changed,
                    Err(err) => {
                        warn!("Skipping {}: {}", child_path.display(), err);
                        children.remove(&name);
                        skipped.insert(name);
                        changed = true;
                    }
                }
            }
            _ => match FileWrapper::read_entry(&child_path, &metadata) {
                Ok(fresh) => {
                    debug!("Adding '{}' as a new {}", name, fresh.kind());
                    children.insert(name, fresh);
                    changed = true;
                }
                Err(err) => {
                    warn!("Skipping {}: {}", child_path.display(), err);
                    changed |= children.remove(&name).is_some();
                    skipped.insert(name);
                }
            },
        }
    }

    Ok(changed)
}

fn live_kind(metadata: &Metadata) -> Option<WrapperKind> {
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        Some(WrapperKind::Directory)
    } else if file_type.is_file() {
        Some(WrapperKind::RegularFile)
    } else if file_type.is_symlink() {
        Some(WrapperKind::SymbolicLink)
    } else {
        None
    }
}

/// Entries of `path` that a wrapper could represent, with their metadata.
fn live_entries(path: &Path) -> std::io::Result<BTreeMap<String, Metadata>> {
    let mut entries = BTreeMap::new();
    for entry in fs::read_dir(path)? {
        let Ok(entry) = entry else { continue };
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Ok(metadata) = entry.metadata() else { continue };
        if live_kind(&metadata).is_some() {
            entries.insert(name, metadata);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        root: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("project");
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("readme.txt"), "read me").unwrap();
        fs::write(root.join("docs/guide.md"), "# guide").unwrap();
        Fixture {
            _temp_dir: temp_dir,
            root,
        }
    }

    #[test]
    fn freshly_read_tree_is_not_stale() {
        let fixture = fixture();
        let wrapper = FileWrapper::from_path(&fixture.root).unwrap();

        assert!(!wrapper.needs_to_be_updated_from_path(&fixture.root));
    }

    #[test]
    fn freshly_written_tree_is_not_stale() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        let mut wrapper = FileWrapper::directory([
            ("a.txt".to_string(), FileWrapper::regular_file(b"hello".to_vec())),
            ("sub".to_string(), FileWrapper::directory([])),
        ]);

        wrapper.write_to_file(&out, true, true).unwrap();

        assert!(!wrapper.needs_to_be_updated_from_path(&out));
    }

    #[test]
    fn external_edit_makes_the_tree_stale() {
        let fixture = fixture();
        let wrapper = FileWrapper::from_path(&fixture.root).unwrap();

        fs::write(fixture.root.join("docs/guide.md"), "# a much longer guide").unwrap();

        assert!(wrapper.needs_to_be_updated_from_path(&fixture.root));
    }

    #[test]
    fn added_and_removed_entries_make_the_tree_stale() {
        let fixture = fixture();
        let wrapper = FileWrapper::from_path(&fixture.root).unwrap();

        fs::write(fixture.root.join("new.txt"), "new").unwrap();
        assert!(wrapper.needs_to_be_updated_from_path(&fixture.root));

        fs::remove_file(fixture.root.join("new.txt")).unwrap();
        assert!(!wrapper.needs_to_be_updated_from_path(&fixture.root));

        fs::remove_file(fixture.root.join("readme.txt")).unwrap();
        assert!(wrapper.needs_to_be_updated_from_path(&fixture.root));
    }

    #[test]
    fn missing_path_is_stale() {
        let fixture = fixture();
        let wrapper = FileWrapper::from_path(&fixture.root).unwrap();

        assert!(wrapper.needs_to_be_updated_from_path(fixture.root.join("gone")));
    }

    #[test]
    fn unrecorded_file_compares_contents() {
        let fixture = fixture();
        let path = fixture.root.join("readme.txt");

        assert!(!FileWrapper::regular_file(b"read me".to_vec()).needs_to_be_updated_from_path(&path));
        assert!(FileWrapper::regular_file(b"read you".to_vec()).needs_to_be_updated_from_path(&path));
        assert!(FileWrapper::directory([]).needs_to_be_updated_from_path(&path));
    }

    #[cfg(unix)]
    #[test]
    fn retargeted_link_is_stale() {
        let fixture = fixture();
        let link = fixture.root.join("link");
        std::os::unix::fs::symlink("readme.txt", &link).unwrap();
        let wrapper = FileWrapper::from_path(&link).unwrap();
        assert!(!wrapper.needs_to_be_updated_from_path(&link));

        fs::remove_file(&link).unwrap();
        std::os::unix::fs::symlink("docs", &link).unwrap();

        assert!(wrapper.needs_to_be_updated_from_path(&link));
    }

    #[test]
    fn update_applies_edits_additions_and_removals() {
        let fixture = fixture();
        let mut wrapper = FileWrapper::from_path(&fixture.root).unwrap();
        let docs_id = wrapper.file_wrapper("docs").unwrap().unwrap().id();

        fs::write(fixture.root.join("readme.txt"), "read me, please").unwrap();
        fs::remove_file(fixture.root.join("docs/guide.md")).unwrap();
        fs::write(fixture.root.join("docs/faq.md"), "# faq").unwrap();

        assert!(wrapper.update_from_path(&fixture.root).unwrap());

        let readme = wrapper.file_wrapper("readme.txt").unwrap().unwrap();
        assert_eq!(readme.regular_file_contents().unwrap(), b"read me, please");
        let docs = wrapper.file_wrapper("docs").unwrap().unwrap();
        assert_eq!(docs.id(), docs_id);
        assert_eq!(
            docs.file_wrappers().unwrap().keys().collect::<Vec<_>>(),
            ["faq.md"]
        );
        assert!(!wrapper.needs_to_be_updated_from_path(&fixture.root));
    }

    #[test]
    fn update_without_changes_preserves_identity() {
        let fixture = fixture();
        let mut wrapper = FileWrapper::from_path(&fixture.root).unwrap();
        let readme_id = wrapper.file_wrapper("readme.txt").unwrap().unwrap().id();

        assert!(!wrapper.update_from_path(&fixture.root).unwrap());
        assert_eq!(
            wrapper.file_wrapper("readme.txt").unwrap().unwrap().id(),
            readme_id
        );
    }

    #[test]
    fn update_of_decoded_tree_only_reports_real_differences() {
        let fixture = fixture();
        let mut wrapper = FileWrapper::directory([
            ("readme.txt".to_string(), FileWrapper::regular_file(b"read me".to_vec())),
            (
                "docs".to_string(),
                FileWrapper::directory([(
                    "guide.md".to_string(),
                    FileWrapper::regular_file(b"# guide".to_vec()),
                )]),
            ),
        ]);

        assert!(!wrapper.update_from_path(&fixture.root).unwrap());
        assert!(wrapper.fingerprint().is_none());
        assert!(wrapper.file_wrapper("readme.txt").unwrap().unwrap().fingerprint().is_some());
    }

    #[test]
    fn child_whose_kind_changed_is_replaced() {
        let fixture = fixture();
        let mut wrapper = FileWrapper::from_path(&fixture.root).unwrap();
        let old_id = wrapper.file_wrapper("readme.txt").unwrap().unwrap().id();

        fs::remove_file(fixture.root.join("readme.txt")).unwrap();
        fs::create_dir(fixture.root.join("readme.txt")).unwrap();

        assert!(wrapper.update_from_path(&fixture.root).unwrap());
        let replaced = wrapper.file_wrapper("readme.txt").unwrap().unwrap();
        assert!(replaced.is_directory());
        assert_ne!(replaced.id(), old_id);
    }

    #[test]
    fn root_kind_change_is_a_state_error() {
        let fixture = fixture();
        let mut file = FileWrapper::regular_file(b"x".to_vec());

        let result = file.update_from_path(&fixture.root);

        assert!(matches!(
            result,
            Err(FileWrapperError::StateError {
                expected: WrapperKind::Directory,
                actual: WrapperKind::RegularFile,
                ..
            })
        ));
    }

    #[test]
    fn update_from_missing_path_is_an_io_error() {
        let fixture = fixture();
        let mut wrapper = FileWrapper::from_path(&fixture.root).unwrap();

        let result = wrapper.update_from_path(fixture.root.join("missing"));

        assert!(matches!(result, Err(FileWrapperError::IoError { .. })));
    }

    #[test]
    fn tree_written_over_a_populated_directory_is_not_stale() {
        let fixture = fixture();
        let mut wrapper = FileWrapper::directory([(
            "readme.txt".to_string(),
            FileWrapper::regular_file(b"rewritten".to_vec()),
        )]);

        wrapper.write_to_file(&fixture.root, true, true).unwrap();

        assert!(!fixture.root.join("docs").exists());
        assert!(!wrapper.needs_to_be_updated_from_path(&fixture.root));
    }

    #[test]
    fn skipped_entries_do_not_make_the_tree_stale() {
        let fixture = fixture();
        let mut wrapper = FileWrapper::from_path(&fixture.root).unwrap();
        let readme = wrapper.file_wrapper("readme.txt").unwrap().unwrap().id();
        wrapper.remove_file_wrapper(readme).unwrap();
        assert!(wrapper.needs_to_be_updated_from_path(&fixture.root));

        wrapper.skipped.insert("readme.txt".to_string());

        assert!(!wrapper.needs_to_be_updated_from_path(&fixture.root));
        fs::write(fixture.root.join("other.txt"), "other").unwrap();
        assert!(wrapper.needs_to_be_updated_from_path(&fixture.root));
    }

    #[test]
    fn update_forgets_skipped_entries_that_vanished() {
        let fixture = fixture();
        let mut wrapper = FileWrapper::from_path(&fixture.root).unwrap();
        wrapper.skipped.insert("gone.txt".to_string());

        wrapper.update_from_path(&fixture.root).unwrap();

        assert!(wrapper.skipped.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_entry_is_not_stale_after_update() {
        use std::os::unix::fs::PermissionsExt;

        let fixture = fixture();
        let mut wrapper = FileWrapper::from_path(&fixture.root).unwrap();
        let locked = fixture.root.join("locked.txt");
        fs::write(&locked, "locked").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            // Privileged users read through the mode bits.
            return;
        }
        assert!(wrapper.needs_to_be_updated_from_path(&fixture.root));

        wrapper.update_from_path(&fixture.root).unwrap();

        assert!(wrapper.file_wrapper("locked.txt").unwrap().is_none());
        assert!(!wrapper.needs_to_be_updated_from_path(&fixture.root));
    }
}
