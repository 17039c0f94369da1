use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, Metadata};
use std::io::{ErrorKind, Write};
use std::path::Path;

use snafu::ResultExt;
use tracing::{debug, warn};

use crate::ext::BestEffortPathExt;
use crate::wrapper::error::{InvalidNameSnafu, IoSnafu};
use crate::wrapper::file_wrapper::is_usable_name;
use crate::wrapper::{FileAttributes, FileWrapper, FileWrapperError, Fingerprint, WrapperContents};

const TEMP_FILE_PREFIX: &str = ".filewrap-";

impl FileWrapper {
    /// Reads the entry at `path` without following symbolic links.
    ///
    /// Directories are read recursively. Entries below the root that cannot
    /// be read (unreadable, non UTF-8 names, sockets, devices...) are skipped.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FileWrapperError> {
        let path = path.as_ref();
        let metadata = path.symlink_metadata().context(IoSnafu { path })?;
        Self::read_entry(path, &metadata)
    }

    pub(crate) fn read_entry(path: &Path, metadata: &Metadata) -> Result<Self, FileWrapperError> {
        let file_type = metadata.file_type();

        let mut wrapper = if file_type.is_dir() {
            Self::read_directory(path)?
        } else if file_type.is_file() {
            let contents = fs::read(path).context(IoSnafu { path })?;
            let fingerprint = Fingerprint::observe(metadata, &contents);
            let mut wrapper = FileWrapper::regular_file(contents);
            wrapper.fingerprint = Some(fingerprint);
            wrapper
        } else if file_type.is_symlink() {
            FileWrapper::symbolic_link(fs::read_link(path).context(IoSnafu { path })?)
        } else {
            return Err(std::io::Error::new(
                ErrorKind::Unsupported,
                "not a directory, regular file or symbolic link",
            ))
            .context(IoSnafu { path });
        };

        let name = entry_name(path);
        wrapper.set_filename(name.clone());
        wrapper.set_preferred_filename(name);
        wrapper.set_attributes(FileAttributes::from_metadata(metadata));
        Ok(wrapper)
    }

    fn read_directory(path: &Path) -> Result<Self, FileWrapperError> {
        debug!("Reading directory {}", path.best_effort_path_display());
        let entries = fs::read_dir(path).context(IoSnafu { path })?;

        let mut children = BTreeMap::new();
        let mut skipped = BTreeSet::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry in {}: {}", path.display(), err);
                    continue;
                }
            };
            let child_path = entry.path();
            let Ok(name) = entry.file_name().into_string() else {
                warn!("Skipping entry with a non UTF-8 name: {}", child_path.display());
                continue;
            };
            match FileWrapper::from_path(&child_path) {
                Ok(child) => {
                    children.insert(name, child);
                }
                Err(err) => {
                    warn!("Skipping {}: {}", child_path.display(), err);
                    skipped.insert(name);
                }
            }
        }

        let mut wrapper = FileWrapper::directory(children);
        wrapper.skipped = skipped;
        Ok(wrapper)
    }

    /// Reads `path` and adds the result to this directory.
    pub fn add_file_with_path(&mut self, path: impl AsRef<Path>) -> Result<String, FileWrapperError> {
        self.ensure_directory("add_file_with_path")?;
        let child = FileWrapper::from_path(path)?;
        self.add_file_wrapper(child)
    }

    /// Persists this wrapper, and for directories every descendant, at `path`.
    ///
    /// An existing directory at a directory's destination is reused, minus
    /// the entries that are not among its keys. Anything else in the way,
    /// symbolic links included, is replaced and never followed. With
    /// `atomically`, regular files are written to a temporary file in the
    /// destination directory and renamed into place. With
    /// `update_filenames`, a successful write sets every node's filename to
    /// the name it was written under. A failing child stops the write; what
    /// was already written stays on disk.
    pub fn write_to_file(
        &mut self,
        path: impl AsRef<Path>,
        atomically: bool,
        update_filenames: bool,
    ) -> Result<(), FileWrapperError> {
        let path = path.as_ref();
        debug!(
            "Writing {} to {} (atomically: {})",
            self.kind(),
            path.best_effort_path_display(),
            atomically
        );

        self.write_entry(path, atomically)?;

        if update_filenames {
            self.assign_filenames(entry_name(path));
        }
        Ok(())
    }

    fn write_entry(&mut self, path: &Path, atomically: bool) -> Result<(), FileWrapperError> {
        match self.contents_mut() {
            WrapperContents::Directory(children) => {
                if let Some(key) = children.keys().find(|key| !is_usable_name(key)) {
                    return InvalidNameSnafu { name: key.clone() }.fail();
                }
                prepare_directory(path, children).context(IoSnafu { path })?;
                for (key, child) in children.iter_mut() {
                    child.write_entry(&path.join(key), atomically)?;
                }
            }
            WrapperContents::RegularFile(contents) => {
                write_regular_file(path, contents, atomically).context(IoSnafu { path })?;
            }
            WrapperContents::SymbolicLink(destination) => {
                write_symbolic_link(path, destination).context(IoSnafu { path })?;
                return Ok(());
            }
        }
        self.skipped.clear();

        self.attributes()
            .apply_permissions(path)
            .context(IoSnafu { path })?;

        if let WrapperContents::RegularFile(contents) = self.contents() {
            let metadata = path.symlink_metadata().context(IoSnafu { path })?;
            self.fingerprint = Some(Fingerprint::observe(&metadata, contents));
        }
        Ok(())
    }

    fn assign_filenames(&mut self, name: Option<String>) {
        self.set_filename(name);
        if let WrapperContents::Directory(children) = self.contents_mut() {
            for (key, child) in children.iter_mut() {
                child.assign_filenames(Some(key.clone()));
            }
        }
    }
}

pub(crate) fn entry_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

/// Makes `path` a real directory holding no entries besides `children`' keys.
fn prepare_directory(path: &Path, children: &BTreeMap<String, FileWrapper>) -> std::io::Result<()> {
    match path.symlink_metadata() {
        Ok(metadata) if metadata.is_dir() => prune_directory(path, children),
        Ok(_) => {
            debug!("Replacing {} with a directory", path.display());
            fs::remove_file(path)?;
            fs::create_dir(path)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => fs::create_dir_all(path),
        Err(err) => Err(err),
    }
}

fn prune_directory(path: &Path, children: &BTreeMap<String, FileWrapper>) -> std::io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let keep = entry
            .file_name()
            .to_str()
            .is_some_and(|name| children.contains_key(name));
        if keep {
            continue;
        }

        let stray = entry.path();
        debug!("Removing {}, it is not part of the tree", stray.display());
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&stray)?;
        } else {
            fs::remove_file(&stray)?;
        }
    }
    Ok(())
}

fn write_regular_file(path: &Path, contents: &[u8], atomically: bool) -> std::io::Result<()> {
    if !atomically {
        remove_symbolic_link(path)?;
        return fs::write(path, contents);
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_FILE_PREFIX);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Same mode as a plain create, the umask still applies.
        builder.permissions(fs::Permissions::from_mode(0o666));
    }

    let mut temp_file = builder.tempfile_in(parent)?;
    temp_file.write_all(contents)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn write_symbolic_link(path: &Path, destination: &Path) -> std::io::Result<()> {
    if let Ok(existing) = path.symlink_metadata() {
        if !existing.is_dir() {
            fs::remove_file(path)?;
        }
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(destination, path)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(destination, path)
    }
}

fn remove_symbolic_link(path: &Path) -> std::io::Result<()> {
    match path.symlink_metadata() {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::remove_file(path),
        _ => Ok(()),
    }
}
