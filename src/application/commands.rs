use std::path::Path;

use snafu::ResultExt;
use tracing::info;

use crate::application::application::{
    ApplicationError, ArchiveDecodeSnafu, ArchiveEncodeSnafu, ArchiveReadSnafu, ArchiveWriteSnafu,
    TreeReadSnafu, TreeWriteSnafu,
};
use crate::application::{TreeSummary, render_tree};
use crate::config::ProjectConfig;
use crate::ext::BestEffortPathExt;
use crate::wrapper::{ArchiveOptions, FileWrapper};

pub async fn pack(
    config: &ProjectConfig,
    source: &Path,
    archive: &Path,
) -> Result<(), ApplicationError> {
    let wrapper = FileWrapper::from_path(source).context(TreeReadSnafu { path: source })?;
    store_archive(archive, &wrapper, config.archive)?;

    let summary = TreeSummary::from(&wrapper);
    info!("Packed {} into {}", source.display(), archive.display());
    println!("Packed {summary} into {}", archive.best_effort_path_display());
    Ok(())
}

pub async fn unpack(
    config: &ProjectConfig,
    archive: &Path,
    destination: &Path,
    no_atomic: bool,
) -> Result<(), ApplicationError> {
    let mut wrapper = load_archive(archive).await?;
    let atomically = config.write.atomically && !no_atomic;

    wrapper
        .write_to_file(destination, atomically, config.write.update_filenames)
        .context(TreeWriteSnafu { path: destination })?;

    info!("Unpacked {} into {}", archive.display(), destination.display());
    println!(
        "Unpacked {} into {}",
        TreeSummary::from(&wrapper),
        destination.best_effort_path_display()
    );
    Ok(())
}

pub async fn list(archive: &Path) -> Result<(), ApplicationError> {
    let wrapper = load_archive(archive).await?;
    let colorize = supports_color::on(supports_color::Stream::Stdout).is_some();

    print!("{}", render_tree(&wrapper, colorize));
    println!("{}", TreeSummary::from(&wrapper));
    Ok(())
}

pub async fn status(archive: &Path, path: &Path) -> Result<(), ApplicationError> {
    let wrapper = load_archive(archive).await?;

    if wrapper.needs_to_be_updated_from_path(path) {
        println!("{} differs from {}", path.display(), archive.display());
    } else {
        println!("{} matches {}", path.display(), archive.display());
    }
    Ok(())
}

pub async fn sync(config: &ProjectConfig, archive: &Path, path: &Path) -> Result<(), ApplicationError> {
    let mut wrapper = load_archive(archive).await?;

    let changed = wrapper
        .update_from_path(path)
        .context(TreeReadSnafu { path })?;

    if changed {
        store_archive(archive, &wrapper, config.archive)?;
        info!("Updated {} from {}", archive.display(), path.display());
        println!("Updated {} from {}", archive.display(), path.display());
    } else {
        println!("{} is already up to date", archive.display());
    }
    Ok(())
}

async fn load_archive(path: &Path) -> Result<FileWrapper, ApplicationError> {
    let bytes = compio::fs::read(path)
        .await
        .context(ArchiveReadSnafu { path })?;
    FileWrapper::from_serialized_representation(&bytes).context(ArchiveDecodeSnafu { path })
}

/// Archives are replaced atomically, a failed write keeps the previous one.
fn store_archive(
    path: &Path,
    wrapper: &FileWrapper,
    options: ArchiveOptions,
) -> Result<(), ApplicationError> {
    let bytes = wrapper
        .serialized_representation_with(options)
        .context(ArchiveEncodeSnafu { path })?;

    FileWrapper::regular_file(bytes)
        .write_to_file(path, true, false)
        .context(ArchiveWriteSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Workspace {
        temp_dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let source = temp_dir.path().join("source");
            fs::create_dir_all(source.join("nested")).unwrap();
            fs::write(source.join("a.txt"), "hello").unwrap();
            fs::write(source.join("nested/b.txt"), "world").unwrap();
            Self { temp_dir }
        }

        fn path(&self, name: &str) -> std::path::PathBuf {
            self.temp_dir.path().join(name)
        }
    }

    #[compio::test]
    async fn pack_then_unpack_reproduces_the_tree() {
        let workspace = Workspace::new();
        let config = ProjectConfig::default();
        let archive = workspace.path("tree.fwrp");

        pack(&config, &workspace.path("source"), &archive).await.unwrap();
        unpack(&config, &archive, &workspace.path("copy"), false)
            .await
            .unwrap();

        let original = FileWrapper::from_path(workspace.path("source")).unwrap();
        let copy = FileWrapper::from_path(workspace.path("copy")).unwrap();
        assert!(original.same_structure(&copy));
    }

    #[compio::test]
    async fn sync_rewrites_the_archive_only_when_needed() {
        let workspace = Workspace::new();
        let config = ProjectConfig::default();
        let archive = workspace.path("tree.fwrp");
        pack(&config, &workspace.path("source"), &archive).await.unwrap();

        fs::write(workspace.path("source/c.txt"), "new file").unwrap();
        sync(&config, &archive, &workspace.path("source")).await.unwrap();

        let synced = load_archive(&archive).await.unwrap();
        assert!(synced.file_wrapper("c.txt").unwrap().is_some());
        assert!(!synced.needs_to_be_updated_from_path(workspace.path("source")));
    }

    #[compio::test]
    async fn load_archive_reports_missing_and_corrupt_files() {
        let workspace = Workspace::new();
        fs::write(workspace.path("junk.fwrp"), "definitely not an archive").unwrap();

        assert!(matches!(
            load_archive(&workspace.path("missing.fwrp")).await,
            Err(ApplicationError::ArchiveReadError { .. })
        ));
        assert!(matches!(
            load_archive(&workspace.path("junk.fwrp")).await,
            Err(ApplicationError::ArchiveDecodeError { .. })
        ));
    }

    #[compio::test]
    async fn pack_reports_missing_source() {
        let workspace = Workspace::new();

        let result = pack(
            &ProjectConfig::default(),
            &workspace.path("nope"),
            &workspace.path("tree.fwrp"),
        )
        .await;

        assert!(matches!(result, Err(ApplicationError::TreeReadError { .. })));
        assert!(!workspace.path("tree.fwrp").exists());
    }
}
