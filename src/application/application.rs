use std::path::PathBuf;

use snafu::Snafu;
use snafu::prelude::*;
use tracing::debug;

use crate::application::RuntimeConfig;
use crate::application::commands;
use crate::cli::Command;
use crate::config::{ProjectConfig, ProjectConfigCreationError};
use crate::ext::BestEffortPathExt;
use crate::wrapper::{ArchiveError, FileWrapperError};

pub struct Application;

impl Application {
    pub async fn run(runtime_config: impl Into<RuntimeConfig>) -> Result<(), ApplicationError> {
        let runtime_config: RuntimeConfig = runtime_config.into();
        let config = ProjectConfig::read(&runtime_config.root)
            .await
            .context(ConfigSnafu)?;
        debug!("Loaded config: {:?}", config);

        match runtime_config.command {
            Command::Pack { source, archive } => commands::pack(&config, &source, &archive).await,
            Command::Unpack {
                archive,
                destination,
                no_atomic,
            } => commands::unpack(&config, &archive, &destination, no_atomic).await,
            Command::List { archive } => commands::list(&archive).await,
            Command::Status { archive, path } => commands::status(&archive, &path).await,
            Command::Sync { archive, path } => commands::sync(&config, &archive, &path).await,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered during configuration stage"))]
    ConfigError { source: ProjectConfigCreationError },
    #[snafu(display("Failed to read archive {}", path.best_effort_path_display()))]
    ArchiveReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Archive {} is not usable", path.best_effort_path_display()))]
    ArchiveDecodeError {
        path: PathBuf,
        source: FileWrapperError,
    },
    #[snafu(display("Failed to encode the archive for {}", path.best_effort_path_display()))]
    ArchiveEncodeError { path: PathBuf, source: ArchiveError },
    #[snafu(display("Failed to store archive {}", path.best_effort_path_display()))]
    ArchiveWriteError {
        path: PathBuf,
        source: FileWrapperError,
    },
    #[snafu(display("Failed to read {}", path.best_effort_path_display()))]
    TreeReadError {
        path: PathBuf,
        source: FileWrapperError,
    },
    #[snafu(display("Failed to write {}", path.best_effort_path_display()))]
    TreeWriteError {
        path: PathBuf,
        source: FileWrapperError,
    },
}
