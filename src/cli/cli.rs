use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::application::data::LogLevel;

/// Pack filesystem trees into archives and write them back.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[clap(long, short, default_value = "warn", value_enum, global = true)]
    pub log_level: LogLevel,

    /// The project directory holding filewrap.yaml
    #[clap(long, short, default_value = ".", global = true)]
    pub root: PathBuf,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read a directory, file or symbolic link into an archive
    Pack { source: PathBuf, archive: PathBuf },
    /// Write the contents of an archive to disk
    Unpack {
        archive: PathBuf,
        destination: PathBuf,
        /// Write files in place instead of through a temporary file
        #[clap(long)]
        no_atomic: bool,
    },
    /// Print the tree stored in an archive
    List { archive: PathBuf },
    /// Report whether a path differs from an archive
    Status { archive: PathBuf, path: PathBuf },
    /// Bring an archive up to date with a path
    Sync { archive: PathBuf, path: PathBuf },
}
