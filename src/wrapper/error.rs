use std::path::PathBuf;

use snafu::Snafu;

use crate::ext::BestEffortPathExt;
use crate::wrapper::{ArchiveError, WrapperId, WrapperKind};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FileWrapperError {
    #[snafu(display("Filesystem operation failed at {}", path.best_effort_path_display()))]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Malformed serialized representation"))]
    FormatError { source: ArchiveError },
    #[snafu(display(
        "Operation '{}' requires a {} wrapper, but this wrapper is a {}",
        operation,
        expected,
        actual
    ))]
    StateError {
        operation: &'static str,
        expected: WrapperKind,
        actual: WrapperKind,
    },
    #[snafu(display("Wrapper {} is not a direct member of this directory", id))]
    NotFoundError { id: WrapperId },
    #[snafu(display("'{}' cannot be used as a file name", name))]
    InvalidNameError { name: String },
}
