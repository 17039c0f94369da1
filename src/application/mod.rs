//! The `filewrap` command line application on top of the wrapper library.

mod application;
mod commands;
pub mod data;
mod listing;
mod runtime_config;

pub use application::{Application, ApplicationError};
pub use listing::{TreeSummary, render_tree};
pub use runtime_config::RuntimeConfig;
