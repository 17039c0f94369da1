use std::borrow::Cow;
use std::path::{Path, PathBuf};

use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use tracing::debug;

use crate::ext::{AsyncTryFrom, BestEffortPathExt};
use crate::wrapper::ArchiveOptions;

const CONFIG_FILE_NAME: &str = "filewrap.yaml";

type Mapping<'input> = LinkedHashMap<Yaml<'input>, Yaml<'input>>;

fn get_config_file_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

/// Defaults used when writing a wrapper tree to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub atomically: bool,
    pub update_filenames: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            atomically: true,
            update_filenames: true,
        }
    }
}

/// Settings read from `filewrap.yaml` in the project root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectConfig {
    pub archive: ArchiveOptions,
    pub write: WriteOptions,
}

impl ProjectConfig {
    /// Reads the config of the project at `root`, falling back to defaults
    /// when there is no config file.
    pub async fn read(root: &Path) -> Result<Self, ProjectConfigCreationError> {
        let path = get_config_file_path(root);
        if !path.exists() {
            debug!(
                "No config file at {}, using defaults",
                path.best_effort_path_display()
            );
            return Ok(Self::default());
        }
        Self::async_try_from(path.as_path()).await
    }

    fn parse_archive_section(
        section: &Mapping<'_>,
        options: &mut ArchiveOptions,
    ) -> Result<(), ProjectConfigCreationError> {
        for (key, value) in section {
            match key.as_str() {
                Some("compress") => options.compress = expect_bool("archive", "compress", value)?,
                Some("compression_level") => {
                    options.compression_level =
                        expect_i32("archive", "compression_level", value)?;
                }
                _ => debug!("Ignoring unknown archive setting: {:?}", key),
            }
        }
        Ok(())
    }

    fn parse_write_section(
        section: &Mapping<'_>,
        options: &mut WriteOptions,
    ) -> Result<(), ProjectConfigCreationError> {
        for (key, value) in section {
            match key.as_str() {
                Some("atomically") => options.atomically = expect_bool("write", "atomically", value)?,
                Some("update_filenames") => {
                    options.update_filenames = expect_bool("write", "update_filenames", value)?;
                }
                _ => debug!("Ignoring unknown write setting: {:?}", key),
            }
        }
        Ok(())
    }
}

impl AsyncTryFrom<&Path> for ProjectConfig {
    type Error = ProjectConfigCreationError;

    async fn async_try_from(path: &Path) -> Result<Self, Self::Error> {
        debug!("Reading config file: {}", path.best_effort_path_display());
        let bytes = compio::fs::read(path).await.context(ReadSnafu {
            file_path: path.best_effort_path_display(),
        })?;
        let contents = String::from_utf8_lossy(&bytes);
        ProjectConfig::try_from(&*contents)
    }
}

impl TryFrom<&str> for ProjectConfig {
    type Error = ProjectConfigCreationError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let documents = Yaml::load_from_str(contents).context(ParseSnafu)?;
        let mut config = ProjectConfig::default();

        let Some(document) = documents.first() else {
            return Ok(config);
        };
        let top_level = document.as_mapping().context(TopLevelNotMapSnafu)?;

        if let Some(archive) = section(top_level, "archive")? {
            Self::parse_archive_section(archive, &mut config.archive)?;
        }
        if let Some(write) = section(top_level, "write")? {
            Self::parse_write_section(write, &mut config.write)?;
        }

        Ok(config)
    }
}

fn key(name: &'static str) -> Yaml<'static> {
    Yaml::Value(Scalar::String(Cow::Borrowed(name)))
}

fn section<'a, 'input>(
    top_level: &'a Mapping<'input>,
    name: &'static str,
) -> Result<Option<&'a Mapping<'input>>, ProjectConfigCreationError> {
    match top_level.get(&key(name)) {
        None | Some(Yaml::Value(Scalar::Null)) => Ok(None),
        Some(value) => value
            .as_mapping()
            .map(Some)
            .context(SectionNotMapSnafu { section: name }),
    }
}

fn expect_bool(
    section: &'static str,
    key: &'static str,
    value: &Yaml<'_>,
) -> Result<bool, ProjectConfigCreationError> {
    match value {
        Yaml::Value(Scalar::Boolean(flag)) => Ok(*flag),
        _ => InvalidValueSnafu {
            section,
            key,
            expected: "a boolean",
        }
        .fail(),
    }
}

fn expect_i32(
    section: &'static str,
    key: &'static str,
    value: &Yaml<'_>,
) -> Result<i32, ProjectConfigCreationError> {
    let number = match value {
        Yaml::Value(Scalar::Integer(number)) => i32::try_from(*number).ok(),
        _ => None,
    };
    number.context(InvalidValueSnafu {
        section,
        key,
        expected: "a 32-bit integer",
    })
}

#[derive(Debug, Snafu)]
pub enum ProjectConfigCreationError {
    #[snafu(display("Failed to read the config file: {}", file_path))]
    ReadError {
        file_path: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse the config file"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Top level of config should be a map"))]
    TopLevelNotMap,
    #[snafu(display("The '{}' section should be a map", section))]
    SectionNotMap { section: &'static str },
    #[snafu(display("'{}.{}' should be {}", section, key, expected))]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        expected: &'static str,
    },
}
