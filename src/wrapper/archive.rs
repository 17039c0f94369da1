//! Self-describing byte encoding of a wrapper tree.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "FWRP"
//!      4     1  format version
//!      5     1  flags, bit 0 set when the payload is zstd compressed
//!      6     8  MetroHash64 of the payload, little endian
//!     14     -  payload: bincode (standard config) encoded node list
//! ```
//!
//! The payload is the list of nodes in pre-order. Every node but the first
//! names its parent directory by index, which is always smaller than its own.
//! Nodes carry names, attributes, icons and kind-specific payloads. Recorded
//! fingerprints and identities are not part of the archive.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

use bincode::{Decode, Encode};
use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;

use crate::wrapper::error::FormatSnafu;
use crate::wrapper::file_wrapper::is_usable_name;
use crate::wrapper::fingerprint::content_hash;
use crate::wrapper::{FileAttributes, FileWrapper, FileWrapperError, Icon, WrapperContents};

const MAGIC: &[u8; 4] = b"FWRP";
const FORMAT_VERSION: u8 = 1;
const FLAG_ZSTD: u8 = 0b0000_0001;
const KNOWN_FLAGS: u8 = FLAG_ZSTD;
const HEADER_LEN: usize = 14;
/// Upper bound for a single decoded payload.
const DECODE_LIMIT: usize = 1 << 30;
/// Deepest directory nesting a decoded tree may have, the root being 0.
pub const MAX_DEPTH: usize = 1024;

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub compress: bool,
    /// zstd level; 0 selects zstd's own default.
    pub compression_level: i32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compress: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Encode, Decode)]
struct ArchivedNode {
    /// `None` for the root only.
    entry: Option<ArchivedEntry>,
    filename: Option<String>,
    preferred_filename: Option<String>,
    attributes: FileAttributes,
    icon: Option<Icon>,
    payload: ArchivedPayload,
}

#[derive(Debug, Encode, Decode)]
struct ArchivedEntry {
    parent: usize,
    key: String,
}

#[derive(Debug, Encode, Decode)]
enum ArchivedPayload {
    Directory,
    RegularFile(Vec<u8>),
    SymbolicLink(Vec<u8>),
}

impl FileWrapper {
    /// Encodes this wrapper and all its descendants with default options.
    pub fn serialized_representation(&self) -> Result<Vec<u8>, ArchiveError> {
        self.serialized_representation_with(ArchiveOptions::default())
    }

    pub fn serialized_representation_with(
        &self,
        options: ArchiveOptions,
    ) -> Result<Vec<u8>, ArchiveError> {
        let encoded = bincode::encode_to_vec(flatten(self), bincode::config::standard())
            .context(EncodeSnafu)?;

        let (flags, payload) = if options.compress {
            let compressed = zstd::encode_all(encoded.as_slice(), options.compression_level)
                .context(CompressSnafu)?;
            (FLAG_ZSTD, compressed)
        } else {
            (0, encoded)
        };

        debug!(
            "Serialized {} into {} payload bytes (flags {:#04b})",
            self.kind(),
            payload.len(),
            flags
        );
        Ok(seal(flags, &payload))
    }

    /// Rebuilds a tree from the output of [`FileWrapper::serialized_representation`].
    pub fn from_serialized_representation(bytes: &[u8]) -> Result<Self, FileWrapperError> {
        decode(bytes, DECODE_LIMIT).context(FormatSnafu)
    }
}

fn seal(flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut archive = Vec::with_capacity(HEADER_LEN + payload.len());
    archive.extend_from_slice(MAGIC);
    archive.push(FORMAT_VERSION);
    archive.push(flags);
    archive.extend_from_slice(&content_hash(payload).to_le_bytes());
    archive.extend_from_slice(payload);
    archive
}

/// Decodes an archive whose payload decompresses to at most `limit` bytes.
fn decode(bytes: &[u8], limit: usize) -> Result<FileWrapper, ArchiveError> {
    ensure!(bytes.len() >= HEADER_LEN, TruncatedSnafu { len: bytes.len() });
    let (header, payload) = bytes.split_at(HEADER_LEN);

    ensure!(&header[0..4] == MAGIC, MagicSnafu);
    let version = header[4];
    ensure!(version == FORMAT_VERSION, VersionSnafu { version });
    let flags = header[5];
    ensure!(flags & !KNOWN_FLAGS == 0, FlagsSnafu { flags });

    let mut checksum = [0u8; 8];
    checksum.copy_from_slice(&header[6..HEADER_LEN]);
    let expected = u64::from_le_bytes(checksum);
    let actual = content_hash(payload);
    ensure!(expected == actual, ChecksumSnafu { expected, actual });

    let decompressed;
    let encoded = if flags & FLAG_ZSTD != 0 {
        decompressed = decompress(payload, limit)?;
        decompressed.as_slice()
    } else {
        ensure!(payload.len() <= limit, OversizedSnafu { limit });
        payload
    };

    let config = bincode::config::standard().with_limit::<DECODE_LIMIT>();
    let (nodes, consumed): (Vec<ArchivedNode>, usize) =
        bincode::decode_from_slice(encoded, config).context(DecodeSnafu)?;
    ensure!(
        consumed == encoded.len(),
        TrailingBytesSnafu {
            count: encoded.len() - consumed
        }
    );

    assemble(nodes)
}

/// Inflates a zstd payload, giving up once it exceeds `limit` bytes.
fn decompress(payload: &[u8], limit: usize) -> Result<Vec<u8>, ArchiveError> {
    let decoder = zstd::stream::read::Decoder::new(payload).context(DecompressSnafu)?;
    let mut decompressed = Vec::new();
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut decompressed)
        .context(DecompressSnafu)?;
    ensure!(decompressed.len() <= limit, OversizedSnafu { limit });
    Ok(decompressed)
}

/// Lists `root` and its descendants in pre-order without recursing.
fn flatten(root: &FileWrapper) -> Vec<ArchivedNode> {
    let mut nodes = Vec::new();
    let mut pending = vec![(None, root)];

    while let Some((entry, wrapper)) = pending.pop() {
        let index = nodes.len();
        let payload = match wrapper.contents() {
            WrapperContents::Directory(children) => {
                pending.extend(children.iter().rev().map(|(key, child)| {
                    let entry = ArchivedEntry {
                        parent: index,
                        key: key.clone(),
                    };
                    (Some(entry), child)
                }));
                ArchivedPayload::Directory
            }
            WrapperContents::RegularFile(contents) => ArchivedPayload::RegularFile(contents.clone()),
            WrapperContents::SymbolicLink(destination) => {
                ArchivedPayload::SymbolicLink(path_to_bytes(destination))
            }
        };

        nodes.push(ArchivedNode {
            entry,
            filename: wrapper.filename().map(str::to_string),
            preferred_filename: wrapper.preferred_filename().map(str::to_string),
            attributes: wrapper.attributes().clone(),
            icon: wrapper.icon().cloned(),
            payload,
        });
    }
    nodes
}

/// Validates the node list, then builds the tree from the leaves up.
fn assemble(nodes: Vec<ArchivedNode>) -> Result<FileWrapper, ArchiveError> {
    ensure!(!nodes.is_empty(), EmptySnafu);

    let mut depths: Vec<usize> = Vec::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        let depth = match &node.entry {
            None if index == 0 => 0,
            Some(entry) if index > 0 && entry.parent < index => {
                ensure!(
                    matches!(nodes[entry.parent].payload, ArchivedPayload::Directory),
                    ParentSnafu { index }
                );
                ensure!(
                    is_usable_name(&entry.key),
                    InvalidKeySnafu {
                        key: entry.key.clone()
                    }
                );
                depths[entry.parent] + 1
            }
            _ => return ParentSnafu { index }.fail(),
        };
        ensure!(depth <= MAX_DEPTH, DepthSnafu { limit: MAX_DEPTH });
        depths.push(depth);
    }

    let mut children: Vec<BTreeMap<String, FileWrapper>> =
        nodes.iter().map(|_| BTreeMap::new()).collect();

    for (index, node) in nodes.into_iter().enumerate().rev() {
        let contents = match node.payload {
            ArchivedPayload::Directory => {
                WrapperContents::Directory(std::mem::take(&mut children[index]))
            }
            ArchivedPayload::RegularFile(contents) => WrapperContents::RegularFile(contents),
            ArchivedPayload::SymbolicLink(destination) => {
                WrapperContents::SymbolicLink(path_from_bytes(destination))
            }
        };

        let mut wrapper = FileWrapper::from_contents(contents);
        wrapper.set_filename(node.filename);
        wrapper.set_preferred_filename(node.preferred_filename);
        wrapper.set_attributes(node.attributes);
        wrapper.set_icon(node.icon);

        let Some(ArchivedEntry { parent, key }) = node.entry else {
            return Ok(wrapper);
        };
        let siblings = &mut children[parent];
        ensure!(!siblings.contains_key(&key), DuplicateKeySnafu { key });
        siblings.insert(key, wrapper);
    }

    EmptySnafu.fail()
}

#[cfg(unix)]
fn path_to_bytes(path: &std::path::Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_to_bytes(path: &std::path::Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ArchiveError {
    #[snafu(display("Archive is {} bytes long, shorter than its {} byte header", len, HEADER_LEN))]
    TruncatedError { len: usize },
    #[snafu(display("Archive does not start with the FWRP magic bytes"))]
    MagicError,
    #[snafu(display("Unsupported archive format version {}", version))]
    VersionError { version: u8 },
    #[snafu(display("Unknown archive flags {:#010b}", flags))]
    FlagsError { flags: u8 },
    #[snafu(display(
        "Archive checksum mismatch: header says {:#018x}, payload hashes to {:#018x}",
        expected,
        actual
    ))]
    ChecksumError { expected: u64, actual: u64 },
    #[snafu(display("Failed to compress the archive payload"))]
    CompressError { source: std::io::Error },
    #[snafu(display("Failed to decompress the archive payload"))]
    DecompressError { source: std::io::Error },
    #[snafu(display("Archive payload is larger than {} bytes", limit))]
    OversizedError { limit: usize },
    #[snafu(display("Failed to encode the wrapper tree"))]
    EncodeError {
        source: bincode::error::EncodeError,
    },
    #[snafu(display("Failed to decode the wrapper tree"))]
    DecodeError {
        source: bincode::error::DecodeError,
    },
    #[snafu(display("Archive payload has {} unexpected trailing bytes", count))]
    TrailingBytesError { count: usize },
    #[snafu(display("Directory entry '{}' appears more than once", key))]
    DuplicateKeyError { key: String },
    #[snafu(display("Directory entry '{}' is not a valid file name", key))]
    InvalidKeyError { key: String },
    #[snafu(display("Archive contains no nodes"))]
    EmptyError,
    #[snafu(display("Node {} does not name an earlier directory as its parent", index))]
    ParentError { index: usize },
    #[snafu(display("Directories are nested deeper than {} levels", limit))]
    DepthError { limit: usize },
}
