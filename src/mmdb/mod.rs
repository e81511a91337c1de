//! MaxMind DB (MMDB) trie reading and writing.
//!
//! ## Architecture
//!
//! - **decoder**: walks an existing database and groups its networks by country
//! - **tree**: arena-allocated search tree builder with replace-on-conflict inserts
//! - **data**: data section encoder for the value types the writer needs
//! - **encoder**: assembles tree, data section and metadata into a database

pub mod data;
pub mod decoder;
pub mod encoder;
pub mod tree;

use crate::error::{Error, Result};

pub use decoder::{decode, DecodedTrie};
pub use encoder::{encode, TrieBuildOptions};

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Size of the zeroed separator between search tree and data section.
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// IP version of a search tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 only (32-bit tree)
    V4,
    /// IPv6, with IPv4 under `::/96` (128-bit tree)
    V6,
}

impl IpVersion {
    /// Parse the metadata `ip_version` value.
    pub fn from_number(version: u16) -> Result<Self> {
        match version {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            _ => Err(Error::Decode(format!("unsupported ip_version {}", version))),
        }
    }

    /// The metadata `ip_version` value.
    pub fn number(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    /// Tree depth in bits.
    pub fn bit_count(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSize {
    /// 24-bit records (6 bytes per node)
    Bits24,
    /// 28-bit records (7 bytes per node)
    Bits28,
    /// 32-bit records (8 bytes per node)
    Bits32,
}

impl RecordSize {
    /// Create from bit size
    pub fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(Error::Decode(format!("invalid record size: {} bits", bits))),
        }
    }

    /// Bit size as stored in metadata.
    pub fn bits(self) -> u16 {
        match self {
            RecordSize::Bits24 => 24,
            RecordSize::Bits28 => 28,
            RecordSize::Bits32 => 32,
        }
    }

    /// Size of a node (two records) in bytes.
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Largest value a record can hold.
    pub fn max_value(self) -> u32 {
        match self {
            RecordSize::Bits24 => (1 << 24) - 1,
            RecordSize::Bits28 => (1 << 28) - 1,
            RecordSize::Bits32 => u32::MAX,
        }
    }

    /// Read the (left, right) records of a node.
    pub(crate) fn read_node(self, tree: &[u8], node: usize) -> Option<(u32, u32)> {
        let offset = node.checked_mul(self.node_bytes())?;
        let b = tree.get(offset..offset + self.node_bytes())?;
        let be24 = |b: &[u8]| (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
        Some(match self {
            RecordSize::Bits24 => (be24(&b[0..3]), be24(&b[3..6])),
            RecordSize::Bits28 => {
                let left = ((b[3] as u32 & 0xF0) << 20) | be24(&b[0..3]);
                let right = ((b[3] as u32 & 0x0F) << 24) | be24(&b[4..7]);
                (left, right)
            }
            RecordSize::Bits32 => (
                u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
                u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            ),
        })
    }

    /// Write the (left, right) records of a node into `out`.
    pub(crate) fn write_node(self, out: &mut Vec<u8>, left: u32, right: u32) {
        match self {
            RecordSize::Bits24 => {
                out.extend_from_slice(&left.to_be_bytes()[1..]);
                out.extend_from_slice(&right.to_be_bytes()[1..]);
            }
            RecordSize::Bits28 => {
                // Middle byte: high nibble of left, then high nibble of right
                out.extend_from_slice(&left.to_be_bytes()[1..]);
                out.push((((left >> 24) & 0x0F) as u8) << 4 | ((right >> 24) & 0x0F) as u8);
                out.extend_from_slice(&right.to_be_bytes()[1..]);
            }
            RecordSize::Bits32 => {
                out.extend_from_slice(&left.to_be_bytes());
                out.extend_from_slice(&right.to_be_bytes());
            }
        }
    }
}

/// Addressing parameters carried from the source database into the rebuilt one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMetadata {
    /// Tree address family
    pub ip_version: IpVersion,
    /// Record width
    pub record_size: RecordSize,
    /// Build timestamp (seconds since the Unix epoch)
    pub build_epoch: u64,
}

impl BuildMetadata {
    /// Metadata for a fresh database.
    pub fn new(ip_version: IpVersion, record_size: RecordSize, build_epoch: u64) -> Self {
        Self {
            ip_version,
            record_size,
            build_epoch,
        }
    }
}
