//! Read-only packfile support.
//!
//! Packfiles store many objects in one file, most of them as deltas
//! against another object. This crate reads `.pack`/`.idx` pairs:
//! index lookup (exact and by prefix), entry decoding, and transparent
//! delta-chain reconstruction. Pack construction is out of scope; packs
//! are produced by external tooling and only consumed here.

pub mod delta;
pub mod entry;
pub mod index;
pub mod pack;
#[doc(hidden)]
pub mod testutil;

use gitcore_hash::ObjectId;
use gitcore_object::ObjectType;

pub use index::PackIndex;
pub use pack::PackFile;

/// Pack file signature ("PACK").
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Supported pack version.
pub const PACK_VERSION: u32 = 2;
/// Pack header size: signature + version + object count.
pub const PACK_HEADER_SIZE: usize = 12;
/// Index file signature.
pub const IDX_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];
/// Supported index version.
pub const IDX_VERSION: u32 = 2;
/// Default bound on delta chain length. A chain longer than this (or a
/// cycle, which presents as an endless chain) is treated as corruption.
pub const DEFAULT_DELTA_DEPTH: usize = 64;

/// Errors from pack reading.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("invalid pack header: {0}")]
    InvalidHeader(String),

    #[error("invalid pack index: {0}")]
    InvalidIndex(String),

    #[error("invalid delta at offset {offset}: {reason}")]
    InvalidDelta { offset: u64, reason: String },

    #[error("delta base not found: {0}")]
    MissingBase(ObjectId),

    #[error("delta chain too deep (>{max_depth} levels) at offset {offset}")]
    DeltaChainTooDeep { offset: u64, max_depth: usize },

    #[error("corrupt pack entry at offset {0}")]
    CorruptEntry(u64),

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Type of a packed object entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackEntryType {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta whose base lives at an earlier offset in the same pack.
    OfsDelta { base_offset: u64 },
    /// Delta referencing its base by full id.
    RefDelta { base_oid: ObjectId },
}

impl PackEntryType {
    /// Convert a non-delta entry type to an ObjectType.
    pub fn to_object_type(self) -> Option<ObjectType> {
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => Some(ObjectType::Tag),
            Self::OfsDelta { .. } | Self::RefDelta { .. } => None,
        }
    }
}

/// A fully reconstructed object read out of a pack.
#[derive(Debug, Clone)]
pub struct PackedObject {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
}
