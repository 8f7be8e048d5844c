//! PackFile: reading `.pack` files.
//!
//! A pack file contains a 12-byte header, a sequence of zlib-compressed
//! entries (possibly deltified), and a trailing checksum. Packs are
//! memory-mapped and shared read-only.

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::bufread::ZlibDecoder;
use gitcore_hash::ObjectId;
use gitcore_object::ObjectType;
use memmap2::Mmap;

use crate::delta::apply_delta;
use crate::entry::{parse_entry_header, PackEntry};
use crate::index::PackIndex;
use crate::{
    PackEntryType, PackError, PackedObject, DEFAULT_DELTA_DEPTH, PACK_HEADER_SIZE,
    PACK_SIGNATURE, PACK_VERSION,
};

/// A memory-mapped packfile with its index.
pub struct PackFile {
    data: Mmap,
    index: PackIndex,
    pack_path: PathBuf,
    num_objects: u32,
    max_delta_depth: usize,
}

impl PackFile {
    /// Open a pack file and its companion `.idx`.
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref().to_path_buf();
        let idx_path = pack_path.with_extension("idx");

        let file = std::fs::File::open(&pack_path)?;
        let data = unsafe { Mmap::map(&file)? };

        if data.len() < PACK_HEADER_SIZE {
            return Err(PackError::InvalidHeader("file too small".into()));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(PackError::InvalidHeader("bad PACK signature".into()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let num_objects = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let index = PackIndex::open(&idx_path)?;
        if index.num_objects() != num_objects {
            return Err(PackError::InvalidHeader(format!(
                "pack has {} objects but index has {}",
                num_objects,
                index.num_objects()
            )));
        }

        Ok(Self {
            data,
            index,
            pack_path,
            num_objects,
            max_delta_depth: DEFAULT_DELTA_DEPTH,
        })
    }

    /// Adjust the delta chain bound.
    pub fn set_max_delta_depth(&mut self, depth: usize) {
        self.max_delta_depth = depth.max(1);
    }

    /// Read an object by id. `None` if the id is not in this pack.
    pub fn read_object(&self, oid: &ObjectId) -> Result<Option<PackedObject>, PackError> {
        self.read_object_with_resolver(oid, |_| None)
    }

    /// Read an object by id, with an external resolver for REF_DELTA bases
    /// that live outside this pack (another pack, or loose storage).
    pub fn read_object_with_resolver(
        &self,
        oid: &ObjectId,
        resolver: impl Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<Option<PackedObject>, PackError> {
        match self.index.lookup(oid) {
            Some(offset) => self.read_at_offset_with_resolver(offset, resolver).map(Some),
            None => Ok(None),
        }
    }

    /// Read an object at a known pack offset.
    pub fn read_at_offset(&self, offset: u64) -> Result<PackedObject, PackError> {
        self.read_at_offset_with_resolver(offset, |_| None)
    }

    /// Resolve the entry at `offset`, following the delta chain iteratively.
    ///
    /// The chain is collected delta-first; once the base object is reached
    /// the deltas are applied in reverse. Chains longer than the configured
    /// bound (which is how a base-offset cycle presents) are corruption.
    fn read_at_offset_with_resolver(
        &self,
        offset: u64,
        resolver: impl Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<PackedObject, PackError> {
        let mut chain: Vec<(PackEntry, Vec<u8>)> = Vec::new();
        let mut current_offset = offset;

        for _depth in 0..self.max_delta_depth {
            if current_offset as usize >= self.data.len() {
                return Err(PackError::CorruptEntry(current_offset));
            }
            let entry =
                parse_entry_header(&self.data[current_offset as usize..], current_offset)?;

            if entry.data_offset as usize > self.data.len() {
                return Err(PackError::CorruptEntry(current_offset));
            }
            let compressed = &self.data[entry.data_offset as usize..];
            let decompressed =
                decompress(compressed, entry.uncompressed_size, current_offset)?;

            match entry.entry_type {
                PackEntryType::Commit
                | PackEntryType::Tree
                | PackEntryType::Blob
                | PackEntryType::Tag => {
                    let obj_type = entry
                        .entry_type
                        .to_object_type()
                        .ok_or(PackError::CorruptEntry(current_offset))?;

                    let mut data = decompressed;
                    for (_, delta_data) in chain.iter().rev() {
                        data = apply_delta(&data, delta_data)?;
                    }
                    return Ok(PackedObject { obj_type, data });
                }
                PackEntryType::OfsDelta { base_offset } => {
                    chain.push((entry, decompressed));
                    current_offset = base_offset;
                }
                PackEntryType::RefDelta { base_oid } => {
                    chain.push((entry, decompressed));
                    if let Some(base_offset) = self.index.lookup(&base_oid) {
                        current_offset = base_offset;
                    } else if let Some((obj_type, base_data)) = resolver(&base_oid) {
                        let mut data = base_data;
                        for (_, delta_data) in chain.iter().rev() {
                            data = apply_delta(&data, delta_data)?;
                        }
                        return Ok(PackedObject { obj_type, data });
                    } else {
                        return Err(PackError::MissingBase(base_oid));
                    }
                }
            }
        }

        Err(PackError::DeltaChainTooDeep {
            offset,
            max_depth: self.max_delta_depth,
        })
    }

    /// Does this pack contain the given id? (index lookup only)
    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.lookup(oid).is_some()
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn path(&self) -> &Path {
        &self.pack_path
    }
}

/// Decompress zlib data with an expected uncompressed size.
fn decompress(compressed: &[u8], expected_size: usize, offset: u64) -> Result<Vec<u8>, PackError> {
    let mut decoder = ZlibDecoder::new(compressed).take(expected_size as u64 + 1);
    let mut buf = Vec::with_capacity(expected_size);
    decoder
        .read_to_end(&mut buf)
        .map_err(|_| PackError::CorruptEntry(offset))?;
    if buf.len() != expected_size {
        return Err(PackError::CorruptEntry(offset));
    }
    Ok(buf)
}
