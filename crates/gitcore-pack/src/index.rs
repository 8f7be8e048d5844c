//! Pack index (v2) reading and lookup.
//!
//! The index maps id → pack offset using a 256-entry fan-out table over
//! the first id byte and binary search within each bucket:
//!
//! ```text
//! Header:  \xff t O c | version (4 bytes = 2)
//! Fanout:  256 × 4-byte big-endian cumulative counts
//! Oids:    N × 20-byte sorted ids
//! CRC32:   N × 4-byte values
//! Offsets: N × 4-byte offsets (high bit set → index into 64-bit table)
//! 64-bit:  M × 8-byte offsets (packs > 2 GiB)
//! Trailer: 20-byte pack checksum | 20-byte index checksum
//! ```

use std::path::{Path, PathBuf};

use gitcore_hash::ObjectId;
use memmap2::Mmap;

use crate::{PackError, IDX_SIGNATURE, IDX_VERSION};

const OID_LEN: usize = 20;

/// Pack index (v2) providing id → offset mapping.
pub struct PackIndex {
    data: Mmap,
    num_objects: u32,
    fanout_offset: usize,
    oid_offset: usize,
    offset32_offset: usize,
    offset64_offset: usize,
    idx_path: PathBuf,
}

impl PackIndex {
    /// Open a pack index file.
    pub fn open(idx_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let idx_path = idx_path.as_ref().to_path_buf();
        let file = std::fs::File::open(&idx_path)?;
        let data = unsafe { Mmap::map(&file)? };

        // Minimum: header(8) + fanout(1024) + trailer(40)
        if data.len() < 8 + 1024 + 2 * OID_LEN {
            return Err(PackError::InvalidIndex("file too small".into()));
        }

        if data[0..4] != IDX_SIGNATURE {
            return Err(PackError::InvalidIndex("bad signature".into()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != IDX_VERSION {
            return Err(PackError::InvalidIndex(format!(
                "unsupported version {version}, expected {IDX_VERSION}"
            )));
        }

        let fanout_offset = 8;
        let last_fanout_pos = fanout_offset + 255 * 4;
        let num_objects = u32::from_be_bytes([
            data[last_fanout_pos],
            data[last_fanout_pos + 1],
            data[last_fanout_pos + 2],
            data[last_fanout_pos + 3],
        ]);

        let n = num_objects as usize;
        let oid_offset = fanout_offset + 1024;
        let crc_offset = oid_offset + n * OID_LEN;
        let offset32_offset = crc_offset + n * 4;
        let offset64_offset = offset32_offset + n * 4;

        // The 64-bit table is variable-length; only its start is checked.
        let min_size = offset64_offset + 2 * OID_LEN;
        if data.len() < min_size {
            return Err(PackError::InvalidIndex(format!(
                "file too small: {} < {min_size}",
                data.len()
            )));
        }

        Ok(Self {
            data,
            num_objects,
            fanout_offset,
            oid_offset,
            offset32_offset,
            offset64_offset,
            idx_path,
        })
    }

    /// Look up an id, returning its offset in the pack file.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u64> {
        let (lo, hi) = self.fanout_range(oid.first_byte());
        let target: &[u8] = oid.as_bytes();

        let mut low = lo;
        let mut high = hi;
        while low < high {
            let mid = low + (high - low) / 2;
            match self.oid_bytes_at(mid).cmp(target) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(self.offset_at_index(mid as u32)),
            }
        }
        None
    }

    /// Find all ids matching a byte prefix (with a nibble mask for odd hex
    /// lengths), returning (id, offset) pairs.
    ///
    /// `prefix` is left-aligned; `bits` gives the number of significant bits.
    pub fn lookup_prefix(&self, prefix: &[u8], bits: u32) -> Vec<(ObjectId, u64)> {
        if prefix.is_empty() || bits == 0 {
            return Vec::new();
        }

        let (lo, hi) = self.fanout_range(prefix[0]);
        let full_bytes = (bits / 8) as usize;

        let mut results = Vec::new();
        for i in lo..hi {
            let oid_bytes = self.oid_bytes_at(i);
            if oid_bytes[..full_bytes] != prefix[..full_bytes] {
                continue;
            }
            if bits % 8 != 0 && (oid_bytes[full_bytes] & 0xf0) != (prefix[full_bytes] & 0xf0) {
                continue;
            }
            if let Ok(oid) = ObjectId::from_bytes(oid_bytes) {
                results.push((oid, self.offset_at_index(i as u32)));
            }
        }
        results
    }

    /// The id at the given sorted index position.
    pub fn oid_at_index(&self, index: u32) -> Result<ObjectId, PackError> {
        let start = self.oid_offset + index as usize * OID_LEN;
        ObjectId::from_bytes(&self.data[start..start + OID_LEN])
            .map_err(|_| PackError::InvalidIndex(format!("bad oid at index {index}")))
    }

    /// The pack offset at the given sorted index position.
    pub fn offset_at_index(&self, index: u32) -> u64 {
        let pos = self.offset32_offset + index as usize * 4;
        let val = u32::from_be_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ]);

        if val & 0x8000_0000 != 0 {
            let idx64 = (val & 0x7fff_ffff) as usize;
            let pos64 = self.offset64_offset + idx64 * 8;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&self.data[pos64..pos64 + 8]);
            u64::from_be_bytes(bytes)
        } else {
            val as u64
        }
    }

    /// Total number of objects in this index.
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// Path to the .idx file.
    pub fn path(&self) -> &Path {
        &self.idx_path
    }

    /// Iterate all (id, offset) pairs in sorted id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, u64)> + '_ {
        (0..self.num_objects).filter_map(move |i| {
            self.oid_at_index(i).ok().map(|oid| (oid, self.offset_at_index(i)))
        })
    }

    /// Fan-out range for a first byte: (start, end) into the sorted id list.
    fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let end = self.fanout_entry(first_byte) as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fanout_entry(first_byte - 1) as usize
        };
        (start, end)
    }

    fn fanout_entry(&self, index: u8) -> u32 {
        let pos = self.fanout_offset + index as usize * 4;
        u32::from_be_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ])
    }

    fn oid_bytes_at(&self, index: usize) -> &[u8] {
        let start = self.oid_offset + index * OID_LEN;
        &self.data[start..start + OID_LEN]
    }
}
