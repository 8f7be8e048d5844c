//! Test support: synthesize tiny pack/index pairs on disk.
//!
//! Pack construction is not part of this crate's feature set; this module
//! exists so tests (here and in dependent crates) can fabricate fixture
//! packs without shelling out to git.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use gitcore_hash::{Hasher, ObjectId};

use crate::entry::{encode_entry_header, encode_ofs_delta_offset};
use crate::{IDX_SIGNATURE, IDX_VERSION, PACK_SIGNATURE, PACK_VERSION};

enum RawKind {
    /// Undeltified entry with the given pack type number (1..=4).
    Base(u8),
    /// OFS_DELTA against the entry at this builder index.
    OfsDelta(usize),
    /// REF_DELTA against the given base id.
    RefDelta(ObjectId),
}

/// One entry to be written into a fixture pack.
pub struct RawEntry {
    oid: ObjectId,
    kind: RawKind,
    payload: Vec<u8>,
}

impl RawEntry {
    /// An undeltified entry. `type_num` is the pack type (1=commit, 2=tree,
    /// 3=blob, 4=tag); `payload` is the uncompressed object content.
    pub fn base(oid: ObjectId, type_num: u8, payload: Vec<u8>) -> Self {
        Self {
            oid,
            kind: RawKind::Base(type_num),
            payload,
        }
    }

    /// An OFS_DELTA entry whose base is the `base_index`-th pushed entry.
    pub fn ofs_delta(oid: ObjectId, base_index: usize, delta: Vec<u8>) -> Self {
        Self {
            oid,
            kind: RawKind::OfsDelta(base_index),
            payload: delta,
        }
    }

    /// A REF_DELTA entry referencing its base by id.
    pub fn ref_delta(oid: ObjectId, base_oid: ObjectId, delta: Vec<u8>) -> Self {
        Self {
            oid,
            kind: RawKind::RefDelta(base_oid),
            payload: delta,
        }
    }
}

/// Builds a `.pack`/`.idx` pair from raw entries.
#[derive(Default)]
pub struct PackBuilder {
    entries: Vec<RawEntry>,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: RawEntry) {
        self.entries.push(entry);
    }

    /// Write `<stem>.pack` and `<stem>.idx` into `dir`; returns the pack path.
    pub fn write(&self, dir: &Path, stem: &str) -> PathBuf {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        let mut offsets: Vec<u64> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let offset = pack.len() as u64;
            offsets.push(offset);

            let type_num = match entry.kind {
                RawKind::Base(n) => n,
                RawKind::OfsDelta(_) => 6,
                RawKind::RefDelta(_) => 7,
            };
            pack.extend_from_slice(&encode_entry_header(
                type_num,
                entry.payload.len() as u64,
            ));
            match entry.kind {
                RawKind::Base(_) => {}
                RawKind::OfsDelta(base_index) => {
                    let back = offset - offsets[base_index];
                    pack.extend_from_slice(&encode_ofs_delta_offset(back));
                }
                RawKind::RefDelta(base_oid) => {
                    pack.extend_from_slice(base_oid.as_bytes());
                }
            }

            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&entry.payload).unwrap();
            pack.extend_from_slice(&encoder.finish().unwrap());
        }

        let pack_checksum = Hasher::digest(&pack).unwrap();
        pack.extend_from_slice(pack_checksum.as_bytes());

        // Index: sorted ids, fan-out, zeroed CRCs, 32-bit offsets.
        let mut sorted: Vec<(ObjectId, u64)> = self
            .entries
            .iter()
            .zip(offsets.iter())
            .map(|(e, &off)| (e.oid, off))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut idx = Vec::new();
        idx.extend_from_slice(&IDX_SIGNATURE);
        idx.extend_from_slice(&IDX_VERSION.to_be_bytes());

        let mut fanout = [0u32; 256];
        for (oid, _) in &sorted {
            fanout[oid.first_byte() as usize] += 1;
        }
        let mut running = 0u32;
        for count in fanout.iter_mut() {
            running += *count;
            *count = running;
        }
        for count in &fanout {
            idx.extend_from_slice(&count.to_be_bytes());
        }
        for (oid, _) in &sorted {
            idx.extend_from_slice(oid.as_bytes());
        }
        for _ in &sorted {
            idx.extend_from_slice(&0u32.to_be_bytes());
        }
        for (_, offset) in &sorted {
            idx.extend_from_slice(&(*offset as u32).to_be_bytes());
        }
        idx.extend_from_slice(pack_checksum.as_bytes());
        let idx_checksum = Hasher::digest(&idx).unwrap();
        idx.extend_from_slice(idx_checksum.as_bytes());

        let pack_path = dir.join(format!("{stem}.pack"));
        std::fs::write(&pack_path, &pack).unwrap();
        std::fs::write(dir.join(format!("{stem}.idx")), &idx).unwrap();
        pack_path
    }
}
