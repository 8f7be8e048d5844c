//! The in-memory backend.
//!
//! Storage is a list of immutable in-memory packs. Each pack carries its
//! decoded object table plus the raw buffers keyed by pack extension, the
//! way a distributed filesystem backend would hold them before upload.
//! Writers stage a new pack and publish it with [`MemoryBackend::commit_pack`]
//! (atomic list swap) or discard it with [`MemoryBackend::rollback_pack`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use gitcore_hash::{AbbreviatedId, ObjectId};
use gitcore_object::ObjectType;

use crate::OdbError;

/// Keys for the raw buffers a pack description can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackExt {
    Pack,
    Index,
}

/// An immutable in-memory pack: a name, decoded objects, and raw buffers.
pub struct MemPack {
    name: String,
    objects: HashMap<ObjectId, (ObjectType, Arc<[u8]>)>,
    buffers: HashMap<PackExt, Vec<u8>>,
}

impl MemPack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: HashMap::new(),
            buffers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an object to this (not yet committed) pack.
    pub fn add_object(&mut self, oid: ObjectId, obj_type: ObjectType, data: Vec<u8>) {
        self.objects.insert(oid, (obj_type, Arc::from(data)));
    }

    /// Attach a raw buffer under a pack-extension key.
    pub fn set_buffer(&mut self, ext: PackExt, data: Vec<u8>) {
        self.buffers.insert(ext, data);
    }

    pub fn buffer(&self, ext: PackExt) -> Option<&[u8]> {
        self.buffers.get(&ext).map(|b| b.as_slice())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

/// Fully in-memory object storage.
pub struct MemoryBackend {
    /// Committed packs, newest first. Copy-on-write: commits build a new
    /// list and swap the `Arc`.
    packs: RwLock<Arc<Vec<Arc<MemPack>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            packs: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Atomically publish a staged pack, optionally retiring named packs it
    /// replaces. Readers holding the previous snapshot are unaffected.
    pub fn commit_pack(&self, pack: MemPack, replace: &[&str]) {
        let mut guard = self
            .packs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next: Vec<Arc<MemPack>> = Vec::with_capacity(guard.len() + 1);
        next.push(Arc::new(pack));
        for existing in guard.iter() {
            if !replace.contains(&existing.name()) {
                next.push(Arc::clone(existing));
            }
        }
        *guard = Arc::new(next);
    }

    /// Discard a staged pack. Since staging happens outside the committed
    /// list, rollback is simply dropping the value; this exists so the
    /// staging protocol is explicit at call sites.
    pub fn rollback_pack(&self, pack: MemPack) {
        drop(pack);
    }

    /// Snapshot of the committed pack list.
    pub fn pack_snapshot(&self) -> Arc<Vec<Arc<MemPack>>> {
        self.packs
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    pub fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError> {
        for pack in self.pack_snapshot().iter() {
            if let Some((obj_type, data)) = pack.objects.get(oid) {
                return Ok(Some((*obj_type, data.to_vec())));
            }
        }
        Ok(None)
    }

    pub fn read_header(
        &self,
        oid: &ObjectId,
    ) -> Result<Option<(ObjectType, usize)>, OdbError> {
        for pack in self.pack_snapshot().iter() {
            if let Some((obj_type, data)) = pack.objects.get(oid) {
                return Ok(Some((*obj_type, data.len())));
            }
        }
        Ok(None)
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.pack_snapshot()
            .iter()
            .any(|pack| pack.objects.contains_key(oid))
    }

    pub fn lookup_prefix(&self, abbrev: &AbbreviatedId) -> Result<Vec<ObjectId>, OdbError> {
        let mut matches = Vec::new();
        for pack in self.pack_snapshot().iter() {
            for oid in pack.objects.keys() {
                if abbrev.matches(oid) {
                    matches.push(*oid);
                }
            }
        }
        matches.sort();
        matches.dedup();
        Ok(matches)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_hash::Hasher;

    fn blob(data: &[u8]) -> (ObjectId, Vec<u8>) {
        (Hasher::hash_object("blob", data).unwrap(), data.to_vec())
    }

    #[test]
    fn commit_pack_makes_objects_visible() {
        let backend = MemoryBackend::new();
        let (oid, data) = blob(b"in memory");

        let mut pack = MemPack::new("pack-0001");
        pack.add_object(oid, ObjectType::Blob, data.clone());
        assert!(!backend.contains(&oid));

        backend.commit_pack(pack, &[]);
        assert!(backend.contains(&oid));
        assert_eq!(backend.read(&oid).unwrap().unwrap().1, data);
        assert_eq!(
            backend.read_header(&oid).unwrap().unwrap(),
            (ObjectType::Blob, data.len())
        );
    }

    #[test]
    fn rollback_discards_staged_pack() {
        let backend = MemoryBackend::new();
        let (oid, data) = blob(b"never committed");

        let mut pack = MemPack::new("pack-0002");
        pack.add_object(oid, ObjectType::Blob, data);
        backend.rollback_pack(pack);

        assert!(!backend.contains(&oid));
    }

    #[test]
    fn replace_retires_named_packs() {
        let backend = MemoryBackend::new();
        let (a_oid, a_data) = blob(b"object a");
        let (b_oid, b_data) = blob(b"object b");

        let mut first = MemPack::new("pack-a");
        first.add_object(a_oid, ObjectType::Blob, a_data.clone());
        backend.commit_pack(first, &[]);

        // The replacement carries both objects, like a compaction would.
        let mut second = MemPack::new("pack-b");
        second.add_object(a_oid, ObjectType::Blob, a_data);
        second.add_object(b_oid, ObjectType::Blob, b_data);
        backend.commit_pack(second, &["pack-a"]);

        let snapshot = backend.pack_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name(), "pack-b");
        assert!(backend.contains(&a_oid));
        assert!(backend.contains(&b_oid));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let backend = MemoryBackend::new();
        let (oid, data) = blob(b"snapshot test");

        let mut pack = MemPack::new("pack-old");
        pack.add_object(oid, ObjectType::Blob, data);
        backend.commit_pack(pack, &[]);

        let before = backend.pack_snapshot();
        backend.commit_pack(MemPack::new("pack-new"), &["pack-old"]);

        // The old snapshot still sees the retired pack.
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].name(), "pack-old");
        // The fresh snapshot does not.
        assert_eq!(backend.pack_snapshot()[0].name(), "pack-new");
    }

    #[test]
    fn prefix_lookup_across_packs() {
        let backend = MemoryBackend::new();
        let (oid, data) = blob(b"findable");

        let mut pack = MemPack::new("pack-0003");
        pack.add_object(oid, ObjectType::Blob, data);
        backend.commit_pack(pack, &[]);

        let abbrev = AbbreviatedId::from_hex_prefix(&oid.to_hex()[..6]).unwrap();
        assert_eq!(backend.lookup_prefix(&abbrev).unwrap(), vec![oid]);
    }

    #[test]
    fn buffers_round_trip() {
        let mut pack = MemPack::new("pack-ext");
        pack.set_buffer(PackExt::Pack, vec![1, 2, 3]);
        pack.set_buffer(PackExt::Index, vec![4, 5]);
        assert_eq!(pack.buffer(PackExt::Pack), Some([1, 2, 3].as_slice()));
        assert_eq!(pack.buffer(PackExt::Index), Some([4, 5].as_slice()));
    }
}
