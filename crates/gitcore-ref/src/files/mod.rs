//! The files ref backend: loose refs under `refs/` plus `packed-refs`.
//!
//! A loose file always overrides a packed entry of the same name, and a
//! deletion must remove both so the packed value cannot resurface.

pub(crate) mod loose;
pub mod packed;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::RefError;
use crate::name::RefName;
use crate::{Peeled, Ref, RefTarget, Storage};

use self::packed::PackedRefs;

/// Read-side of the files backend. Write paths go through the update
/// machinery, which layers locking on top of these primitives.
pub struct FilesRefDb {
    git_dir: PathBuf,
}

impl FilesRefDb {
    pub fn new(git_dir: impl AsRef<Path>) -> Self {
        Self {
            git_dir: git_dir.as_ref().to_path_buf(),
        }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Read one ref, merging the loose and packed tiers.
    pub fn read(&self, name: &RefName) -> Result<Option<Ref>, RefError> {
        let packed = PackedRefs::load(&self.git_dir)?;
        self.read_with_packed(name, &packed)
    }

    /// Read one ref against an already-loaded packed-refs snapshot.
    pub(crate) fn read_with_packed(
        &self,
        name: &RefName,
        packed: &PackedRefs,
    ) -> Result<Option<Ref>, RefError> {
        let packed_entry = packed.find(name);

        match loose::read_loose_ref(&self.git_dir, name)? {
            Some(mut loose_ref) => {
                if packed_entry.is_some() {
                    loose_ref.storage = Storage::LoosePacked;
                }
                Ok(Some(loose_ref))
            }
            None => Ok(packed_entry.map(|pr| Ref {
                name: pr.name.clone(),
                storage: Storage::Packed,
                target: RefTarget::Direct {
                    oid: pr.oid,
                    peeled: match pr.peeled {
                        Some(peeled) => Peeled::Tag(peeled),
                        None => Peeled::NotPeeled,
                    },
                },
            })),
        }
    }

    /// Snapshot of all refs under a prefix, loose overriding packed.
    pub fn list(&self, prefix: &str) -> Result<BTreeMap<String, Ref>, RefError> {
        let mut result = BTreeMap::new();
        let packed = PackedRefs::load(&self.git_dir)?;

        for pr in packed.refs() {
            if !pr.name.as_str().starts_with(prefix) {
                continue;
            }
            result.insert(
                pr.name.as_str().to_string(),
                Ref {
                    name: pr.name.clone(),
                    storage: Storage::Packed,
                    target: RefTarget::Direct {
                        oid: pr.oid,
                        peeled: match pr.peeled {
                            Some(peeled) => Peeled::Tag(peeled),
                            None => Peeled::NotPeeled,
                        },
                    },
                },
            );
        }

        for name in loose::enumerate_loose_refs(&self.git_dir, prefix)? {
            // A file may vanish between enumeration and read.
            if let Some(mut r) = loose::read_loose_ref(&self.git_dir, &name)? {
                if result.contains_key(name.as_str()) {
                    r.storage = Storage::LoosePacked;
                }
                result.insert(name.as_str().to_string(), r);
            }
        }

        Ok(result)
    }

    /// Remove a ref from the packed tier, rewriting packed-refs under its
    /// lock. No-op when the ref is not packed.
    pub(crate) fn remove_packed(&self, name: &RefName) -> Result<(), RefError> {
        let mut packed = PackedRefs::load(&self.git_dir)?;
        if packed.remove(name) {
            packed.write(&self.git_dir)?;
        }
        Ok(())
    }

    /// Move a loose ref into the packed tier.
    pub fn pack_ref(&self, name: &RefName) -> Result<(), RefError> {
        let current = loose::read_loose_ref(&self.git_dir, name)?
            .ok_or_else(|| RefError::NotFound(name.to_string()))?;
        let oid = current
            .oid()
            .ok_or_else(|| RefError::Parse("cannot pack a symbolic ref".into()))?;

        let mut packed = PackedRefs::load(&self.git_dir)?;
        packed.upsert(name.clone(), oid, None);
        packed.write(&self.git_dir)?;

        loose::delete_loose_ref(&self.git_dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_hash::ObjectId;
    use gitcore_utils::LockFile;
    use std::io::Write;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn write_loose(git_dir: &Path, name: &str, hex: &str) {
        let name = RefName::new(name).unwrap();
        let path = loose::loose_ref_path(git_dir, &name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut lock = LockFile::acquire(&path).unwrap();
        lock.write_all(loose::direct_content(&ObjectId::from_hex(hex).unwrap()).as_bytes())
            .unwrap();
        lock.commit().unwrap();
    }

    fn pack(git_dir: &Path, name: &str, hex: &str) {
        let mut packed = PackedRefs::load(git_dir).unwrap();
        packed.upsert(
            RefName::new(name).unwrap(),
            ObjectId::from_hex(hex).unwrap(),
            None,
        );
        packed.write(git_dir).unwrap();
    }

    #[test]
    fn loose_overrides_packed() {
        let dir = tempfile::tempdir().unwrap();
        let db = FilesRefDb::new(dir.path());

        pack(dir.path(), "refs/heads/main", A);
        write_loose(dir.path(), "refs/heads/main", B);

        let r = db
            .read(&RefName::new("refs/heads/main").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(r.oid().unwrap().to_hex(), B);
        assert_eq!(r.storage, Storage::LoosePacked);
    }

    #[test]
    fn packed_value_reexposed_when_loose_gone() {
        let dir = tempfile::tempdir().unwrap();
        let db = FilesRefDb::new(dir.path());
        let name = RefName::new("refs/heads/main").unwrap();

        pack(dir.path(), "refs/heads/main", A);
        write_loose(dir.path(), "refs/heads/main", B);
        loose::delete_loose_ref(dir.path(), &name).unwrap();

        let r = db.read(&name).unwrap().unwrap();
        assert_eq!(r.oid().unwrap().to_hex(), A);
        assert_eq!(r.storage, Storage::Packed);
    }

    #[test]
    fn list_merges_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let db = FilesRefDb::new(dir.path());

        pack(dir.path(), "refs/heads/packed-only", A);
        pack(dir.path(), "refs/heads/both", A);
        write_loose(dir.path(), "refs/heads/both", B);
        write_loose(dir.path(), "refs/heads/loose-only", B);

        let refs = db.list("refs/heads/").unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs["refs/heads/both"].oid().unwrap().to_hex(), B);
        assert_eq!(refs["refs/heads/both"].storage, Storage::LoosePacked);
        assert_eq!(refs["refs/heads/packed-only"].storage, Storage::Packed);
        assert_eq!(refs["refs/heads/loose-only"].storage, Storage::Loose);
    }

    #[test]
    fn pack_ref_moves_tier() {
        let dir = tempfile::tempdir().unwrap();
        let db = FilesRefDb::new(dir.path());
        let name = RefName::new("refs/heads/main").unwrap();

        write_loose(dir.path(), "refs/heads/main", A);
        db.pack_ref(&name).unwrap();

        let r = db.read(&name).unwrap().unwrap();
        assert_eq!(r.storage, Storage::Packed);
        assert_eq!(r.oid().unwrap().to_hex(), A);
    }

    #[test]
    fn remove_packed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let db = FilesRefDb::new(dir.path());
        let name = RefName::new("refs/heads/main").unwrap();

        pack(dir.path(), "refs/heads/main", A);
        db.remove_packed(&name).unwrap();
        assert!(db.read(&name).unwrap().is_none());
    }
}
