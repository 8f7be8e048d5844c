use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use gitcore_hash::ObjectId;
use gitcore_utils::LockFile;

use crate::error::RefError;
use crate::name::RefName;

/// A single entry in the packed-refs file.
#[derive(Debug, Clone)]
pub struct PackedRef {
    pub name: RefName,
    pub oid: ObjectId,
    /// Peeled id from a `^<hex>` continuation line.
    pub peeled: Option<ObjectId>,
}

/// Parsed packed-refs file.
///
/// Format:
/// ```text
/// # pack-refs with: peeled fully-peeled sorted
/// <hex-oid> <refname>
/// ^<hex-oid>   (peeled value of the annotated tag above)
/// ```
#[derive(Debug, Clone)]
pub struct PackedRefs {
    refs: Vec<PackedRef>,
    sorted: bool,
}

impl PackedRefs {
    /// Parse packed-refs bytes.
    pub fn parse(data: &[u8]) -> Result<Self, RefError> {
        let mut refs: Vec<PackedRef> = Vec::new();
        let mut sorted = false;

        for line in data.lines() {
            if line.is_empty() {
                continue;
            }

            if line.starts_with(b"#") {
                if line.find(b"sorted").is_some() {
                    sorted = true;
                }
                continue;
            }

            if let Some(peeled_hex) = line.strip_prefix(b"^") {
                let hex = std::str::from_utf8(peeled_hex)
                    .map_err(|_| RefError::Parse("invalid UTF-8 in peeled id".into()))?;
                let peeled = ObjectId::from_hex(hex.trim()).map_err(RefError::Hash)?;
                match refs.last_mut() {
                    Some(last) => last.peeled = Some(peeled),
                    None => {
                        return Err(RefError::Parse(
                            "peeled line without a preceding ref".into(),
                        ))
                    }
                }
                continue;
            }

            let space_pos = line
                .find_byte(b' ')
                .ok_or_else(|| RefError::Parse("invalid packed-refs line".into()))?;
            let hex = std::str::from_utf8(&line[..space_pos])
                .map_err(|_| RefError::Parse("invalid UTF-8 in packed-refs id".into()))?;
            let oid = ObjectId::from_hex(hex).map_err(RefError::Hash)?;

            let name_str = std::str::from_utf8(&line[space_pos + 1..])
                .map_err(|_| RefError::Parse("invalid UTF-8 in packed-refs name".into()))?;
            let name = RefName::new(name_str.trim())?;

            refs.push(PackedRef {
                name,
                oid,
                peeled: None,
            });
        }

        Ok(Self { refs, sorted })
    }

    /// Load packed-refs from a git dir. Missing file parses empty.
    pub fn load(git_dir: &Path) -> Result<Self, RefError> {
        let path = packed_refs_path(git_dir);
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    refs: Vec::new(),
                    sorted: true,
                })
            }
            Err(e) => return Err(RefError::IoPath { path, source: e }),
        };
        Self::parse(&data)
    }

    /// Look up a ref by name.
    pub fn find(&self, name: &RefName) -> Option<&PackedRef> {
        if self.sorted {
            self.refs
                .binary_search_by(|pr| pr.name.cmp(name))
                .ok()
                .map(|idx| &self.refs[idx])
        } else {
            self.refs.iter().find(|pr| pr.name == *name)
        }
    }

    /// Write the file atomically via a lock file.
    pub fn write(&self, git_dir: &Path) -> Result<(), RefError> {
        let path = packed_refs_path(git_dir);
        let mut lock = LockFile::acquire(&path)?;

        let mut out = Vec::new();
        out.extend_from_slice(b"# pack-refs with: peeled fully-peeled sorted \n");

        let mut sorted_refs = self.refs.clone();
        sorted_refs.sort_by(|a, b| a.name.cmp(&b.name));
        for pr in &sorted_refs {
            out.extend_from_slice(format!("{} {}\n", pr.oid.to_hex(), pr.name).as_bytes());
            if let Some(peeled) = &pr.peeled {
                out.extend_from_slice(format!("^{}\n", peeled.to_hex()).as_bytes());
            }
        }

        lock.write_all(&out).map_err(|e| RefError::IoPath {
            path: path.clone(),
            source: e,
        })?;
        lock.commit()?;
        Ok(())
    }

    /// Add or replace a ref.
    pub fn upsert(&mut self, name: RefName, oid: ObjectId, peeled: Option<ObjectId>) {
        if let Some(existing) = self.refs.iter_mut().find(|pr| pr.name == name) {
            existing.oid = oid;
            existing.peeled = peeled;
        } else {
            self.refs.push(PackedRef { name, oid, peeled });
            self.refs.sort_by(|a, b| a.name.cmp(&b.name));
            self.sorted = true;
        }
    }

    /// Remove a ref; true if it was present.
    pub fn remove(&mut self, name: &RefName) -> bool {
        let before = self.refs.len();
        self.refs.retain(|pr| pr.name != *name);
        self.refs.len() < before
    }

    pub fn refs(&self) -> &[PackedRef] {
        &self.refs
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Path of the packed-refs file.
pub fn packed_refs_path(git_dir: &Path) -> PathBuf {
    git_dir.join("packed-refs")
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn parse_empty() {
        assert!(PackedRefs::parse(b"").unwrap().is_empty());
    }

    #[test]
    fn parse_with_header_and_peeled() {
        let data = format!(
            "# pack-refs with: peeled fully-peeled sorted \n{A} refs/tags/v1.0\n^{B}\n"
        );
        let packed = PackedRefs::parse(data.as_bytes()).unwrap();
        assert_eq!(packed.refs().len(), 1);
        let tag = &packed.refs()[0];
        assert_eq!(tag.name.as_str(), "refs/tags/v1.0");
        assert_eq!(tag.peeled, Some(ObjectId::from_hex(B).unwrap()));
    }

    #[test]
    fn peeled_line_without_ref_is_error() {
        assert!(PackedRefs::parse(format!("^{A}\n").as_bytes()).is_err());
    }

    #[test]
    fn find_uses_binary_search_when_sorted() {
        let data = format!(
            "# pack-refs with: peeled fully-peeled sorted \n\
             {A} refs/heads/alpha\n{B} refs/heads/beta\n"
        );
        let packed = PackedRefs::parse(data.as_bytes()).unwrap();

        let found = packed
            .find(&RefName::new("refs/heads/beta").unwrap())
            .unwrap();
        assert_eq!(found.oid, ObjectId::from_hex(B).unwrap());
        assert!(packed
            .find(&RefName::new("refs/heads/missing").unwrap())
            .is_none());
    }

    #[test]
    fn upsert_and_remove() {
        let mut packed = PackedRefs::parse(b"").unwrap();
        let name = RefName::new("refs/heads/main").unwrap();

        packed.upsert(name.clone(), ObjectId::from_hex(A).unwrap(), None);
        packed.upsert(name.clone(), ObjectId::from_hex(B).unwrap(), None);
        assert_eq!(packed.refs().len(), 1);
        assert_eq!(packed.refs()[0].oid, ObjectId::from_hex(B).unwrap());

        assert!(packed.remove(&name));
        assert!(packed.is_empty());
        assert!(!packed.remove(&name));
    }

    #[test]
    fn write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut packed = PackedRefs::parse(b"").unwrap();

        packed.upsert(
            RefName::new("refs/heads/main").unwrap(),
            ObjectId::from_hex(A).unwrap(),
            None,
        );
        packed.upsert(
            RefName::new("refs/tags/v1.0").unwrap(),
            ObjectId::from_hex(A).unwrap(),
            Some(ObjectId::from_hex(B).unwrap()),
        );
        packed.write(dir.path()).unwrap();

        let loaded = PackedRefs::load(dir.path()).unwrap();
        assert_eq!(loaded.refs().len(), 2);
        let tag = loaded
            .find(&RefName::new("refs/tags/v1.0").unwrap())
            .unwrap();
        assert_eq!(tag.peeled, Some(ObjectId::from_hex(B).unwrap()));
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PackedRefs::load(dir.path()).unwrap().is_empty());
    }
}
