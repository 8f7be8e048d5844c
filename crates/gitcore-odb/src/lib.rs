//! Unified object database.
//!
//! Provides a single read/write interface over the closed set of storage
//! backends (on-disk loose + packs, or fully in-memory) and any configured
//! alternate databases. All higher-level operations access objects through
//! this crate.

pub mod alternates;
mod file;
mod loose;
mod memory;

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use gitcore_hash::{AbbreviatedId, HashError, Hasher, ObjectId};
use gitcore_object::cache::ObjectCache;
use gitcore_object::{Object, ObjectType};
use gitcore_utils::CancelToken;

pub use file::FileBackend;
pub use loose::LooseStore;
pub use memory::{MemPack, MemoryBackend, PackExt};

/// Default cap on materialising object bytes in memory (512 MiB).
pub const DEFAULT_LARGE_OBJECT_LIMIT: usize = 512 << 20;

/// Errors from object database operations.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object not found: {0}")]
    Missing(ObjectId),

    #[error("ambiguous object name: {prefix} matches {} objects", candidates.len())]
    Ambiguous {
        prefix: String,
        candidates: Vec<ObjectId>,
    },

    #[error("object {oid} is a {actual}, not a {expected}")]
    IncorrectType {
        oid: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error("corrupt object {oid}: {reason}")]
    Corrupt { oid: ObjectId, reason: String },

    #[error("object {oid} too large for in-memory use ({size} bytes)")]
    LargeObject { oid: ObjectId, size: usize },

    #[error("alternates error: {0}")]
    Alternates(String),

    #[error("circular alternates chain detected at {0}")]
    CircularAlternates(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Pack(#[from] gitcore_pack::PackError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lightweight object info (header only, no content).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub obj_type: ObjectType,
    pub size: usize,
}

/// The closed set of storage backends. The variant is chosen once at
/// construction and never changes for the lifetime of the database.
pub enum Backend {
    File(FileBackend),
    Memory(MemoryBackend),
}

impl Backend {
    fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError> {
        match self {
            Self::File(b) => b.read(oid),
            Self::Memory(b) => b.read(oid),
        }
    }

    fn read_header(&self, oid: &ObjectId) -> Result<Option<(ObjectType, usize)>, OdbError> {
        match self {
            Self::File(b) => b.read_header(oid),
            Self::Memory(b) => b.read_header(oid),
        }
    }

    fn contains(&self, oid: &ObjectId) -> bool {
        match self {
            Self::File(b) => b.contains(oid),
            Self::Memory(b) => b.contains(oid),
        }
    }

    fn lookup_prefix(&self, abbrev: &AbbreviatedId) -> Result<Vec<ObjectId>, OdbError> {
        match self {
            Self::File(b) => b.lookup_prefix(abbrev),
            Self::Memory(b) => b.lookup_prefix(abbrev),
        }
    }
}

enum LoaderSource {
    Bytes(Vec<u8>),
    /// A loose object, loaded lazily from this objects directory.
    Loose(PathBuf),
}

/// Access to one opened object: type and size eagerly, bytes on demand.
pub struct ObjectLoader {
    oid: ObjectId,
    obj_type: ObjectType,
    size: usize,
    source: LoaderSource,
    limit: usize,
}

impl ObjectLoader {
    pub fn id(&self) -> ObjectId {
        self.oid
    }

    pub fn object_type(&self) -> ObjectType {
        self.obj_type
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn info(&self) -> ObjectInfo {
        ObjectInfo {
            obj_type: self.obj_type,
            size: self.size,
        }
    }

    /// Materialise the full content in memory.
    ///
    /// Fails with [`OdbError::LargeObject`] above the configured limit;
    /// use [`open_stream`](Self::open_stream) for such objects.
    pub fn cached_bytes(&self) -> Result<Vec<u8>, OdbError> {
        if self.size > self.limit {
            return Err(OdbError::LargeObject {
                oid: self.oid,
                size: self.size,
            });
        }
        match &self.source {
            LoaderSource::Bytes(bytes) => Ok(bytes.clone()),
            LoaderSource::Loose(dir) => {
                let store = LooseStore::open(dir);
                match store.read(&self.oid)? {
                    Some((_, data)) => Ok(data),
                    None => Err(OdbError::Missing(self.oid)),
                }
            }
        }
    }

    /// Open a streaming reader over the content, regardless of size.
    pub fn open_stream(&self) -> Result<Box<dyn Read>, OdbError> {
        match &self.source {
            LoaderSource::Bytes(bytes) => Ok(Box::new(std::io::Cursor::new(bytes.clone()))),
            LoaderSource::Loose(dir) => {
                let store = LooseStore::open(dir);
                match store.open_stream(&self.oid)? {
                    Some((_, _, stream)) => Ok(stream),
                    None => Err(OdbError::Missing(self.oid)),
                }
            }
        }
    }

    /// Parse the content into a typed [`Object`].
    pub fn parse(&self) -> Result<Object, OdbError> {
        let bytes = self.cached_bytes()?;
        Object::parse_content(self.obj_type, &bytes).map_err(|e| OdbError::Corrupt {
            oid: self.oid,
            reason: e.to_string(),
        })
    }
}

/// Unified object database: one primary backend plus ordered alternates.
pub struct ObjectDatabase {
    backend: Backend,
    alternates: Vec<ObjectDatabase>,
    cache: Mutex<ObjectCache>,
    large_limit: usize,
}

impl ObjectDatabase {
    /// Open an on-disk database at the given objects directory, loading
    /// alternates declared in `objects/info/alternates`.
    pub fn open(objects_dir: impl AsRef<Path>) -> Result<Self, OdbError> {
        Self::open_with_alternates(objects_dir, &[])
    }

    /// Open an on-disk database with additional alternate directories
    /// (e.g. from `GIT_ALTERNATE_OBJECT_DIRECTORIES`).
    pub fn open_with_alternates(
        objects_dir: impl AsRef<Path>,
        extra: &[PathBuf],
    ) -> Result<Self, OdbError> {
        let objects_dir = objects_dir.as_ref();
        let backend = Backend::File(FileBackend::open(objects_dir)?);
        let alternates = alternates::load_alternates(objects_dir, extra)?;
        Ok(Self {
            backend,
            alternates,
            cache: Mutex::new(ObjectCache::new(1024)),
            large_limit: DEFAULT_LARGE_OBJECT_LIMIT,
        })
    }

    /// Open a nested alternate (its own alternates already resolved).
    pub(crate) fn open_as_alternate(
        objects_dir: &Path,
        alternates: Vec<ObjectDatabase>,
    ) -> Result<Self, OdbError> {
        Ok(Self {
            backend: Backend::File(FileBackend::open(objects_dir)?),
            alternates,
            cache: Mutex::new(ObjectCache::new(256)),
            large_limit: DEFAULT_LARGE_OBJECT_LIMIT,
        })
    }

    /// A fully in-memory database (no alternates).
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryBackend::new()),
            alternates: Vec::new(),
            cache: Mutex::new(ObjectCache::new(1024)),
            large_limit: DEFAULT_LARGE_OBJECT_LIMIT,
        }
    }

    /// Lower the in-memory materialisation cap (mostly for tests).
    pub fn set_large_object_limit(&mut self, limit: usize) {
        self.large_limit = limit;
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// The ordered alternates of this database.
    pub fn alternates(&self) -> &[ObjectDatabase] {
        &self.alternates
    }

    /// Does the object exist here or in any alternate?
    pub fn has(&self, oid: &ObjectId) -> bool {
        if self.backend.contains(oid) {
            return true;
        }
        self.alternates.iter().any(|alt| alt.has(oid))
    }

    /// Open an object for access. Searches the primary backend, then each
    /// alternate in registration order.
    ///
    /// With a type hint, a found object of a different type fails with
    /// [`OdbError::IncorrectType`].
    pub fn open_object(
        &self,
        oid: &ObjectId,
        type_hint: Option<ObjectType>,
    ) -> Result<ObjectLoader, OdbError> {
        let loader = self
            .open_object_inner(oid)?
            .ok_or(OdbError::Missing(*oid))?;

        if let Some(expected) = type_hint {
            if loader.obj_type != expected {
                return Err(OdbError::IncorrectType {
                    oid: *oid,
                    expected,
                    actual: loader.obj_type,
                });
            }
        }
        Ok(loader)
    }

    fn open_object_inner(&self, oid: &ObjectId) -> Result<Option<ObjectLoader>, OdbError> {
        match &self.backend {
            Backend::File(file) => {
                // Loose objects are loaded lazily so large ones can stream.
                if file.loose().contains(oid) {
                    if let Some((obj_type, size)) = file.loose().read_header(oid)? {
                        return Ok(Some(ObjectLoader {
                            oid: *oid,
                            obj_type,
                            size,
                            source: LoaderSource::Loose(file.objects_dir().to_path_buf()),
                            limit: self.large_limit,
                        }));
                    }
                }
                if let Some((obj_type, data)) = self.backend.read(oid)? {
                    return Ok(Some(ObjectLoader {
                        oid: *oid,
                        obj_type,
                        size: data.len(),
                        source: LoaderSource::Bytes(data),
                        limit: self.large_limit,
                    }));
                }
            }
            Backend::Memory(_) => {
                if let Some((obj_type, data)) = self.backend.read(oid)? {
                    return Ok(Some(ObjectLoader {
                        oid: *oid,
                        obj_type,
                        size: data.len(),
                        source: LoaderSource::Bytes(data),
                        limit: self.large_limit,
                    }));
                }
            }
        }

        for alt in &self.alternates {
            if let Some(loader) = alt.open_object_inner(oid)? {
                return Ok(Some(loader));
            }
        }
        Ok(None)
    }

    /// Read just (type, size), searching primary then alternates.
    pub fn read_header(&self, oid: &ObjectId) -> Result<Option<ObjectInfo>, OdbError> {
        if let Some((obj_type, size)) = self.backend.read_header(oid)? {
            return Ok(Some(ObjectInfo { obj_type, size }));
        }
        for alt in &self.alternates {
            if let Some(info) = alt.read_header(oid)? {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    /// Read and parse an object, with caching. Fails with `Missing` if the
    /// object is not present anywhere.
    pub fn read_cached(&self, oid: &ObjectId) -> Result<Object, OdbError> {
        {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(obj) = cache.get(oid) {
                return Ok(obj.clone());
            }
        }

        let loader = self.open_object(oid, None)?;
        let obj = loader.parse()?;

        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.insert(*oid, obj.clone());
        Ok(obj)
    }

    /// All full ids matching the abbreviation, across the primary backend
    /// and every alternate, deduplicated. Callers classify by cardinality.
    pub fn resolve_abbrev(
        &self,
        abbrev: &AbbreviatedId,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<ObjectId>, OdbError> {
        let mut matches = self.backend.lookup_prefix(abbrev)?;
        for alt in &self.alternates {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(OdbError::Cancelled);
            }
            matches.extend(alt.resolve_abbrev(abbrev, cancel)?);
        }
        matches.sort();
        matches.dedup();
        Ok(matches)
    }

    /// Resolve an abbreviation to the unique matching id.
    ///
    /// `Ok(None)` when nothing matches; `Ambiguous` when several do.
    pub fn expand_abbrev(
        &self,
        abbrev: &AbbreviatedId,
    ) -> Result<Option<ObjectId>, OdbError> {
        let matches = self.resolve_abbrev(abbrev, None)?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            _ => Err(OdbError::Ambiguous {
                prefix: abbrev.to_hex(),
                candidates: matches,
            }),
        }
    }

    /// A scoped read handle.
    pub fn new_reader(&self) -> ObjectReader<'_> {
        ObjectReader { db: self }
    }

    /// A scoped write handle. Staged writes become visible on `flush`.
    pub fn new_inserter(&self) -> ObjectInserter<'_> {
        ObjectInserter {
            db: self,
            staged: Vec::new(),
            staged_ids: HashSet::new(),
        }
    }
}

/// Scoped read handle over an [`ObjectDatabase`].
pub struct ObjectReader<'a> {
    db: &'a ObjectDatabase,
}

impl ObjectReader<'_> {
    pub fn has(&self, oid: &ObjectId) -> bool {
        self.db.has(oid)
    }

    pub fn open(
        &self,
        oid: &ObjectId,
        type_hint: Option<ObjectType>,
    ) -> Result<ObjectLoader, OdbError> {
        self.db.open_object(oid, type_hint)
    }

    pub fn resolve_abbrev(
        &self,
        abbrev: &AbbreviatedId,
    ) -> Result<Vec<ObjectId>, OdbError> {
        self.db.resolve_abbrev(abbrev, None)
    }
}

/// Scoped write handle. Objects staged here are not visible to readers
/// until [`flush`](ObjectInserter::flush); dropping without flushing
/// discards the staged state.
pub struct ObjectInserter<'a> {
    db: &'a ObjectDatabase,
    staged: Vec<(ObjectId, ObjectType, Vec<u8>)>,
    staged_ids: HashSet<ObjectId>,
}

impl ObjectInserter<'_> {
    /// Compute the id and stage the object. Duplicate inserts (same id)
    /// are no-ops.
    pub fn insert(&mut self, obj_type: ObjectType, content: &[u8]) -> Result<ObjectId, OdbError> {
        let oid = Hasher::hash_object(obj_type.as_str(), content)?;
        if self.staged_ids.insert(oid) && !self.db.has(&oid) {
            self.staged.push((oid, obj_type, content.to_vec()));
        }
        Ok(oid)
    }

    /// Stage a typed object.
    pub fn insert_object(&mut self, obj: &Object) -> Result<ObjectId, OdbError> {
        self.insert(obj.object_type(), &obj.serialize_content())
    }

    /// Publish all staged objects atomically per object. After this call
    /// the staged ids may be announced externally.
    pub fn flush(&mut self) -> Result<(), OdbError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        match &self.db.backend {
            Backend::File(file) => {
                for (_, obj_type, content) in &self.staged {
                    file.write_loose(*obj_type, content)?;
                }
            }
            Backend::Memory(mem) => {
                let name = format!("pack-insert-{}", self.staged[0].0.to_hex());
                let mut pack = MemPack::new(name);
                for (oid, obj_type, content) in &self.staged {
                    pack.add_object(*oid, *obj_type, content.clone());
                }
                mem.commit_pack(pack, &[]);
            }
        }
        self.staged.clear();
        Ok(())
    }
}
