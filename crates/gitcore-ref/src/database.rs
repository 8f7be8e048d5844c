use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bstr::BString;
use gitcore_hash::ObjectId;
use gitcore_object::Object;
use gitcore_odb::ObjectDatabase;
use gitcore_utils::date::{GitDate, Signature};
use gitcore_utils::{LockFile, LockRetry};

use crate::batch::BatchRefUpdate;
use crate::error::RefError;
use crate::files::{loose, FilesRefDb};
use crate::memory::MemRefDb;
use crate::name::{is_valid_ref_name, RefName};
use crate::reflog::{self, ReflogEntry};
use crate::update::{RefUpdate, UpdateResult};
use crate::{Peeled, Ref, RefTarget, MAX_PEEL_DEPTH, MAX_SYMREF_DEPTH};

/// `core.logallrefupdates` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAllRefUpdates {
    /// Create logs for HEAD, branches, and remote-tracking refs.
    True,
    /// Only append to logs that already exist.
    False,
    /// Create logs for every ref.
    Always,
}

/// The closed set of ref storage backends.
pub(crate) enum RefBackend {
    Files(FilesRefDb),
    Memory(MemRefDb),
}

/// The reference database: named-ref lookups, updates, and reflogs.
///
/// Holds the object database for target validation (every direct ref must
/// name an existing object), peeling, and fast-forward detection.
pub struct RefDatabase {
    pub(crate) backend: RefBackend,
    pub(crate) odb: Arc<ObjectDatabase>,
    identity: Signature,
    log_all: LogAllRefUpdates,
    pub(crate) lock_retry: LockRetry,
}

impl RefDatabase {
    /// A files backend rooted at the given git dir.
    pub fn files(git_dir: impl AsRef<Path>, odb: Arc<ObjectDatabase>) -> Self {
        Self {
            backend: RefBackend::Files(FilesRefDb::new(git_dir)),
            odb,
            identity: default_identity(),
            log_all: LogAllRefUpdates::True,
            lock_retry: LockRetry::default(),
        }
    }

    /// An in-memory backend.
    pub fn in_memory(odb: Arc<ObjectDatabase>) -> Self {
        Self {
            backend: RefBackend::Memory(MemRefDb::new()),
            odb,
            identity: default_identity(),
            log_all: LogAllRefUpdates::Always,
            lock_retry: LockRetry::default(),
        }
    }

    /// Identity recorded in reflog entries.
    pub fn set_committer(&mut self, identity: Signature) {
        self.identity = identity;
    }

    pub fn set_log_all_ref_updates(&mut self, value: LogAllRefUpdates) {
        self.log_all = value;
    }

    /// Does this backend apply batches atomically? Both current backends
    /// do: files by locking the full set up front, memory behind the
    /// map-wide writer lock.
    pub fn performs_atomic_transactions(&self) -> bool {
        true
    }

    pub fn object_database(&self) -> &ObjectDatabase {
        &self.odb
    }

    // --- Lookups ---

    /// Look up a ref by its exact name; no short-name expansion.
    pub fn exact_ref(&self, name: &str) -> Result<Option<Ref>, RefError> {
        let name = RefName::new(name)?;
        self.read(&name)
    }

    /// Search for a ref by short name, trying in order: the name itself,
    /// `refs/<name>`, `refs/tags/<name>`, `refs/heads/<name>`,
    /// `refs/remotes/<name>`, `refs/remotes/<name>/HEAD`.
    pub fn find_ref(&self, short: &str) -> Result<Option<Ref>, RefError> {
        let candidates = [
            short.to_string(),
            format!("refs/{short}"),
            format!("refs/tags/{short}"),
            format!("refs/heads/{short}"),
            format!("refs/remotes/{short}"),
            format!("refs/remotes/{short}/HEAD"),
        ];
        for candidate in candidates {
            let Ok(name) = RefName::new(candidate.as_str()) else {
                continue;
            };
            if let Some(r) = self.read(&name)? {
                return Ok(Some(r));
            }
        }
        Ok(None)
    }

    /// Snapshot of all refs under a prefix. The empty prefix returns
    /// everything, including `HEAD` and the other specials.
    pub fn get_refs(&self, prefix: &str) -> Result<BTreeMap<String, Ref>, RefError> {
        match &self.backend {
            RefBackend::Files(files) => files.list(prefix),
            RefBackend::Memory(mem) => mem.list(prefix),
        }
    }

    /// Follow a ref to its leaf object id. `Ok(None)` for unborn branches.
    pub fn resolve(&self, r: &Ref) -> Result<Option<ObjectId>, RefError> {
        match &r.target {
            RefTarget::Direct { oid, .. } => Ok(Some(*oid)),
            RefTarget::Symbolic(target) => self.resolve_name_inner(target, 1),
        }
    }

    /// Resolve a ref name to an object id, following symbolic chains.
    pub fn resolve_name(&self, name: &str) -> Result<Option<ObjectId>, RefError> {
        let name = RefName::new(name)?;
        self.resolve_name_inner(&name, 0)
    }

    fn resolve_name_inner(
        &self,
        name: &RefName,
        depth: usize,
    ) -> Result<Option<ObjectId>, RefError> {
        if depth > MAX_SYMREF_DEPTH {
            return Err(RefError::SymrefLoop(name.to_string()));
        }
        match self.read(name)? {
            Some(r) => match &r.target {
                RefTarget::Direct { oid, .. } => Ok(Some(*oid)),
                RefTarget::Symbolic(target) => self.resolve_name_inner(target, depth + 1),
            },
            None => Ok(None),
        }
    }

    /// Follow a symbolic chain to the final (leaf) name and its record.
    /// The leaf may not exist yet (unborn branch).
    pub(crate) fn resolve_leaf(
        &self,
        name: &RefName,
    ) -> Result<(RefName, Option<Ref>), RefError> {
        let mut current = name.clone();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.read(&current)? {
                Some(r) => match &r.target {
                    RefTarget::Symbolic(target) => current = target.clone(),
                    RefTarget::Direct { .. } => return Ok((current, Some(r))),
                },
                None => return Ok((current, None)),
            }
        }
        Err(RefError::SymrefLoop(name.to_string()))
    }

    /// Peel a direct ref: chase annotated tags to the first non-tag
    /// object and record the result. Non-tag refs come back with
    /// `Peeled::NonTag`; symbolic refs are returned unchanged.
    pub fn peel(&self, r: &Ref) -> Result<Ref, RefError> {
        let RefTarget::Direct { oid, peeled } = &r.target else {
            return Ok(r.clone());
        };
        if *peeled != Peeled::NotPeeled {
            return Ok(r.clone());
        }

        let peeled = self.peel_oid(oid)?;
        Ok(Ref {
            name: r.name.clone(),
            storage: r.storage,
            target: RefTarget::Direct { oid: *oid, peeled },
        })
    }

    /// Peel an object id, classifying tag-ness.
    pub(crate) fn peel_oid(&self, oid: &ObjectId) -> Result<Peeled, RefError> {
        let mut current = *oid;
        let mut depth = 0;
        loop {
            match self.odb.read_cached(&current)? {
                Object::Tag(tag) => {
                    depth += 1;
                    if depth > MAX_PEEL_DEPTH {
                        return Err(RefError::Corrupt(format!(
                            "tag chain deeper than {MAX_PEEL_DEPTH} at {current}"
                        )));
                    }
                    current = tag.target;
                }
                _ => {
                    return Ok(if depth == 0 {
                        Peeled::NonTag
                    } else {
                        Peeled::Tag(current)
                    })
                }
            }
        }
    }

    // --- Updates ---

    /// Begin a single-ref update.
    ///
    /// Updating through a symbolic ref rewrites the leaf it points to;
    /// with `detach` the symbolic ref itself is replaced.
    pub fn new_update(&self, name: &str, detach: bool) -> Result<RefUpdate<'_>, RefError> {
        let name = RefName::new(name)?;
        let (target_name, origin) = if detach {
            (name, None)
        } else {
            match self.read(&name)? {
                Some(r) if r.is_symbolic() => {
                    let (leaf, _) = self.resolve_leaf(&name)?;
                    (leaf, Some(r.name))
                }
                _ => (name, None),
            }
        };
        Ok(RefUpdate::new(self, target_name, origin))
    }

    /// Begin a batch of ref updates.
    pub fn new_batch(&self) -> BatchRefUpdate {
        BatchRefUpdate::new()
    }

    /// Point a symbolic ref at another ref name (HEAD management). The
    /// target does not need to exist yet (unborn branch).
    pub fn set_symbolic_ref(&self, name: &str, target: &str) -> Result<(), RefError> {
        let name = RefName::new(name)?;
        let target = RefName::new(target)?;
        match &self.backend {
            RefBackend::Files(files) => {
                let git_dir = files.git_dir();
                let path = loose::loose_ref_path(git_dir, &name);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
                let mut lock = LockFile::acquire_with_retry(&path, self.lock_retry)?;
                use std::io::Write;
                lock.write_all(loose::symbolic_content(&target).as_bytes())
                    .map_err(|e| RefError::IoPath {
                        path: path.clone(),
                        source: e,
                    })?;
                lock.commit()?;
                Ok(())
            }
            RefBackend::Memory(mem) => mem.with_write(|txn| {
                txn.set(Ref::symbolic(name.clone(), target.clone(), crate::Storage::Loose));
                Ok(())
            }),
        }
    }

    /// Atomically rename a ref, keeping its object id and carrying its
    /// reflog forward. `from = "HEAD"` renames the currently checked-out
    /// branch; with a detached HEAD that fails with
    /// [`RefError::DetachedHead`].
    pub fn rename_ref(&self, from: &str, to: &str) -> Result<UpdateResult, RefError> {
        let from_name = if from == "HEAD" {
            match self.read(&RefName::new_unchecked("HEAD"))? {
                Some(head) => match head.symbolic_target() {
                    Some(target) => target.clone(),
                    None => return Err(RefError::DetachedHead),
                },
                None => return Err(RefError::NotFound("HEAD".into())),
            }
        } else {
            RefName::new(from)?
        };

        if !is_valid_ref_name(to) {
            return Err(RefError::InvalidName(to.to_string()));
        }
        let to_name = RefName::new(to)?;

        if self.read(&to_name)?.is_some() {
            return Err(RefError::AlreadyExists(to_name.to_string()));
        }
        let from_ref = self
            .read(&from_name)?
            .ok_or_else(|| RefError::NotFound(from_name.to_string()))?;
        let oid = from_ref
            .oid()
            .ok_or_else(|| RefError::Parse("cannot rename a symbolic ref".into()))?;

        let message = format!("Branch: renamed {} to {}", from_name, to_name);
        match &self.backend {
            RefBackend::Files(files) => {
                self.rename_files(files, &from_name, &to_name, oid, &message)
            }
            RefBackend::Memory(mem) => {
                let entry = self.log_entry(oid, oid, &message);
                mem.with_write(|txn| {
                    if txn.read(&to_name).is_some() {
                        return Err(RefError::AlreadyExists(to_name.to_string()));
                    }
                    let Some(current) = txn.read(&from_name) else {
                        return Err(RefError::NotFound(from_name.to_string()));
                    };
                    if current.oid() != Some(oid) {
                        return Ok(UpdateResult::LockFailure);
                    }

                    txn.move_log(&from_name, &to_name);
                    txn.set(Ref::direct(to_name.clone(), oid, crate::Storage::New));
                    let head = RefName::new_unchecked("HEAD");
                    if txn.head_target().as_ref() == Some(&from_name) {
                        txn.set(Ref::symbolic(
                            head.clone(),
                            to_name.clone(),
                            crate::Storage::Loose,
                        ));
                        txn.append_log(&head, entry.clone());
                    }
                    txn.remove(&from_name);
                    txn.append_log(&to_name, entry.clone());
                    Ok(UpdateResult::Renamed)
                })
            }
        }
    }

    fn rename_files(
        &self,
        files: &FilesRefDb,
        from_name: &RefName,
        to_name: &RefName,
        oid: ObjectId,
        message: &str,
    ) -> Result<UpdateResult, RefError> {
        let git_dir = files.git_dir();

        loose::check_dir_file_conflict(git_dir, to_name)?;
        let to_path = loose::loose_ref_path(git_dir, to_name);
        if let Some(parent) = to_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        // Lock both names; the source lock pins its value during the move.
        let Some(mut to_lock) = acquire_or_none(&to_path, self.lock_retry)? else {
            return Ok(UpdateResult::LockFailure);
        };
        let from_path = loose::loose_ref_path(git_dir, from_name);
        let Some(from_lock) = acquire_or_none(&from_path, self.lock_retry)? else {
            return Ok(UpdateResult::LockFailure);
        };

        // Re-verify under the locks.
        let current = files.read(from_name)?;
        if current.as_ref().and_then(|r| r.oid()) != Some(oid) {
            return Ok(UpdateResult::LockFailure);
        }

        use std::io::Write;
        to_lock
            .write_all(loose::direct_content(&oid).as_bytes())
            .map_err(|e| RefError::IoPath {
                path: to_path.clone(),
                source: e,
            })?;
        to_lock.commit()?;

        from_lock.rollback()?;
        loose::delete_loose_ref(git_dir, from_name)?;
        files.remove_packed(from_name)?;

        // Carry the log, then record the rename (best-effort, after the
        // ref transition committed).
        let _ = reflog::rename_reflog(git_dir, from_name, to_name);
        let entry = self.log_entry(oid, oid, message);
        let _ = reflog::append_entry(git_dir, to_name, &entry);

        // Retarget HEAD if it pointed at the renamed branch.
        let head = RefName::new_unchecked("HEAD");
        if let Some(head_ref) = files.read(&head)? {
            if head_ref.symbolic_target() == Some(from_name) {
                let head_path = loose::loose_ref_path(git_dir, &head);
                if let Some(mut head_lock) = acquire_or_none(&head_path, self.lock_retry)? {
                    head_lock
                        .write_all(loose::symbolic_content(to_name).as_bytes())
                        .map_err(|e| RefError::IoPath {
                            path: head_path.clone(),
                            source: e,
                        })?;
                    head_lock.commit()?;
                    let _ = reflog::append_entry(git_dir, &head, &entry);
                }
            }
        }

        Ok(UpdateResult::Renamed)
    }

    // --- Reflog access ---

    /// All reflog entries for a ref, oldest first.
    pub fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>, RefError> {
        let name = RefName::new(name)?;
        match &self.backend {
            RefBackend::Files(files) => reflog::read_reflog(files.git_dir(), &name),
            RefBackend::Memory(mem) => mem.reflog(&name),
        }
    }

    /// Reflog entries newest first.
    pub fn reflog_reverse(&self, name: &str) -> Result<Vec<ReflogEntry>, RefError> {
        let mut entries = self.reflog(name)?;
        entries.reverse();
        Ok(entries)
    }

    /// The n-th reflog entry counting back from the newest (0 = newest).
    pub fn reflog_entry(&self, name: &str, n: usize) -> Result<Option<ReflogEntry>, RefError> {
        let entries = self.reflog(name)?;
        let len = entries.len();
        Ok(if n < len {
            Some(entries[len - 1 - n].clone())
        } else {
            None
        })
    }

    // --- Internals shared with update/batch ---

    pub(crate) fn read(&self, name: &RefName) -> Result<Option<Ref>, RefError> {
        match &self.backend {
            RefBackend::Files(files) => files.read(name),
            RefBackend::Memory(mem) => mem.read(name),
        }
    }

    /// Should a missing log be created for this ref on update?
    pub(crate) fn creates_log_for(&self, name: &RefName) -> bool {
        match self.log_all {
            LogAllRefUpdates::Always => true,
            LogAllRefUpdates::False => false,
            LogAllRefUpdates::True => {
                name.as_str() == "HEAD" || name.is_branch() || name.is_remote()
            }
        }
    }

    pub(crate) fn log_entry(
        &self,
        old_oid: ObjectId,
        new_oid: ObjectId,
        message: &str,
    ) -> ReflogEntry {
        ReflogEntry {
            old_oid,
            new_oid,
            identity: Signature {
                name: self.identity.name.clone(),
                email: self.identity.email.clone(),
                date: GitDate::now(),
            },
            message: BString::from(message),
        }
    }
}

/// Acquire a lock with the database's retry policy; contention maps to
/// `None` so callers can report `LockFailure` without an error path.
pub(crate) fn acquire_or_none(
    path: &Path,
    retry: LockRetry,
) -> Result<Option<LockFile>, RefError> {
    use gitcore_utils::{LockError, UtilError};
    match LockFile::acquire_with_retry(path, retry) {
        Ok(lock) => Ok(Some(lock)),
        Err(UtilError::Lock(LockError::AlreadyLocked { .. }))
        | Err(UtilError::Lock(LockError::Timeout { .. })) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn default_identity() -> Signature {
    Signature {
        name: BString::from("gitcore"),
        email: BString::from("gitcore@localhost"),
        date: GitDate::new(0, 0),
    }
}
