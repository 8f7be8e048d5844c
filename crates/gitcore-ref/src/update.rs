//! Single-ref updates: compare-and-swap, fast-forward detection, delete.

use std::collections::HashSet;
use std::io::Write;

use gitcore_hash::ObjectId;
use gitcore_object::Object;
use gitcore_odb::ObjectDatabase;

use crate::database::{acquire_or_none, RefBackend, RefDatabase};
use crate::error::RefError;
use crate::files::{loose, FilesRefDb};
use crate::memory::MemRefDb;
use crate::name::RefName;
use crate::reflog;
use crate::{Ref, RefTarget, Storage};

/// Outcome of committing a [`RefUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// Not yet committed.
    NotAttempted,
    /// The ref did not exist and has been created.
    New,
    /// Old and new values are identical; nothing was written.
    NoChange,
    /// The new value is a descendant of the old value.
    FastForward,
    /// Non-fast-forward accepted because force was set.
    Forced,
    /// Non-fast-forward refused.
    Rejected,
    /// The expected old value did not match, or another writer holds the
    /// lock.
    LockFailure,
    /// Storage failed mid-update.
    IoFailure,
    /// The ref was renamed.
    Renamed,
}

/// A pending update to one ref.
///
/// Configure with the setters, then call [`update`](RefUpdate::update) or
/// [`delete`](RefUpdate::delete) exactly once.
pub struct RefUpdate<'a> {
    db: &'a RefDatabase,
    /// The ref actually written (the leaf, when reached through a symref).
    name: RefName,
    /// The symbolic ref the update was addressed to, if any (gets the
    /// same reflog entry).
    origin: Option<RefName>,
    new_id: Option<ObjectId>,
    expected_old: Option<ObjectId>,
    force: bool,
    reflog_message: Option<String>,
    append_status: bool,
    disable_reflog: bool,
    result: UpdateResult,
}

impl<'a> RefUpdate<'a> {
    pub(crate) fn new(db: &'a RefDatabase, name: RefName, origin: Option<RefName>) -> Self {
        Self {
            db,
            name,
            origin,
            new_id: None,
            expected_old: None,
            force: false,
            reflog_message: None,
            append_status: false,
            disable_reflog: false,
            result: UpdateResult::NotAttempted,
        }
    }

    /// The name of the ref this update writes.
    pub fn name(&self) -> &RefName {
        &self.name
    }

    pub fn set_new_id(&mut self, oid: ObjectId) {
        self.new_id = Some(oid);
    }

    /// Require the ref to currently hold `expected` (the zero id means
    /// "must not exist"). A mismatch commits as `LockFailure`.
    pub fn set_expected_old_id(&mut self, expected: ObjectId) {
        self.expected_old = Some(expected);
    }

    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    /// Set the reflog message. With `append_status`, the result kind
    /// (": fast-forward" / ": forced-update") is appended.
    pub fn set_reflog_message(&mut self, message: impl Into<String>, append_status: bool) {
        self.reflog_message = Some(message.into());
        self.append_status = append_status;
    }

    pub fn disable_reflog(&mut self) {
        self.disable_reflog = true;
    }

    /// The result of the last commit attempt.
    pub fn result(&self) -> UpdateResult {
        self.result
    }

    /// Commit the update.
    pub fn update(&mut self) -> Result<UpdateResult, RefError> {
        let new_id = self
            .new_id
            .ok_or(RefError::Misconfigured("new id not set"))?;
        if new_id.is_zero() {
            return Err(RefError::Misconfigured("use delete() for zero new id"));
        }
        if !self.db.odb.has(&new_id) {
            return Err(RefError::MissingObject {
                name: self.name.to_string(),
                oid: new_id,
            });
        }

        let result = match &self.db.backend {
            RefBackend::Files(files) => self.update_files(files, new_id)?,
            RefBackend::Memory(mem) => self.update_memory(mem, new_id)?,
        };
        self.result = result;
        Ok(result)
    }

    /// Delete the ref. Mirrors `update` with a zero new id.
    pub fn delete(&mut self) -> Result<UpdateResult, RefError> {
        // Refuse to delete the branch HEAD points at.
        if let Some(head) = self.db.read(&RefName::new_unchecked("HEAD"))? {
            if head.symbolic_target() == Some(&self.name) {
                return Err(RefError::CannotDeleteCurrentBranch(self.name.to_string()));
            }
        }

        let result = match &self.db.backend {
            RefBackend::Files(files) => self.delete_files(files)?,
            RefBackend::Memory(mem) => self.delete_memory(mem)?,
        };
        self.result = result;
        Ok(result)
    }

    // --- files backend ---

    fn update_files(
        &self,
        files: &FilesRefDb,
        new_id: ObjectId,
    ) -> Result<UpdateResult, RefError> {
        let git_dir = files.git_dir();
        loose::check_dir_file_conflict(git_dir, &self.name)?;

        let path = loose::loose_ref_path(git_dir, &self.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let Some(mut lock) = acquire_or_none(&path, self.db.lock_retry)? else {
            return Ok(UpdateResult::LockFailure);
        };

        let current = files.read(&self.name)?;
        let observed = self.observed_oid(&current)?;

        if !check_expected(self.expected_old, observed) {
            return Ok(UpdateResult::LockFailure);
        }

        let kind = classify(&self.db.odb, observed, new_id, self.force)?;
        match kind {
            UpdateResult::NoChange | UpdateResult::Rejected => {
                lock.rollback()?;
                return Ok(kind);
            }
            _ => {}
        }

        lock.write_all(loose::direct_content(&new_id).as_bytes())
            .map_err(|e| RefError::IoPath {
                path: path.clone(),
                source: e,
            })?;
        lock.commit()?;

        // The transition is committed; the log append must not undo it.
        if let Some(message) = self.log_message(kind) {
            let old = observed.unwrap_or(ObjectId::ZERO);
            let entry = self.db.log_entry(old, new_id, &message);
            let _ = self.append_files_log(files, &self.name, &entry);
            if let Some(origin) = &self.origin {
                let _ = self.append_files_log(files, origin, &entry);
            }
        }

        Ok(kind)
    }

    fn delete_files(&self, files: &FilesRefDb) -> Result<UpdateResult, RefError> {
        let git_dir = files.git_dir();
        let path = loose::loose_ref_path(git_dir, &self.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let Some(lock) = acquire_or_none(&path, self.db.lock_retry)? else {
            return Ok(UpdateResult::LockFailure);
        };

        let current = files.read(&self.name)?;
        let observed = self.observed_oid(&current)?;

        if !check_expected(self.expected_old, observed) {
            return Ok(UpdateResult::LockFailure);
        }
        if current.is_none() {
            lock.rollback()?;
            return Ok(UpdateResult::NoChange);
        }

        // Release the sentinel, then remove both tiers so the packed value
        // cannot resurface.
        lock.rollback()?;
        loose::delete_loose_ref(git_dir, &self.name)?;
        files.remove_packed(&self.name)?;
        reflog::delete_reflog(git_dir, &self.name)?;

        Ok(UpdateResult::Forced)
    }

    fn append_files_log(
        &self,
        files: &FilesRefDb,
        name: &RefName,
        entry: &reflog::ReflogEntry,
    ) -> Result<(), RefError> {
        if self.db.creates_log_for(name) {
            reflog::append_entry(files.git_dir(), name, entry)
        } else {
            reflog::append_if_exists(files.git_dir(), name, entry)
        }
    }

    // --- memory backend ---

    fn update_memory(&self, mem: &MemRefDb, new_id: ObjectId) -> Result<UpdateResult, RefError> {
        mem.with_write(|txn| {
            let current = txn.read(&self.name);
            let observed = match &current {
                Some(r) => r.oid(),
                None => None,
            };

            if !check_expected(self.expected_old, observed) {
                return Ok(UpdateResult::LockFailure);
            }

            let kind = classify(&self.db.odb, observed, new_id, self.force)?;
            match kind {
                UpdateResult::NoChange | UpdateResult::Rejected => return Ok(kind),
                _ => {}
            }

            txn.set(Ref::direct(self.name.clone(), new_id, Storage::Loose));

            if let Some(message) = self.log_message(kind) {
                let old = observed.unwrap_or(ObjectId::ZERO);
                let entry = self.db.log_entry(old, new_id, &message);
                txn.append_log(&self.name, entry.clone());
                if let Some(origin) = &self.origin {
                    txn.append_log(origin, entry);
                }
            }

            Ok(kind)
        })
    }

    fn delete_memory(&self, mem: &MemRefDb) -> Result<UpdateResult, RefError> {
        mem.with_write(|txn| {
            let current = txn.read(&self.name);
            let observed = match &current {
                Some(r) => r.oid(),
                None => None,
            };

            if !check_expected(self.expected_old, observed) {
                return Ok(UpdateResult::LockFailure);
            }
            if current.is_none() {
                return Ok(UpdateResult::NoChange);
            }

            txn.remove(&self.name);
            Ok(UpdateResult::Forced)
        })
    }

    // --- shared ---

    /// The object id the ref currently resolves to (following a symbolic
    /// record when `detach` replaced one).
    fn observed_oid(&self, current: &Option<Ref>) -> Result<Option<ObjectId>, RefError> {
        match current {
            None => Ok(None),
            Some(r) => match &r.target {
                RefTarget::Direct { oid, .. } => Ok(Some(*oid)),
                RefTarget::Symbolic(_) => self.db.resolve(r),
            },
        }
    }

    fn log_message(&self, kind: UpdateResult) -> Option<String> {
        if self.disable_reflog {
            return None;
        }
        let base = self.reflog_message.as_ref()?;
        if !self.append_status {
            return Some(base.clone());
        }
        let status = match kind {
            UpdateResult::FastForward => ": fast-forward",
            UpdateResult::Forced => ": forced-update",
            _ => "",
        };
        Some(format!("{base}{status}"))
    }
}

/// Check the compare-and-swap expectation: `Some(ZERO)` means the ref
/// must not exist; `None` means no expectation.
pub(crate) fn check_expected(expected: Option<ObjectId>, observed: Option<ObjectId>) -> bool {
    match expected {
        None => true,
        Some(expected) if expected.is_zero() => observed.is_none(),
        Some(expected) => observed == Some(expected),
    }
}

/// Classify a transition from `observed` to `new_id`.
pub(crate) fn classify(
    odb: &ObjectDatabase,
    observed: Option<ObjectId>,
    new_id: ObjectId,
    force: bool,
) -> Result<UpdateResult, RefError> {
    match observed {
        None => Ok(UpdateResult::New),
        Some(old) if old == new_id => Ok(UpdateResult::NoChange),
        Some(old) => {
            if is_descendant(odb, old, new_id)? {
                Ok(UpdateResult::FastForward)
            } else if force {
                Ok(UpdateResult::Forced)
            } else {
                Ok(UpdateResult::Rejected)
            }
        }
    }
}

/// Is `descendant` reachable back to `ancestor` through commit parents?
/// Annotated tags on either side are peeled first; non-commit endpoints
/// are never fast-forwards.
pub(crate) fn is_descendant(
    odb: &ObjectDatabase,
    ancestor: ObjectId,
    descendant: ObjectId,
) -> Result<bool, RefError> {
    let Some(ancestor) = peel_to_commit(odb, ancestor)? else {
        return Ok(false);
    };
    let Some(descendant) = peel_to_commit(odb, descendant)? else {
        return Ok(false);
    };

    let mut stack = vec![descendant];
    let mut visited: HashSet<ObjectId> = HashSet::new();
    while let Some(oid) = stack.pop() {
        if oid == ancestor {
            return Ok(true);
        }
        if !visited.insert(oid) {
            continue;
        }
        match odb.read_cached(&oid) {
            Ok(Object::Commit(commit)) => stack.extend(commit.parents.iter().copied()),
            // A shallow boundary or a non-commit parent ends this path.
            _ => continue,
        }
    }
    Ok(false)
}

fn peel_to_commit(
    odb: &ObjectDatabase,
    mut oid: ObjectId,
) -> Result<Option<ObjectId>, RefError> {
    for _ in 0..=crate::MAX_PEEL_DEPTH {
        match odb.read_cached(&oid) {
            Ok(Object::Commit(_)) => return Ok(Some(oid)),
            Ok(Object::Tag(tag)) => oid = tag.target,
            Ok(_) => return Ok(None),
            Err(gitcore_odb::OdbError::Missing(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}
