//! Batch ref updates: many commands, optionally all-or-nothing.

use std::io::Write;

use gitcore_hash::ObjectId;
use gitcore_utils::CancelToken;

use crate::database::{acquire_or_none, RefBackend, RefDatabase};
use crate::error::RefError;
use crate::files::{loose, FilesRefDb};
use crate::memory::MemRefDb;
use crate::name::RefName;
use crate::reflog;
use crate::update::{check_expected, is_descendant};
use crate::{Peeled, Ref, RefTarget, Storage};

/// What a receive command does to its ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Create,
    Update,
    /// An update whose new value does not descend from the old one.
    UpdateNonFastForward,
    Delete,
}

/// Per-command outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    NotAttempted,
    Ok,
    /// The new value is not present in the object database.
    RejectedMissingObject,
    /// Non-fast-forward refused by policy.
    RejectedNonFastForward,
    /// The current ref state did not match the command's old value, or
    /// the ref was locked by another writer.
    LockFailure,
    /// A peer command failed in an atomic batch.
    TransactionAborted,
    RejectedOther(String),
}

/// One ref change within a batch.
#[derive(Debug, Clone)]
pub struct ReceiveCommand {
    name: RefName,
    old_id: ObjectId,
    new_id: ObjectId,
    kind: CommandKind,
    result: CommandResult,
    peeled: Peeled,
}

impl ReceiveCommand {
    /// Create a ref at `new_id` (fails if the ref exists).
    pub fn create(name: RefName, new_id: ObjectId) -> Self {
        Self {
            name,
            old_id: ObjectId::ZERO,
            new_id,
            kind: CommandKind::Create,
            result: CommandResult::NotAttempted,
            peeled: Peeled::NotPeeled,
        }
    }

    /// Move a ref from `old_id` to `new_id`.
    pub fn update(name: RefName, old_id: ObjectId, new_id: ObjectId) -> Self {
        Self {
            name,
            old_id,
            new_id,
            kind: CommandKind::Update,
            result: CommandResult::NotAttempted,
            peeled: Peeled::NotPeeled,
        }
    }

    /// Delete a ref currently at `old_id`.
    pub fn delete(name: RefName, old_id: ObjectId) -> Self {
        Self {
            name,
            old_id,
            new_id: ObjectId::ZERO,
            kind: CommandKind::Delete,
            result: CommandResult::NotAttempted,
            peeled: Peeled::NotPeeled,
        }
    }

    pub fn name(&self) -> &RefName {
        &self.name
    }

    pub fn old_id(&self) -> ObjectId {
        self.old_id
    }

    pub fn new_id(&self) -> ObjectId {
        self.new_id
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn result(&self) -> &CommandResult {
        &self.result
    }

    fn is_delete(&self) -> bool {
        self.new_id.is_zero()
    }

    fn pending(&self) -> bool {
        self.result == CommandResult::NotAttempted
    }
}

/// A batch of ref commands.
///
/// In atomic mode (the default, advertised by both backends) either every
/// command applies or no ref changes; in non-atomic mode each command
/// succeeds or fails on its own.
pub struct BatchRefUpdate {
    commands: Vec<ReceiveCommand>,
    atomic: bool,
    allow_non_fast_forwards: bool,
    reflog_message: Option<String>,
    cancel: Option<CancelToken>,
}

impl BatchRefUpdate {
    pub(crate) fn new() -> Self {
        Self {
            commands: Vec::new(),
            atomic: true,
            allow_non_fast_forwards: false,
            reflog_message: None,
            cancel: None,
        }
    }

    pub fn add_command(&mut self, command: ReceiveCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn set_atomic(&mut self, atomic: bool) -> &mut Self {
        self.atomic = atomic;
        self
    }

    pub fn set_allow_non_fast_forwards(&mut self, allow: bool) -> &mut Self {
        self.allow_non_fast_forwards = allow;
        self
    }

    /// Message for the per-command reflog entries; without one, no
    /// entries are written.
    pub fn set_reflog_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.reflog_message = Some(message.into());
        self
    }

    pub fn set_cancel_token(&mut self, token: CancelToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    pub fn commands(&self) -> &[ReceiveCommand] {
        &self.commands
    }

    /// Execute against a database. Individual outcomes land in each
    /// command's [`result`](ReceiveCommand::result).
    pub fn execute(&mut self, db: &RefDatabase) -> Result<(), RefError> {
        if self.commands.is_empty() {
            return Ok(());
        }

        // Phase 1: every new value must exist; peel tags for the records
        // that will be stored.
        let mut missing = false;
        for cmd in &mut self.commands {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(RefError::Cancelled);
            }
            if cmd.is_delete() {
                continue;
            }
            if !db.odb.has(&cmd.new_id) {
                cmd.result = CommandResult::RejectedMissingObject;
                missing = true;
            } else {
                cmd.peeled = db.peel_oid(&cmd.new_id)?;
            }
        }
        if missing && self.atomic {
            abort_pending(&mut self.commands);
            return Ok(());
        }

        match &db.backend {
            RefBackend::Memory(mem) => self.execute_memory(db, mem),
            RefBackend::Files(files) => {
                if self.atomic {
                    self.execute_files_atomic(db, files)
                } else {
                    self.execute_files_independent(db, files)
                }
            }
        }
    }

    /// Did every command apply?
    pub fn all_ok(&self) -> bool {
        self.commands
            .iter()
            .all(|c| c.result == CommandResult::Ok)
    }

    // --- memory backend ---

    fn execute_memory(&mut self, db: &RefDatabase, mem: &MemRefDb) -> Result<(), RefError> {
        let atomic = self.atomic;
        let allow_nonff = self.allow_non_fast_forwards;
        let message = self.reflog_message.clone();
        let commands = &mut self.commands;

        mem.with_write(|txn| {
            // Precondition pass over the stable map state.
            let mut failed = false;
            for cmd in commands.iter_mut().filter(|c| c.pending()) {
                let observed = txn.read(&cmd.name).and_then(|r| r.oid());
                match precondition(db, cmd, observed, allow_nonff)? {
                    Precondition::Apply => {}
                    Precondition::ApplyNonFastForward => {
                        cmd.kind = CommandKind::UpdateNonFastForward;
                    }
                    Precondition::Fail(result) => {
                        cmd.result = result;
                        failed = true;
                    }
                }
            }
            if failed && atomic {
                abort_pending(commands);
                return Ok(());
            }

            // Apply pass.
            for cmd in commands.iter_mut().filter(|c| c.pending()) {
                let observed = txn.read(&cmd.name).and_then(|r| r.oid());
                if cmd.is_delete() {
                    txn.remove(&cmd.name);
                } else {
                    txn.set(Ref {
                        name: cmd.name.clone(),
                        storage: Storage::Loose,
                        target: RefTarget::Direct {
                            oid: cmd.new_id,
                            peeled: cmd.peeled,
                        },
                    });
                    if let Some(message) = &message {
                        let old = observed.unwrap_or(ObjectId::ZERO);
                        txn.append_log(&cmd.name, db.log_entry(old, cmd.new_id, message));
                    }
                }
                cmd.result = CommandResult::Ok;
            }
            Ok(())
        })
    }

    // --- files backend ---

    fn execute_files_atomic(
        &mut self,
        db: &RefDatabase,
        files: &FilesRefDb,
    ) -> Result<(), RefError> {
        let git_dir = files.git_dir();

        // Take every lock before verifying anything; lock in name order so
        // concurrent batches cannot deadlock.
        let mut order: Vec<usize> = (0..self.commands.len()).collect();
        order.sort_by(|&a, &b| self.commands[a].name().cmp(self.commands[b].name()));

        let mut locks = Vec::with_capacity(order.len());
        for &idx in &order {
            let cmd = &self.commands[idx];
            if let Err(e) = loose::check_dir_file_conflict(git_dir, &cmd.name) {
                self.commands[idx].result =
                    CommandResult::RejectedOther(e.to_string());
                abort_pending(&mut self.commands);
                return Ok(());
            }
            let path = loose::loose_ref_path(git_dir, &cmd.name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            match acquire_or_none(&path, db.lock_retry)? {
                Some(lock) => locks.push((idx, lock)),
                None => {
                    self.commands[idx].result = CommandResult::LockFailure;
                    abort_pending(&mut self.commands);
                    return Ok(());
                }
            }
        }

        // Verify all preconditions under the full lock set.
        let mut failed = false;
        for (idx, _) in &locks {
            let cmd = &self.commands[*idx];
            let observed = files.read(&cmd.name)?.and_then(|r| r.oid());
            match precondition(db, cmd, observed, self.allow_non_fast_forwards)? {
                Precondition::Apply => {}
                Precondition::ApplyNonFastForward => {
                    self.commands[*idx].kind = CommandKind::UpdateNonFastForward;
                }
                Precondition::Fail(result) => {
                    self.commands[*idx].result = result;
                    failed = true;
                }
            }
        }
        if failed {
            abort_pending(&mut self.commands);
            return Ok(());
        }

        // Apply: write or delete each ref, then commit the locks.
        let mut observed_oids = Vec::with_capacity(locks.len());
        for (idx, lock) in &mut locks {
            let cmd = &self.commands[*idx];
            observed_oids.push(files.read(&cmd.name)?.and_then(|r| r.oid()));
            if !cmd.is_delete() {
                lock.write_all(loose::direct_content(&cmd.new_id).as_bytes())
                    .map_err(|e| RefError::IoPath {
                        path: lock.path().to_path_buf(),
                        source: e,
                    })?;
            }
        }
        for ((idx, lock), observed) in locks.into_iter().zip(observed_oids) {
            let cmd = &self.commands[idx];
            if cmd.is_delete() {
                lock.rollback()?;
                loose::delete_loose_ref(git_dir, &cmd.name)?;
                files.remove_packed(&cmd.name)?;
                reflog::delete_reflog(git_dir, &cmd.name)?;
            } else {
                lock.commit()?;
                if let Some(message) = &self.reflog_message {
                    let old = observed.unwrap_or(ObjectId::ZERO);
                    let entry = db.log_entry(old, cmd.new_id, message);
                    let _ = if db.creates_log_for(&cmd.name) {
                        reflog::append_entry(git_dir, &cmd.name, &entry)
                    } else {
                        reflog::append_if_exists(git_dir, &cmd.name, &entry)
                    };
                }
            }
            self.commands[idx].result = CommandResult::Ok;
        }
        Ok(())
    }

    fn execute_files_independent(
        &mut self,
        db: &RefDatabase,
        files: &FilesRefDb,
    ) -> Result<(), RefError> {
        let git_dir = files.git_dir();
        let allow_nonff = self.allow_non_fast_forwards;

        for cmd in self.commands.iter_mut().filter(|c| c.pending()) {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(RefError::Cancelled);
            }

            if let Err(e) = loose::check_dir_file_conflict(git_dir, &cmd.name) {
                cmd.result = CommandResult::RejectedOther(e.to_string());
                continue;
            }
            let path = loose::loose_ref_path(git_dir, &cmd.name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            let Some(mut lock) = acquire_or_none(&path, db.lock_retry)? else {
                cmd.result = CommandResult::LockFailure;
                continue;
            };

            let observed = files.read(&cmd.name)?.and_then(|r| r.oid());
            match precondition(db, cmd, observed, allow_nonff)? {
                Precondition::Apply => {}
                Precondition::ApplyNonFastForward => {
                    cmd.kind = CommandKind::UpdateNonFastForward;
                }
                Precondition::Fail(result) => {
                    cmd.result = result;
                    continue;
                }
            }

            if cmd.is_delete() {
                lock.rollback()?;
                loose::delete_loose_ref(git_dir, &cmd.name)?;
                files.remove_packed(&cmd.name)?;
                reflog::delete_reflog(git_dir, &cmd.name)?;
            } else {
                lock.write_all(loose::direct_content(&cmd.new_id).as_bytes())
                    .map_err(|e| RefError::IoPath {
                        path: path.clone(),
                        source: e,
                    })?;
                lock.commit()?;
                if let Some(message) = &self.reflog_message {
                    let old = observed.unwrap_or(ObjectId::ZERO);
                    let entry = db.log_entry(old, cmd.new_id, message);
                    let _ = if db.creates_log_for(&cmd.name) {
                        reflog::append_entry(git_dir, &cmd.name, &entry)
                    } else {
                        reflog::append_if_exists(git_dir, &cmd.name, &entry)
                    };
                }
            }
            cmd.result = CommandResult::Ok;
        }
        Ok(())
    }
}

/// Outcome of checking one command's precondition.
enum Precondition {
    Apply,
    /// The update applies but is not a fast-forward; the command is
    /// reclassified.
    ApplyNonFastForward,
    Fail(CommandResult),
}

/// Check one command against the observed ref state.
fn precondition(
    db: &RefDatabase,
    cmd: &ReceiveCommand,
    observed: Option<ObjectId>,
    allow_non_fast_forwards: bool,
) -> Result<Precondition, RefError> {
    match cmd.kind {
        CommandKind::Create => {
            if observed.is_some() {
                return Ok(Precondition::Fail(CommandResult::LockFailure));
            }
        }
        CommandKind::Update | CommandKind::UpdateNonFastForward | CommandKind::Delete => {
            if !check_expected(Some(cmd.old_id), observed) {
                return Ok(Precondition::Fail(CommandResult::LockFailure));
            }
        }
    }

    if cmd.kind == CommandKind::Update
        && !cmd.old_id.is_zero()
        && !cmd.new_id.is_zero()
        && cmd.old_id != cmd.new_id
        && !is_descendant(&db.odb, cmd.old_id, cmd.new_id)?
    {
        return Ok(if allow_non_fast_forwards {
            Precondition::ApplyNonFastForward
        } else {
            Precondition::Fail(CommandResult::RejectedNonFastForward)
        });
    }

    Ok(Precondition::Apply)
}

/// Mark every still-pending command as aborted.
fn abort_pending(commands: &mut [ReceiveCommand]) {
    for cmd in commands.iter_mut().filter(|c| c.pending()) {
        cmd.result = CommandResult::TransactionAborted;
    }
}
