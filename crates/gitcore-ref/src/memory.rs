//! The in-memory ref backend.
//!
//! Refs live in a map behind a reader/writer lock; taking the writer lock
//! for the whole of a batch makes multi-ref updates naturally atomic.
//! Reflogs are in-memory vectors with the same semantics as the on-disk
//! logs.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::RefError;
use crate::name::RefName;
use crate::reflog::ReflogEntry;
use crate::Ref;

#[derive(Default)]
struct State {
    refs: HashMap<RefName, Ref>,
    logs: HashMap<RefName, Vec<ReflogEntry>>,
}

/// Fully in-memory ref storage.
#[derive(Default)]
pub struct MemRefDb {
    state: RwLock<State>,
}

impl MemRefDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, name: &RefName) -> Result<Option<Ref>, RefError> {
        let state = self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(state.refs.get(name).cloned())
    }

    pub fn list(&self, prefix: &str) -> Result<BTreeMap<String, Ref>, RefError> {
        let state = self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(state
            .refs
            .iter()
            .filter(|(name, _)| name.as_str().starts_with(prefix))
            .map(|(name, r)| (name.as_str().to_string(), r.clone()))
            .collect())
    }

    /// Run `f` with exclusive access to the whole map. Everything `f`
    /// changes becomes visible atomically when the lock is released.
    pub(crate) fn with_write<T>(
        &self,
        f: impl FnOnce(&mut MemTxn<'_>) -> Result<T, RefError>,
    ) -> Result<T, RefError> {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut txn = MemTxn { state: &mut state };
        f(&mut txn)
    }

    pub fn reflog(&self, name: &RefName) -> Result<Vec<ReflogEntry>, RefError> {
        let state = self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(state.logs.get(name).cloned().unwrap_or_default())
    }
}

/// Exclusive view over the in-memory state for the duration of an update.
pub(crate) struct MemTxn<'a> {
    state: &'a mut State,
}

impl MemTxn<'_> {
    pub fn read(&self, name: &RefName) -> Option<Ref> {
        self.state.refs.get(name).cloned()
    }

    pub fn set(&mut self, r: Ref) {
        self.state.refs.insert(r.name.clone(), r);
    }

    pub fn remove(&mut self, name: &RefName) {
        self.state.refs.remove(name);
        self.state.logs.remove(name);
    }

    pub fn append_log(&mut self, name: &RefName, entry: ReflogEntry) {
        self.state.logs.entry(name.clone()).or_default().push(entry);
    }

    pub fn move_log(&mut self, from: &RefName, to: &RefName) {
        if let Some(log) = self.state.logs.remove(from) {
            self.state.logs.insert(to.clone(), log);
        }
    }

    pub fn head_target(&self) -> Option<RefName> {
        self.state
            .refs
            .get(&RefName::new_unchecked("HEAD"))
            .and_then(|r| r.symbolic_target().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Storage;
    use gitcore_hash::ObjectId;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn set_and_read() {
        let db = MemRefDb::new();
        let name = RefName::new("refs/heads/main").unwrap();
        let r = Ref::direct(name.clone(), ObjectId::from_hex(A).unwrap(), Storage::New);

        db.with_write(|txn| {
            txn.set(r.clone());
            Ok(())
        })
        .unwrap();

        assert_eq!(db.read(&name).unwrap().unwrap().oid().unwrap().to_hex(), A);
    }

    #[test]
    fn list_by_prefix() {
        let db = MemRefDb::new();
        let oid = ObjectId::from_hex(A).unwrap();
        db.with_write(|txn| {
            txn.set(Ref::direct(
                RefName::new("refs/heads/main").unwrap(),
                oid,
                Storage::New,
            ));
            txn.set(Ref::direct(
                RefName::new("refs/tags/v1").unwrap(),
                oid,
                Storage::New,
            ));
            Ok(())
        })
        .unwrap();

        assert_eq!(db.list("refs/heads/").unwrap().len(), 1);
        assert_eq!(db.list("").unwrap().len(), 2);
    }

    #[test]
    fn remove_drops_log_too() {
        let db = MemRefDb::new();
        let name = RefName::new("refs/heads/main").unwrap();
        let oid = ObjectId::from_hex(A).unwrap();

        db.with_write(|txn| {
            txn.set(Ref::direct(name.clone(), oid, Storage::New));
            txn.append_log(
                &name,
                ReflogEntry {
                    old_oid: ObjectId::ZERO,
                    new_oid: oid,
                    identity: gitcore_utils::date::Signature {
                        name: "t".into(),
                        email: "t@e".into(),
                        date: gitcore_utils::date::GitDate::new(0, 0),
                    },
                    message: "created".into(),
                },
            );
            Ok(())
        })
        .unwrap();
        assert_eq!(db.reflog(&name).unwrap().len(), 1);

        db.with_write(|txn| {
            txn.remove(&name);
            Ok(())
        })
        .unwrap();
        assert!(db.read(&name).unwrap().is_none());
        assert!(db.reflog(&name).unwrap().is_empty());
    }
}
