//! Shared fixtures: an in-memory object database seeded with a small
//! commit chain and a tag, plus ref databases over it.
#![allow(dead_code)]

use std::sync::Arc;

use bstr::BString;
use gitcore_hash::ObjectId;
use gitcore_object::{Blob, Commit, Object, ObjectType, Tag, Tree};
use gitcore_odb::ObjectDatabase;
use gitcore_ref::RefDatabase;
use gitcore_utils::date::{GitDate, Signature};

pub fn signature(ts: i64) -> Signature {
    Signature {
        name: BString::from("Test User"),
        email: BString::from("test@example.com"),
        date: GitDate::new(ts, 0),
    }
}

pub fn empty_tree(odb: &ObjectDatabase) -> ObjectId {
    let mut inserter = odb.new_inserter();
    let oid = inserter.insert_object(&Object::Tree(Tree::new())).unwrap();
    inserter.flush().unwrap();
    oid
}

/// Insert a commit with the given parents, returning its id.
pub fn commit(odb: &ObjectDatabase, parents: &[ObjectId], marker: &str) -> ObjectId {
    let tree = empty_tree(odb);
    let commit = Commit {
        tree,
        parents: parents.to_vec(),
        author: signature(1_600_000_000),
        committer: signature(1_600_000_001),
        encoding: None,
        gpgsig: None,
        extra_headers: Vec::new(),
        message: BString::from(format!("{marker}\n")),
    };
    let mut inserter = odb.new_inserter();
    let oid = inserter.insert_object(&Object::Commit(commit)).unwrap();
    inserter.flush().unwrap();
    oid
}

/// Insert an annotated tag pointing at `target`.
pub fn tag(odb: &ObjectDatabase, target: ObjectId, name: &str) -> ObjectId {
    let tag = Tag {
        target,
        target_type: ObjectType::Commit,
        tag_name: BString::from(name),
        tagger: Some(signature(1_600_000_002)),
        message: BString::from(format!("tag {name}\n")),
        signature: None,
    };
    let mut inserter = odb.new_inserter();
    let oid = inserter.insert_object(&Object::Tag(tag)).unwrap();
    inserter.flush().unwrap();
    oid
}

#[allow(dead_code)]
pub fn blob(odb: &ObjectDatabase, data: &[u8]) -> ObjectId {
    let mut inserter = odb.new_inserter();
    let oid = inserter.insert_object(&Object::Blob(Blob::new(data.to_vec()))).unwrap();
    inserter.flush().unwrap();
    oid
}

/// A files-backend ref database over a fresh in-memory object store.
/// Returns the tempdir so it outlives the database.
pub fn files_db() -> (tempfile::TempDir, Arc<ObjectDatabase>, RefDatabase) {
    let dir = tempfile::tempdir().unwrap();
    let odb = Arc::new(ObjectDatabase::in_memory());
    let mut refs = RefDatabase::files(dir.path(), Arc::clone(&odb));
    refs.set_committer(signature(1_600_000_000));
    (dir, odb, refs)
}

/// A memory-backend ref database over a fresh in-memory object store.
#[allow(dead_code)]
pub fn memory_db() -> (Arc<ObjectDatabase>, RefDatabase) {
    let odb = Arc::new(ObjectDatabase::in_memory());
    let mut refs = RefDatabase::in_memory(Arc::clone(&odb));
    refs.set_committer(signature(1_600_000_000));
    (odb, refs)
}
