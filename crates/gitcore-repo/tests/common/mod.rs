//! Shared fixtures for repository-level tests.
#![allow(dead_code)]

use bstr::BString;
use gitcore_hash::ObjectId;
use gitcore_object::{Blob, Commit, FileMode, Object, ObjectType, Tag, Tree, TreeEntry};
use gitcore_repo::Repository;
use gitcore_utils::date::{GitDate, Signature};

pub fn signature(ts: i64) -> Signature {
    Signature {
        name: BString::from("Test User"),
        email: BString::from("test@example.com"),
        date: GitDate::new(ts, 0),
    }
}

pub fn insert(repo: &Repository, obj: &Object) -> ObjectId {
    let mut inserter = repo.odb().new_inserter();
    let oid = inserter.insert_object(obj).unwrap();
    inserter.flush().unwrap();
    oid
}

pub fn blob(repo: &Repository, data: &[u8]) -> ObjectId {
    insert(repo, &Object::Blob(Blob::new(data.to_vec())))
}

/// A tree of (name, blob-content) regular files.
pub fn tree_of(repo: &Repository, files: &[(&str, &[u8])]) -> ObjectId {
    let mut tree = Tree::new();
    for (name, content) in files {
        let oid = blob(repo, content);
        tree.insert(TreeEntry {
            mode: FileMode::Regular,
            name: BString::from(*name),
            oid,
        });
    }
    insert(repo, &Object::Tree(tree))
}

/// A tree with one subdirectory entry.
pub fn tree_with_subtree(repo: &Repository, name: &str, subtree: ObjectId) -> ObjectId {
    let mut tree = Tree::new();
    tree.insert(TreeEntry {
        mode: FileMode::Tree,
        name: BString::from(name),
        oid: subtree,
    });
    insert(repo, &Object::Tree(tree))
}

pub fn commit_with_tree(
    repo: &Repository,
    tree: ObjectId,
    parents: &[ObjectId],
    message: &str,
) -> ObjectId {
    insert(
        repo,
        &Object::Commit(Commit {
            tree,
            parents: parents.to_vec(),
            author: signature(1_600_000_000),
            committer: signature(1_600_000_001),
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: BString::from(format!("{message}\n")),
        }),
    )
}

pub fn commit(repo: &Repository, parents: &[ObjectId], message: &str) -> ObjectId {
    let tree = tree_of(repo, &[]);
    commit_with_tree(repo, tree, parents, message)
}

pub fn tag_of(repo: &Repository, target: ObjectId, name: &str) -> ObjectId {
    insert(
        repo,
        &Object::Tag(Tag {
            target,
            target_type: ObjectType::Commit,
            tag_name: BString::from(name),
            tagger: Some(signature(1_600_000_002)),
            message: BString::from(format!("tag {name}\n")),
            signature: None,
        }),
    )
}

/// Point a branch (or any ref) at an object, force-style.
pub fn set_ref(repo: &Repository, name: &str, oid: ObjectId) {
    let mut update = repo.refs().new_update(name, true).unwrap();
    update.set_new_id(oid);
    update.set_force(true);
    update.set_reflog_message("test: set ref", false);
    let result = update.update().unwrap();
    assert!(
        matches!(
            result,
            gitcore_ref::UpdateResult::New
                | gitcore_ref::UpdateResult::FastForward
                | gitcore_ref::UpdateResult::Forced
                | gitcore_ref::UpdateResult::NoChange
        ),
        "set_ref failed: {result:?}"
    );
}
