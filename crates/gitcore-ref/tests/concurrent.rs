//! Concurrency: competing writers linearise per ref.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{commit, signature};
use gitcore_odb::ObjectDatabase;
use gitcore_ref::{RefDatabase, UpdateResult};

#[test]
fn one_winner_among_competing_cas_writers() {
    // N writers race the same create; exactly one reports success and the
    // rest observe the compare-and-swap miss.
    let dir = tempfile::tempdir().unwrap();
    let odb = Arc::new(ObjectDatabase::in_memory());
    let c1 = commit(&odb, &[], "c1");

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let git_dir = dir.path().to_path_buf();

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let odb = Arc::clone(&odb);
            let barrier = Arc::clone(&barrier);
            let git_dir = git_dir.clone();
            thread::spawn(move || {
                let mut refs = RefDatabase::files(&git_dir, odb);
                refs.set_committer(signature(1_600_000_000));
                barrier.wait();

                let mut update = refs.new_update("refs/heads/contended", false).unwrap();
                update.set_new_id(c1);
                update.set_expected_old_id(gitcore_hash::ObjectId::ZERO);
                update.update().unwrap()
            })
        })
        .collect();

    let results: Vec<UpdateResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = results
        .iter()
        .filter(|r| matches!(r, UpdateResult::New))
        .count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, UpdateResult::LockFailure))
        .count();
    assert_eq!(winners, 1, "exactly one writer must win: {results:?}");
    assert_eq!(winners + losers, num_threads);

    let refs = RefDatabase::files(dir.path(), Arc::new(ObjectDatabase::in_memory()));
    let r = refs.exact_ref("refs/heads/contended").unwrap().unwrap();
    assert_eq!(r.oid(), Some(c1));
}

#[test]
fn concurrent_creates_of_distinct_refs_all_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let odb = Arc::new(ObjectDatabase::in_memory());
    let c1 = commit(&odb, &[], "c1");

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let git_dir = dir.path().to_path_buf();

    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let odb = Arc::clone(&odb);
            let barrier = Arc::clone(&barrier);
            let git_dir = git_dir.clone();
            thread::spawn(move || {
                let refs = RefDatabase::files(&git_dir, odb);
                barrier.wait();
                let mut update = refs
                    .new_update(&format!("refs/heads/thread-{i}"), false)
                    .unwrap();
                update.set_new_id(c1);
                update.update().unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), UpdateResult::New);
    }

    let refs = RefDatabase::files(dir.path(), odb);
    assert_eq!(refs.get_refs("refs/heads/").unwrap().len(), num_threads);
}

#[test]
fn memory_backend_single_winner() {
    let odb = Arc::new(ObjectDatabase::in_memory());
    let c1 = commit(&odb, &[], "c1");
    let refs = Arc::new(RefDatabase::in_memory(Arc::clone(&odb)));

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let refs = Arc::clone(&refs);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut update = refs.new_update("refs/heads/contended", false).unwrap();
                update.set_new_id(c1);
                update.set_expected_old_id(gitcore_hash::ObjectId::ZERO);
                update.update().unwrap()
            })
        })
        .collect();

    let results: Vec<UpdateResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results
        .iter()
        .filter(|r| matches!(r, UpdateResult::New))
        .count();
    assert_eq!(winners, 1, "exactly one writer must win: {results:?}");
}
