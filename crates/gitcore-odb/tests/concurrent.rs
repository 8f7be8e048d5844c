//! Concurrent insert/read stress tests.

use std::sync::{Arc, Barrier};
use std::thread;

use gitcore_hash::Hasher;
use gitcore_object::ObjectType;
use gitcore_odb::ObjectDatabase;

#[test]
fn concurrent_inserters_against_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(ObjectDatabase::open(dir.path()).unwrap());

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut inserter = db.new_inserter();
                // Half the payloads are shared across threads to exercise
                // the duplicate-publish race.
                let unique = format!("thread-{i}").into_bytes();
                let shared = b"shared payload".to_vec();
                let a = inserter.insert(ObjectType::Blob, &unique).unwrap();
                let b = inserter.insert(ObjectType::Blob, &shared).unwrap();
                inserter.flush().unwrap();
                (a, b)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for (i, (unique_oid, shared_oid)) in results.iter().enumerate() {
        let expected = format!("thread-{i}").into_bytes();
        assert_eq!(
            db.open_object(unique_oid, None).unwrap().cached_bytes().unwrap(),
            expected
        );
        assert_eq!(
            *shared_oid,
            Hasher::hash_object("blob", b"shared payload").unwrap()
        );
        assert!(db.has(shared_oid));
    }
}

#[test]
fn concurrent_readers_and_writer_memory_backend() {
    let db = Arc::new(ObjectDatabase::in_memory());

    // Seed one object readers can always find.
    let mut inserter = db.new_inserter();
    let seeded = inserter.insert(ObjectType::Blob, b"seed").unwrap();
    inserter.flush().unwrap();

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 0..50 {
                let mut inserter = db.new_inserter();
                inserter
                    .insert(ObjectType::Blob, format!("gen-{i}").as_bytes())
                    .unwrap();
                inserter.flush().unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..200 {
                    // Readers always see fully published objects.
                    let bytes = db
                        .open_object(&seeded, None)
                        .unwrap()
                        .cached_bytes()
                        .unwrap();
                    assert_eq!(bytes, b"seed");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
}
