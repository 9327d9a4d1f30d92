//! Failure propagation across the layers.

use std::sync::Arc;

use arbor_btree::BTree;
use arbor_common::config::ArborConfig;
use arbor_common::error::ArborError;
use arbor_common::types::Identifier;
use arbor_exec::Executor;
use arbor_index::{IndexSearcher, Predicate, Record};
use arbor_mvcc::{Repository, SessionMode};
use arbor_store::{MemoryStore, ObjectStore};
use arbor_test::faults::FailingStore;
use arbor_txn::OperationScheduler;
use bytes::Bytes;

struct Fixture {
    executor: Executor,
    store: FailingStore,
    scheduler: OperationScheduler,
}

fn fixture() -> Fixture {
    arbor_test::utils::init_tracing();
    let executor = Executor::new(4);
    let store = FailingStore::new(MemoryStore::new(executor.clone()));
    Fixture {
        scheduler: OperationScheduler::new(executor.clone()),
        executor,
        store,
    }
}

fn tree(f: &Fixture, path: &str) -> BTree<i64, i64> {
    let tree = BTree::create_instance(
        Arc::new(f.store.clone()),
        f.scheduler.clone(),
        Identifier::parse(path),
        4,
    )
    .wait(&f.executor)
    .unwrap();
    for k in 0..30 {
        tree.insert(k, -k).wait(&f.executor).unwrap();
    }
    tree
}

fn is_io(err: &ArborError) -> bool {
    matches!(err, ArborError::Io { .. })
}

#[test]
fn test_io_failure_reaches_tree_caller() {
    let f = fixture();
    let poisoned = tree(&f, "trees/a");
    let healthy = tree(&f, "trees/b");

    f.store.fail_within(&Identifier::parse("trees/a"));
    assert!(is_io(&poisoned.get(&3).wait(&f.executor).unwrap_err()));
    assert!(is_io(&poisoned.insert(99, 0).wait(&f.executor).unwrap_err()));
    assert!(f.store.injected() >= 2);

    // Another tree on the same store and scheduler keeps working.
    assert_eq!(healthy.get(&3).wait(&f.executor).unwrap(), Some(-3));
    healthy.insert(99, 0).wait(&f.executor).unwrap();

    f.store.heal();
    assert_eq!(poisoned.get(&3).wait(&f.executor).unwrap(), Some(-3));
    assert_eq!(poisoned.validate().wait(&f.executor).unwrap().entries, 30);
}

#[test]
fn test_corruption_stays_with_its_object() {
    let f = fixture();
    let broken = tree(&f, "trees/broken");
    let intact = tree(&f, "trees/intact");

    let root = Identifier::parse("trees/broken");
    for path in f.store.inner().paths_within(&root) {
        if path != root {
            f.store
                .inner()
                .store(&path, Bytes::from_static(b"\xff\x00garbage"))
                .wait(&f.executor)
                .unwrap();
        }
    }

    let err = broken.get(&1).wait(&f.executor).unwrap_err();
    assert!(matches!(err, ArborError::Corruption { .. }), "{err}");
    assert_eq!(intact.get(&1).wait(&f.executor).unwrap(), Some(-1));
    assert_eq!(intact.validate().wait(&f.executor).unwrap().entries, 30);
}

#[test]
fn test_search_reports_index_failures() {
    let f = fixture();
    let searcher = IndexSearcher::new(
        Arc::new(f.store.clone()),
        f.scheduler.clone(),
        Identifier::parse("indices"),
        4,
    );
    searcher.create_index("age").unwrap();
    searcher.create_index("city").unwrap();
    let records: Vec<Record> = (0..20)
        .map(|n| {
            Record::new(Identifier::parse(&format!("people/p{n:02}")))
                .with("age", n % 7)
                .with("city", if n % 2 == 0 { "oslo" } else { "lima" })
        })
        .collect();
    searcher.index(&records).unwrap();

    f.store.fail_within(&Identifier::parse("indices/age"));
    let err = searcher
        .fetch_identifiers(&Predicate::gt("age", 2))
        .and_then(|stream| stream.collect_all())
        .unwrap_err();
    assert!(is_io(&err), "{err}");
    let err = searcher.index(&records[..1]).unwrap_err();
    assert!(is_io(&err), "{err}");

    // A query touching only the other index is unaffected.
    let oslo = searcher
        .fetch_identifiers(&Predicate::eq("city", "oslo"))
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(oslo.len(), 10);
}

#[test]
fn test_session_open_fails_when_watermark_unwritable() {
    let f = fixture();
    let repo = Repository::open(
        Arc::new(f.store.clone()),
        f.executor.clone(),
        &ArborConfig::default(),
    )
    .unwrap();

    f.store.fail_within(&Identifier::parse("~commits"));
    let err = repo.begin_session(SessionMode::ReadWrite).unwrap_err();
    assert!(is_io(&err), "{err}");
    // Read-only sessions reserve nothing.
    repo.begin_session(SessionMode::ReadOnly).unwrap();

    f.store.heal();
    let s = repo.begin_session(SessionMode::ReadWrite).unwrap();
    s.store(&Identifier::parse("doc"), Bytes::from_static(b"ok"))
        .wait(&f.executor)
        .unwrap();
    s.commit().wait(&f.executor).unwrap();
    assert_eq!(repo.stats().commits(), 1);
}

#[test]
fn test_partial_tree_update_stays_inside_its_session() {
    let f = fixture();
    let repo = Repository::open(
        Arc::new(f.store.clone()),
        f.executor.clone(),
        &ArborConfig::default(),
    )
    .unwrap();
    let id = Identifier::parse("trees/t");

    let setup = Arc::new(repo.begin_session(SessionMode::ReadWrite).unwrap());
    let tree: BTree<i64, i64> =
        BTree::create_instance(setup.clone(), f.scheduler.clone(), id.clone(), 4)
            .wait(&f.executor)
            .unwrap();
    for k in 0..30 {
        tree.insert(k, -k).wait(&f.executor).unwrap();
    }
    setup.commit().wait(&f.executor).unwrap();

    let session = Arc::new(repo.begin_session(SessionMode::ReadWrite).unwrap());
    let tree: BTree<i64, i64> = BTree::open(session.clone(), f.scheduler.clone(), id.clone())
        .wait(&f.executor)
        .unwrap();

    // Failing before anything is written leaves the handle usable.
    f.store.fail_within_after(&id, 0);
    assert!(is_io(&tree.insert(100, 0).wait(&f.executor).unwrap_err()));
    f.store.heal();
    assert_eq!(tree.get(&1).wait(&f.executor).unwrap(), Some(-1));

    // The leaf lands, its parent does not.
    f.store.fail_within_after(&id, 1);
    assert!(is_io(&tree.insert(100, 0).wait(&f.executor).unwrap_err()));
    f.store.heal();
    let err = tree.get(&1).wait(&f.executor).unwrap_err();
    assert!(matches!(err, ArborError::InvalidState { .. }), "{err}");
    session.close().wait(&f.executor).unwrap();

    let reader = Arc::new(repo.begin_session(SessionMode::ReadOnly).unwrap());
    let tree: BTree<i64, i64> = BTree::open(reader, f.scheduler.clone(), id)
        .wait(&f.executor)
        .unwrap();
    assert_eq!(tree.validate().wait(&f.executor).unwrap().entries, 30);
    assert_eq!(tree.get(&100).wait(&f.executor).unwrap(), None);
}
