use logdb::{
    merkle_tree_leaf, AppendOutcome, Database, DbError, FileDatabase, InMemoryDatabase, LeafEntry,
    LogLookup, LogSigner, LookupHandle, LookupOutcome, SqliteDatabase, ENTRY_TYPE_X509,
};
use merkle::{verify_consistency, verify_inclusion, DenseMerkleTree, TreeHasher};
use std::collections::HashMap;

fn make_entry(signer: &LogSigner, timestamp_ms: u64, cert: &[u8]) -> LeafEntry {
    let sct = signer.sign_sct(timestamp_ms, ENTRY_TYPE_X509, cert, b"");
    LeafEntry {
        leaf_input: merkle_tree_leaf(timestamp_ms, ENTRY_TYPE_X509, cert, b""),
        extra_data: Vec::new(),
        sct,
        sequence_number: None,
    }
}

/// The same property run over every backend: queue, dedupe, sequence, scan.
fn exercise_backend(db: &dyn Database) {
    let hasher = TreeHasher::new();
    let signer = LogSigner::generate();

    // Queue three distinct entries.
    let entries: Vec<LeafEntry> =
        (0..3).map(|i| make_entry(&signer, 100 + i, format!("cert-{i}").as_bytes())).collect();
    for entry in &entries {
        assert!(matches!(db.append(entry.clone()).unwrap(), AppendOutcome::Queued));
    }

    // Requeueing the same certificate returns the original SCT even when the
    // resubmission carries a fresh timestamp.
    let resubmission = make_entry(&signer, 999, b"cert-0");
    match db.append(resubmission).unwrap() {
        AppendOutcome::Duplicate(stored) => assert_eq!(stored.sct, entries[0].sct),
        other => panic!("expected duplicate, got {other:?}"),
    }

    // Nothing is sequenced yet.
    assert_eq!(db.tree_size(), 0);
    let pending = db.pending_entries();
    assert_eq!(pending.len(), 3);
    let first_hash = pending[0].merkle_leaf_hash(&hasher);
    assert!(matches!(db.lookup_by_hash(&first_hash), LookupOutcome::Pending(_)));

    // Sequence in queue order.
    for (seq, entry) in pending.iter().enumerate() {
        db.assign_sequence_number(&entry.merkle_leaf_hash(&hasher), seq as u64).unwrap();
    }
    assert_eq!(db.tree_size(), 3);
    assert!(db.pending_entries().is_empty());
    assert!(matches!(db.lookup_by_hash(&first_hash), LookupOutcome::Found(_)));
    assert!(matches!(db.lookup_by_hash(&[0u8; 32]), LookupOutcome::NotFound));

    // Scans come back in contiguous sequence order.
    let scanned: Vec<LeafEntry> = db.scan_entries(0).collect();
    assert_eq!(scanned.len(), 3);
    for (i, entry) in scanned.iter().enumerate() {
        assert_eq!(entry.sequence_number, Some(i as u64));
    }
    let tail: Vec<LeafEntry> = db.scan_entries(2).collect();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].sequence_number, Some(2));
    assert!(db.scan_entries(3).next().is_none());
}

#[test]
fn in_memory_backend_properties() {
    let db = InMemoryDatabase::new(TreeHasher::new());
    exercise_backend(&db);
}

#[test]
fn file_backend_properties() {
    let dir = tempfile::tempdir().unwrap();
    let db = FileDatabase::open(TreeHasher::new(), dir.path().join("log.json")).unwrap();
    exercise_backend(&db);
}

#[test]
fn sqlite_backend_properties() {
    let dir = tempfile::tempdir().unwrap();
    let db = SqliteDatabase::open(TreeHasher::new(), dir.path().join("log.sqlite3")).unwrap();
    exercise_backend(&db);
}

#[test]
fn file_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.json");
    let hasher = TreeHasher::new();
    let signer = LogSigner::generate();

    let queued = make_entry(&signer, 1, b"persisted-cert");
    let sequenced = make_entry(&signer, 2, b"sequenced-cert");
    {
        let db = FileDatabase::open(hasher.clone(), path.clone()).unwrap();
        db.append(sequenced.clone()).unwrap();
        db.append(queued.clone()).unwrap();
        db.assign_sequence_number(&sequenced.merkle_leaf_hash(&hasher), 0).unwrap();
    }

    let db = FileDatabase::open(hasher.clone(), path).unwrap();
    assert_eq!(db.tree_size(), 1);
    let pending = db.pending_entries();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sct, queued.sct);

    // Dedupe still holds across restart.
    match db.append(make_entry(&signer, 50, b"persisted-cert")).unwrap() {
        AppendOutcome::Duplicate(stored) => assert_eq!(stored.sct, queued.sct),
        other => panic!("expected duplicate, got {other:?}"),
    }
}

#[test]
fn sqlite_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.sqlite3");
    let hasher = TreeHasher::new();
    let signer = LogSigner::generate();

    let entry = make_entry(&signer, 7, b"sqlite-cert");
    {
        let db = SqliteDatabase::open(hasher.clone(), path.clone()).unwrap();
        db.append(entry.clone()).unwrap();
        db.assign_sequence_number(&entry.merkle_leaf_hash(&hasher), 0).unwrap();
    }

    let db = SqliteDatabase::open(hasher, path).unwrap();
    assert_eq!(db.tree_size(), 1);
    let scanned: Vec<LeafEntry> = db.scan_entries(0).collect();
    assert_eq!(scanned[0].sct, entry.sct);
}

#[test]
fn append_backpressure_surfaces_over_capacity() {
    let signer = LogSigner::generate();
    let db = InMemoryDatabase::with_max_pending(TreeHasher::new(), 2);
    db.append(make_entry(&signer, 1, b"a")).unwrap();
    db.append(make_entry(&signer, 2, b"b")).unwrap();
    match db.append(make_entry(&signer, 3, b"c")) {
        Err(DbError::OverCapacity) => {}
        other => panic!("expected over-capacity, got {other:?}"),
    }
    // Duplicates bypass the capacity gate.
    assert!(matches!(db.append(make_entry(&signer, 4, b"a")).unwrap(), AppendOutcome::Duplicate(_)));
}

#[test]
fn lookup_serves_proofs_against_its_pinned_sth() {
    let hasher = TreeHasher::new();
    let signer = LogSigner::generate();

    let mut tree = DenseMerkleTree::new(hasher.clone());
    let mut index = HashMap::new();
    let mut leaf_hashes = Vec::new();
    for i in 0..5u64 {
        let entry = make_entry(&signer, i, format!("lookup-{i}").as_bytes());
        let leaf_hash = entry.merkle_leaf_hash(&hasher);
        tree.add_leaf_hash(leaf_hash);
        index.insert(leaf_hash, i);
        leaf_hashes.push(leaf_hash);
    }
    let sth = signer.sign_tree_head(5, 1000, tree.root());
    let lookup = LogLookup::new(sth.clone(), tree, index);

    for (i, leaf_hash) in leaf_hashes.iter().enumerate() {
        let proof = lookup.audit_proof(leaf_hash, 5).unwrap();
        assert_eq!(proof.leaf_index, i as u64);
        assert!(verify_inclusion(&hasher, leaf_hash, i as u64, 5, &proof.path, &sth.root_hash));
    }

    // Unknown hash, and a hash sequenced past the requested size, both miss.
    assert!(lookup.audit_proof(&[9u8; 32], 5).is_err());
    assert!(lookup.audit_proof(&leaf_hashes[4], 4).is_err());

    let proof = lookup.consistency_proof(3, 5).unwrap();
    let old_root = {
        let mut small = DenseMerkleTree::new(hasher.clone());
        for h in &leaf_hashes[..3] {
            small.add_leaf_hash(*h);
        }
        small.root()
    };
    assert!(verify_consistency(&hasher, 3, 5, &proof, &old_root, &sth.root_hash));
}

#[test]
fn published_snapshots_advance_monotonically() {
    let hasher = TreeHasher::new();
    let signer = LogSigner::generate();

    let sth0 = signer.sign_tree_head(0, 10, hasher.empty_root());
    let handle = LookupHandle::new(LogLookup::empty(hasher.clone(), sth0));
    assert_eq!(handle.snapshot().sth().tree_size, 0);

    let mut tree = DenseMerkleTree::new(hasher.clone());
    tree.add_leaf_hash(hasher.hash_leaf(b"entry"));
    let mut index = HashMap::new();
    index.insert(hasher.hash_leaf(b"entry"), 0u64);
    let sth1 = signer.sign_tree_head(1, 20, tree.root());

    // A reader holding the old snapshot keeps serving it after the publish.
    let pinned = handle.snapshot();
    handle.publish(LogLookup::new(sth1, tree, index));
    assert_eq!(pinned.sth().tree_size, 0);
    assert_eq!(handle.snapshot().sth().tree_size, 1);
    assert!(handle.snapshot().sth().timestamp_ms >= pinned.sth().timestamp_ms);
}
