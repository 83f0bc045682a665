use super::*;
use crate::config::{BufferConfig, StorageConfig};
use tempfile::TempDir;

fn small_buffer_config() -> StorageConfig {
    StorageConfig {
        buffer: BufferConfig {
            initial_size: 64 * 4096,
            memory_usage_fraction: 0.25,
        },
        ..StorageConfig::default()
    }
}

fn open_engine(dir: &TempDir) -> StorageEngine {
    StorageEngine::open(dir.path(), small_buffer_config()).unwrap()
}

fn fields(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn user_schema() -> Vec<String> {
    fields(&["id INTEGER", "name TEXT"])
}

#[test]
fn test_create_insert_read() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let rid = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
    assert_eq!(rid, 0);
    assert_eq!(engine.read_record("t", rid).unwrap(), fields(&["1", "alice"]));
}

#[test]
fn test_create_duplicate_table() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    assert!(matches!(
        engine.create_table("t", &user_schema()),
        Err(EngineError::TableExists(_))
    ));
}

#[test]
fn test_invalid_table_name() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    assert!(matches!(
        engine.create_table("a/b", &user_schema()),
        Err(EngineError::InvalidTableName(_))
    ));
    assert!(matches!(
        engine.create_table("", &user_schema()),
        Err(EngineError::InvalidTableName(_))
    ));
}

#[test]
fn test_get_table_schema() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    assert_eq!(engine.get_table_schema("t").unwrap(), user_schema());
    assert!(matches!(
        engine.get_table_schema("missing"),
        Err(EngineError::TableNotFound(_))
    ));
}

#[test]
fn test_update_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let rid = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();

    let new_rid = engine
        .update_record(None, "t", rid, &fields(&["1", "bobby"]))
        .unwrap();
    assert_eq!(new_rid, rid);
    assert_eq!(engine.read_record("t", rid).unwrap(), fields(&["1", "bobby"]));
}

#[test]
fn test_update_grow() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let rid = engine.insert_record(None, "t", &fields(&["1", "al"])).unwrap();

    let long_name = "a".repeat(500);
    let new_rid = engine
        .update_record(None, "t", rid, &fields(&["1", &long_name]))
        .unwrap();

    assert_eq!(
        engine.read_record("t", new_rid).unwrap(),
        fields(&["1", &long_name])
    );
    if new_rid != rid {
        assert!(matches!(
            engine.read_record("t", rid),
            Err(EngineError::RecordNotFound { .. })
        ));
    }
}

#[test]
fn test_delete_record() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let rid = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();

    engine.delete_record(None, "t", rid).unwrap();
    assert!(matches!(
        engine.read_record("t", rid),
        Err(EngineError::RecordNotFound { .. })
    ));
    assert!(matches!(
        engine.delete_record(None, "t", rid),
        Err(EngineError::RecordNotFound { .. })
    ));
}

#[test]
fn test_record_too_large() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let huge = "x".repeat(5000);
    assert!(matches!(
        engine.insert_record(None, "t", &fields(&["1", &huge])),
        Err(EngineError::RecordTooLarge)
    ));
}

#[test]
fn test_scan_table() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let r0 = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
    let r1 = engine.insert_record(None, "t", &fields(&["2", "bob"])).unwrap();
    let r2 = engine.insert_record(None, "t", &fields(&["3", "carol"])).unwrap();

    engine.delete_record(None, "t", r1).unwrap();

    let rows = engine.scan_table("t").unwrap();
    assert_eq!(
        rows,
        vec![
            (r0, fields(&["1", "alice"])),
            (r2, fields(&["3", "carol"])),
        ]
    );
}

#[test]
fn test_multi_page_inserts() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let filler = "f".repeat(120);

    let mut rids = Vec::new();
    for i in 0..200 {
        let rid = engine
            .insert_record(None, "t", &fields(&[&i.to_string(), &filler]))
            .unwrap();
        rids.push(rid);
    }

    let mut unique = rids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), rids.len());

    // Records span multiple pages: some record ids land past page 1
    assert!(rids.iter().any(|&rid| rid >= 512));

    for (i, rid) in rids.iter().enumerate() {
        let row = engine.read_record("t", *rid).unwrap();
        assert_eq!(row[0], i.to_string());
    }
    assert_eq!(engine.scan_table("t").unwrap().len(), 200);
}

#[test]
fn test_index_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let rid = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();

    engine.create_index("t", "1").unwrap();
    assert_eq!(engine.search_index("t", "1", "alice").unwrap(), vec![rid]);

    engine
        .update_record(None, "t", rid, &fields(&["1", "bob"]))
        .unwrap();
    assert!(engine.search_index("t", "1", "alice").unwrap().is_empty());
    assert_eq!(engine.search_index("t", "1", "bob").unwrap(), vec![rid]);

    // Column names resolve to the same index as positions
    assert_eq!(engine.search_index("t", "name", "bob").unwrap(), vec![rid]);
}

#[test]
fn test_index_tracks_insert_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    engine.create_index("t", "name").unwrap();

    let r0 = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
    let r1 = engine.insert_record(None, "t", &fields(&["2", "alice"])).unwrap();
    assert_eq!(engine.search_index("t", "name", "alice").unwrap(), vec![r0, r1]);

    engine.delete_record(None, "t", r0).unwrap();
    assert_eq!(engine.search_index("t", "name", "alice").unwrap(), vec![r1]);
}

#[test]
fn test_index_built_from_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    for (id, name) in [("1", "alice"), ("2", "bob"), ("3", "alice")] {
        engine.insert_record(None, "t", &fields(&[id, name])).unwrap();
    }

    engine.create_index("t", "name").unwrap();
    assert_eq!(engine.search_index("t", "name", "alice").unwrap(), vec![0, 2]);

    let stats = engine.index_stats("t", "name").unwrap();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.keys, 2);
}

#[test]
fn test_index_errors() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    assert!(matches!(
        engine.create_index("t", "salary"),
        Err(EngineError::Index(IndexError::ColumnNotFound { .. }))
    ));

    engine.create_index("t", "name").unwrap();
    assert!(matches!(
        engine.create_index("t", "1"),
        Err(EngineError::Index(IndexError::IndexExists { .. }))
    ));

    assert!(matches!(
        engine.search_index("t", "id", "7"),
        Err(EngineError::Index(IndexError::IndexMissing { .. }))
    ));
}

#[test]
fn test_merge_index_set_union() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let rid = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
    engine.create_index("t", "name").unwrap();

    engine
        .merge_index(
            "t",
            "name",
            vec![("alice".to_string(), vec![rid, 40]), ("zoe".to_string(), vec![41])],
        )
        .unwrap();

    assert_eq!(engine.search_index("t", "name", "alice").unwrap(), vec![rid, 40]);
    assert_eq!(engine.search_index("t", "name", "zoe").unwrap(), vec![41]);
}

#[test]
fn test_transaction_commit_and_visibility() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let txn = engine.begin_transaction().unwrap();
    assert_eq!(txn, 1);

    let rid = engine
        .insert_record(Some(txn), "t", &fields(&["1", "alice"]))
        .unwrap();
    engine.commit_transaction(txn).unwrap();

    assert_eq!(engine.read_record("t", rid).unwrap(), fields(&["1", "alice"]));
    assert!(matches!(
        engine.commit_transaction(txn),
        Err(EngineError::Txn(_))
    ));
}

#[test]
fn test_abort_reverses_operations() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let kept = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();

    let txn = engine.begin_transaction().unwrap();
    let inserted = engine
        .insert_record(Some(txn), "t", &fields(&["2", "bob"]))
        .unwrap();
    engine
        .update_record(Some(txn), "t", kept, &fields(&["1", "alicia"]))
        .unwrap();

    engine.abort_transaction(txn).unwrap();

    assert_eq!(engine.read_record("t", kept).unwrap(), fields(&["1", "alice"]));
    assert!(matches!(
        engine.read_record("t", inserted),
        Err(EngineError::RecordNotFound { .. })
    ));
}

#[test]
fn test_crash_recovery_uncommitted_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    let rid;
    {
        let engine = open_engine(&dir);
        engine.create_table("t", &user_schema()).unwrap();
        let txn = engine.begin_transaction().unwrap();
        rid = engine
            .insert_record(Some(txn), "t", &fields(&["1", "ghost"]))
            .unwrap();
        // No commit: dropping the engine flushes pages, recovery must
        // reverse the transaction on the next open
    }

    let engine = open_engine(&dir);
    assert!(matches!(
        engine.read_record("t", rid),
        Err(EngineError::RecordNotFound { .. })
    ));
}

#[test]
fn test_crash_recovery_committed_survives() {
    let dir = tempfile::tempdir().unwrap();
    let rid;
    {
        let engine = open_engine(&dir);
        engine.create_table("t", &user_schema()).unwrap();
        let txn = engine.begin_transaction().unwrap();
        rid = engine
            .insert_record(Some(txn), "t", &fields(&["1", "alice"]))
            .unwrap();
        engine.commit_transaction(txn).unwrap();
    }

    let engine = open_engine(&dir);
    assert_eq!(engine.read_record("t", rid).unwrap(), fields(&["1", "alice"]));
}

#[test]
fn test_hard_crash_redo_from_log() {
    let dir = tempfile::tempdir().unwrap();
    let rid;
    {
        let engine = open_engine(&dir);
        engine.create_table("t", &user_schema()).unwrap();
        rid = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
        // Simulate a hard crash: no flush, no drop. The dirty data page
        // never reaches disk; only the log has the insert.
        std::mem::forget(engine);
    }

    let engine = open_engine(&dir);
    assert_eq!(engine.read_record("t", rid).unwrap(), fields(&["1", "alice"]));
}

#[test]
fn test_hard_crash_uncommitted_not_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let rid;
    {
        let engine = open_engine(&dir);
        engine.create_table("t", &user_schema()).unwrap();
        let txn = engine.begin_transaction().unwrap();
        rid = engine
            .insert_record(Some(txn), "t", &fields(&["1", "ghost"]))
            .unwrap();
        std::mem::forget(engine);
    }

    let engine = open_engine(&dir);
    assert!(matches!(
        engine.read_record("t", rid),
        Err(EngineError::RecordNotFound { .. })
    ));
}

#[test]
fn test_recovery_replays_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let rid;
    {
        let engine = open_engine(&dir);
        engine.create_table("t", &user_schema()).unwrap();
        rid = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
        engine.delete_record(None, "t", rid).unwrap();
        std::mem::forget(engine);
    }

    let engine = open_engine(&dir);
    assert!(matches!(
        engine.read_record("t", rid),
        Err(EngineError::RecordNotFound { .. })
    ));
}

#[test]
fn test_eviction_durability_with_one_page_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        buffer: BufferConfig {
            initial_size: 4096,
            memory_usage_fraction: 0.25,
        },
        ..StorageConfig::default()
    };
    let engine = StorageEngine::open(dir.path(), config).unwrap();

    engine.create_table("t", &user_schema()).unwrap();
    let rid = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();

    // Touching the schema page evicts the dirty data page
    engine.get_table_schema("t").unwrap();

    assert_eq!(engine.read_record("t", rid).unwrap(), fields(&["1", "alice"]));
}

#[test]
fn test_table_discovery_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = open_engine(&dir);
        engine.create_table("users", &user_schema()).unwrap();
        engine
            .create_table("orders", &fields(&["id INTEGER", "total REAL"]))
            .unwrap();
    }

    let engine = open_engine(&dir);
    assert_eq!(engine.table_names(), vec!["orders", "users"]);
    assert_eq!(engine.get_table_schema("users").unwrap(), user_schema());
}

#[test]
fn test_delete_table() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
    engine.create_index("t", "name").unwrap();

    engine.delete_table("t").unwrap();
    assert!(matches!(
        engine.read_record("t", 0),
        Err(EngineError::TableNotFound(_))
    ));
    assert!(!dir.path().join("t.db").exists());

    // The name is free again
    engine.create_table("t", &user_schema()).unwrap();
}

#[test]
fn test_encryption_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let key = [11u8; 32];
    let config = StorageConfig {
        use_encryption: true,
        encryption_key: Some(key),
        ..small_buffer_config()
    };

    let rid;
    {
        let engine = StorageEngine::open(dir.path(), config.clone()).unwrap();
        engine.create_table("t", &user_schema()).unwrap();
        rid = engine.insert_record(None, "t", &fields(&["1", "secret"])).unwrap();
    }

    let engine = StorageEngine::open(dir.path(), config).unwrap();
    assert_eq!(engine.read_record("t", rid).unwrap(), fields(&["1", "secret"]));
}

#[test]
fn test_encryption_wrong_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        use_encryption: true,
        encryption_key: Some([11u8; 32]),
        ..small_buffer_config()
    };
    {
        let engine = StorageEngine::open(dir.path(), config.clone()).unwrap();
        engine.create_table("t", &user_schema()).unwrap();
        engine.insert_record(None, "t", &fields(&["1", "secret"])).unwrap();
    }

    let wrong = StorageConfig {
        encryption_key: Some([12u8; 32]),
        ..config
    };
    // Recovery replays the log against unreadable pages
    assert!(StorageEngine::open(dir.path(), wrong).is_err());
}

#[test]
fn test_encryption_requires_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        use_encryption: true,
        encryption_key: None,
        ..StorageConfig::default()
    };
    assert!(matches!(
        StorageEngine::open(dir.path(), config),
        Err(EngineError::MissingEncryptionKey)
    ));
}

#[test]
fn test_compression_toggle() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let r0 = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
    engine.flush().unwrap();

    engine.set_compression(false);
    let r1 = engine.insert_record(None, "t", &fields(&["2", "bob"])).unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.read_record("t", r0).unwrap(), fields(&["1", "alice"]));
    assert_eq!(engine.read_record("t", r1).unwrap(), fields(&["2", "bob"]));
}

#[test]
fn test_resize_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    for i in 0..50 {
        engine
            .insert_record(None, "t", &fields(&[&i.to_string(), "row"]))
            .unwrap();
    }

    engine.resize_buffer(2 * 4096).unwrap();
    assert!(engine.buffer_size() <= 2 * 4096);
    assert_eq!(engine.scan_table("t").unwrap().len(), 50);
}

#[test]
fn test_fields_with_newlines_survive() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let tricky = fields(&["1", "first line\nsecond line"]);
    let rid = engine.insert_record(None, "t", &tricky).unwrap();
    assert_eq!(engine.read_record("t", rid).unwrap(), tricky);
}

#[test]
fn test_deleted_slot_reused_for_next_insert() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);

    engine.create_table("t", &user_schema()).unwrap();
    let r0 = engine.insert_record(None, "t", &fields(&["1", "alice"])).unwrap();
    let r1 = engine.insert_record(None, "t", &fields(&["2", "bob"])).unwrap();

    engine.delete_record(None, "t", r0).unwrap();
    let r2 = engine.insert_record(None, "t", &fields(&["3", "carol"])).unwrap();

    assert_eq!(r2, r0);
    assert_eq!(engine.read_record("t", r1).unwrap(), fields(&["2", "bob"]));
    assert_eq!(engine.read_record("t", r2).unwrap(), fields(&["3", "carol"]));
}
