// Durability, recovery, rollback-window and compaction behavior.

mod common;

use burrowdb::{
    CancellationToken, CollectionFile, FileCollection, FindResult, ImmediateScheduler,
    InMemoryFileCollection, KeyValueDB, KeyValueDBOptions, OnDiskFileCollection,
};
use common::CountingLogger;
use std::sync::Arc;
use tempfile::TempDir;

fn options_on(fc: &Arc<InMemoryFileCollection>) -> KeyValueDBOptions {
    KeyValueDBOptions::in_memory().with_file_collection(Arc::clone(fc) as _)
}

#[test]
fn test_durability_across_reopen_on_disk() {
    let dir = TempDir::new().expect("Failed to create temp dir");

    {
        let fc = Arc::new(OnDiskFileCollection::open(dir.path()).unwrap());
        let db = KeyValueDB::open(
            KeyValueDBOptions::default().with_file_collection(fc as _),
        )
        .unwrap();
        let mut tx = db.start_transaction().unwrap();
        tx.create_or_update_key_value(b"key1", b"value1").unwrap();
        tx.create_or_update_key_value(b"key2", &vec![9u8; 10_000]).unwrap();
        tx.set_commit_ulong(1).unwrap();
        tx.commit().unwrap();
    }

    let fc = Arc::new(OnDiskFileCollection::open(dir.path()).unwrap());
    let db = KeyValueDB::open(
        KeyValueDBOptions::default().with_file_collection(fc as _),
    )
    .unwrap();
    let mut read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 2);
    assert_eq!(read.find(b"key1"), FindResult::Exact);
    assert_eq!(read.get_value().unwrap(), b"value1");
    assert_eq!(read.find(b"key2"), FindResult::Exact);
    assert_eq!(read.get_value().unwrap(), vec![9u8; 10_000]);
    assert_eq!(read.get_commit_ulong(), 1);
}

#[test]
fn test_atomicity_uncommitted_lost_on_reopen() {
    let fc = Arc::new(InMemoryFileCollection::new());

    {
        let db = KeyValueDB::open(options_on(&fc)).unwrap();
        let mut tx = db.start_transaction().unwrap();
        tx.create_or_update_key_value(b"committed", b"1").unwrap();
        tx.commit().unwrap();

        let mut tx = db.start_transaction().unwrap();
        tx.create_or_update_key_value(b"uncommitted", b"2").unwrap();
        // Dropped without commit; engine dropped right after
    }

    let db = KeyValueDB::open(options_on(&fc)).unwrap();
    let mut read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 1);
    assert_eq!(read.find(b"committed"), FindResult::Exact);
}

#[test]
fn test_torn_log_tail_dropped_on_reopen() {
    let fc = Arc::new(InMemoryFileCollection::new());

    {
        let db = KeyValueDB::open(options_on(&fc)).unwrap();
        let mut tx = db.start_transaction().unwrap();
        tx.create_or_update_key_value(b"safe", b"1").unwrap();
        tx.commit().unwrap();
    }

    // Simulate a torn write at the end of the newest file
    let newest = *fc.enumerate().last().unwrap();
    fc.get_file(newest)
        .unwrap()
        .append(&[0xDE, 0xAD, 0xBE])
        .unwrap();

    let logger = Arc::new(CountingLogger::default());
    let db = KeyValueDB::open(
        options_on(&fc).with_logger(Arc::clone(&logger) as _),
    )
    .unwrap();
    let mut read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 1);
    assert_eq!(read.find(b"safe"), FindResult::Exact);

    // The engine keeps working after the truncation
    drop(read);
    let mut tx = db.start_transaction().unwrap();
    tx.create_or_update_key_value(b"after", b"2").unwrap();
    tx.commit().unwrap();
}

#[test]
fn test_log_splitting_and_replay() {
    let fc = Arc::new(InMemoryFileCollection::new());

    {
        let db = KeyValueDB::open(options_on(&fc).with_file_split_size(512)).unwrap();
        for i in 0..50 {
            let mut tx = db.start_transaction().unwrap();
            tx.create_or_update_key_value(format!("key{:03}", i).as_bytes(), b"value")
                .unwrap();
            tx.commit().unwrap();
        }
        assert!(fc.enumerate().len() > 1, "split size must have rotated");
    }

    let db = KeyValueDB::open(options_on(&fc).with_file_split_size(512)).unwrap();
    let read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 50);
}

#[test]
fn test_missing_chain_file_strict_opens_empty() {
    let fc = Arc::new(InMemoryFileCollection::new());

    {
        let db = KeyValueDB::open(options_on(&fc).with_file_split_size(256)).unwrap();
        for i in 0..20 {
            let mut tx = db.start_transaction().unwrap();
            tx.create_or_update_key_value(format!("key{:02}", i).as_bytes(), b"v")
                .unwrap();
            tx.commit().unwrap();
        }
    }
    assert!(fc.enumerate().len() > 2);

    // Lose the oldest log file
    let oldest = fc.enumerate()[0];
    fc.remove(oldest).unwrap();

    let logger = Arc::new(CountingLogger::default());
    let db = KeyValueDB::open(
        options_on(&fc)
            .with_file_split_size(256)
            .with_logger(Arc::clone(&logger) as _),
    )
    .unwrap();

    // Fail-safe: empty database, loss reported
    let read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 0);
    assert!(logger.warning_count() >= 1);

    // And it stays usable
    drop(read);
    let mut tx = db.start_transaction().unwrap();
    tx.create_or_update_key_value(b"fresh", b"start").unwrap();
    tx.commit().unwrap();
}

#[test]
fn test_missing_chain_file_lenient_recovers_suffix() {
    let fc = Arc::new(InMemoryFileCollection::new());

    {
        let db = KeyValueDB::open(options_on(&fc).with_file_split_size(256)).unwrap();
        for i in 0..20 {
            let mut tx = db.start_transaction().unwrap();
            tx.create_or_update_key_value(format!("key{:02}", i).as_bytes(), b"v")
                .unwrap();
            tx.commit().unwrap();
        }
    }

    let oldest = fc.enumerate()[0];
    fc.remove(oldest).unwrap();

    let logger = Arc::new(CountingLogger::default());
    let db = KeyValueDB::open(
        options_on(&fc)
            .with_file_split_size(256)
            .with_lenient_open(true)
            .with_logger(Arc::clone(&logger) as _),
    )
    .unwrap();

    let read = db.start_read_only_transaction().unwrap();
    let count = read.get_key_value_count();
    assert!(count > 0, "the reachable suffix must be recovered");
    assert!(count < 20, "the lost prefix must be reported, not invented");
    assert!(logger.warning_count() >= 1);
}

#[test]
fn test_rollback_window_reopen_at_commit() {
    let fc = Arc::new(InMemoryFileCollection::new());

    {
        let db = KeyValueDB::open(options_on(&fc)).unwrap();
        for i in 1..=10u64 {
            let mut tx = db.start_transaction().unwrap();
            tx.create_or_update_key_value(format!("key{:02}", i).as_bytes(), b"v")
                .unwrap();
            tx.set_commit_ulong(i).unwrap();
            tx.commit().unwrap();
        }
    }

    // Point-in-time open at commit 5
    let db = KeyValueDB::open(options_on(&fc).with_open_up_to_commit_ulong(5)).unwrap();
    {
        let read = db.start_read_only_transaction().unwrap();
        assert_eq!(read.get_key_value_count(), 5);
        assert_eq!(read.get_commit_ulong(), 5);
    }

    // Committing from here permanently discards commits 6..=10
    let mut tx = db.start_transaction().unwrap();
    tx.create_or_update_key_value(b"replacement", b"x").unwrap();
    tx.set_commit_ulong(6).unwrap();
    tx.commit().unwrap();
    drop(db);

    let db = KeyValueDB::open(options_on(&fc)).unwrap();
    let mut read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 6);
    assert_eq!(read.get_commit_ulong(), 6);
    assert_eq!(read.find(b"replacement"), FindResult::Exact);
    assert_eq!(read.find(b"key06"), FindResult::Previous);
}

#[test]
fn test_rollback_window_without_write_preserves_history() {
    let fc = Arc::new(InMemoryFileCollection::new());

    {
        let db = KeyValueDB::open(options_on(&fc)).unwrap();
        for i in 1..=10u64 {
            let mut tx = db.start_transaction().unwrap();
            tx.create_or_update_key_value(format!("key{:02}", i).as_bytes(), b"v")
                .unwrap();
            tx.set_commit_ulong(i).unwrap();
            tx.commit().unwrap();
        }
    }

    // Read-only inspection of an old state
    {
        let db = KeyValueDB::open(options_on(&fc).with_open_up_to_commit_ulong(3)).unwrap();
        let read = db.start_read_only_transaction().unwrap();
        assert_eq!(read.get_key_value_count(), 3);
    }

    // Nothing was discarded: the full history reopens
    let db = KeyValueDB::open(options_on(&fc)).unwrap();
    let read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 10);
    assert_eq!(read.get_commit_ulong(), 10);
}

#[test]
fn test_preserve_history_and_rollback() {
    let fc = Arc::new(InMemoryFileCollection::new());

    {
        let db = KeyValueDB::open(options_on(&fc)).unwrap();
        for i in 1..=100u64 {
            let mut tx = db.start_transaction().unwrap();
            tx.create_or_update_key_value(format!("key{:03}", i).as_bytes(), b"v")
                .unwrap();
            tx.set_commit_ulong(i).unwrap();
            tx.commit().unwrap();
            if i == 50 {
                db.set_preserve_history_up_to_commit_ulong(Some(50));
            }
        }
        assert_eq!(db.preserve_history_up_to_commit_ulong(), Some(50));

        // Compaction must not reclaim anything the window still needs
        let token = CancellationToken::new();
        let _ = db.compact(&token).unwrap();
    }

    let db = KeyValueDB::open(options_on(&fc).with_open_up_to_commit_ulong(50)).unwrap();
    let read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 50);
    assert_eq!(read.get_commit_ulong(), 50);
}

#[test]
fn test_create_kvi_speeds_reopen() {
    let fc = Arc::new(InMemoryFileCollection::new());
    let logger = Arc::new(CountingLogger::default());

    {
        let db = KeyValueDB::open(
            options_on(&fc).with_logger(Arc::clone(&logger) as _),
        )
        .unwrap();
        let mut tx = db.start_transaction().unwrap();
        for i in 0..200 {
            tx.create_or_update_key_value(format!("key{:03}", i).as_bytes(), b"value")
                .unwrap();
        }
        tx.commit().unwrap();

        let token = CancellationToken::new();
        assert!(db.create_kvi(&token).unwrap());
        assert_eq!(logger.kvi_created.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    let db = KeyValueDB::open(options_on(&fc)).unwrap();
    let mut read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 200);
    assert_eq!(read.find(b"key150"), FindResult::Exact);
}

#[test]
fn test_compaction_scenario_erase_then_reclaim() {
    let fc = Arc::new(InMemoryFileCollection::new());
    let logger = Arc::new(CountingLogger::default());
    let db = KeyValueDB::open(
        options_on(&fc)
            .with_file_split_size(10_000)
            .with_logger(Arc::clone(&logger) as _),
    )
    .unwrap();

    // 2000 keys of 100 bytes with 2000-byte values
    {
        let mut tx = db.start_transaction().unwrap();
        for i in 0..2000u32 {
            let key = format!("{:0100}", i);
            tx.create_or_update_key_value(key.as_bytes(), &vec![i as u8; 2000])
                .unwrap();
        }
        tx.commit().unwrap();
    }

    // Erase every 2nd, then every 3rd of what remains
    {
        let mut tx = db.start_transaction().unwrap();
        let mut i = 1;
        while i < tx.get_key_value_count() {
            assert!(tx.set_key_index(i));
            tx.erase_current().unwrap();
            i += 1;
        }
        assert_eq!(tx.get_key_value_count(), 1000);

        let mut i = 2;
        while i < tx.get_key_value_count() {
            assert!(tx.set_key_index(i));
            tx.erase_current().unwrap();
            i += 2;
        }
        assert_eq!(tx.get_key_value_count(), 667);
        tx.commit().unwrap();
    }

    let files_before = fc.enumerate().len();
    let token = CancellationToken::new();

    // Converges: repeated passes stop reporting work
    let mut passes = 0;
    while db.compact(&token).unwrap() {
        passes += 1;
        assert!(passes < 10, "compaction must converge");
    }
    assert!(passes >= 1, "this much waste must trigger work");
    assert!(logger.marked_count() > 0, "superseded files must be marked");

    let files_after = fc.enumerate().len();
    assert!(
        files_after < files_before,
        "compaction must reclaim files ({} -> {})",
        files_before,
        files_after
    );

    // Content is unchanged and every surviving value still resolves
    let mut read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 667);
    assert!(read.find_first_key());
    loop {
        let key = read.get_key().unwrap();
        let i: u32 = String::from_utf8(key).unwrap().trim_start_matches('0').parse().unwrap_or(0);
        assert_eq!(read.get_value().unwrap(), vec![i as u8; 2000]);
        if !read.find_next_key() {
            break;
        }
    }
    drop(read);

    // Queryable content survives a reopen from the compacted files
    drop(db);
    let db = KeyValueDB::open(options_on(&fc).with_file_split_size(10_000)).unwrap();
    let read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 667);
}

#[test]
fn test_compaction_cancellation_leaves_consistent_state() {
    let fc = Arc::new(InMemoryFileCollection::new());
    let db = KeyValueDB::open(options_on(&fc).with_file_split_size(4096)).unwrap();

    {
        let mut tx = db.start_transaction().unwrap();
        for i in 0..50u32 {
            tx.create_or_update_key_value(format!("k{:03}", i).as_bytes(), &vec![1u8; 1000])
                .unwrap();
        }
        tx.commit().unwrap();
    }
    {
        let mut tx = db.start_transaction().unwrap();
        tx.erase_range(0, 39).unwrap();
        tx.commit().unwrap();
    }

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(!db.compact(&cancelled).unwrap());

    // State is untouched and a real pass still works afterwards
    {
        let read = db.start_read_only_transaction().unwrap();
        assert_eq!(read.get_key_value_count(), 10);
    }
    let token = CancellationToken::new();
    assert!(db.compact(&token).unwrap());
    let read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 10);
}

#[test]
fn test_long_lived_reader_delays_file_deletion() {
    let fc = Arc::new(InMemoryFileCollection::new());
    let logger = Arc::new(CountingLogger::default());
    let db = KeyValueDB::open(
        options_on(&fc)
            .with_file_split_size(4096)
            .with_logger(Arc::clone(&logger) as _),
    )
    .unwrap();

    {
        let mut tx = db.start_transaction().unwrap();
        for i in 0..20u32 {
            tx.create_or_update_key_value(format!("k{:02}", i).as_bytes(), &vec![2u8; 1000])
                .unwrap();
        }
        tx.commit().unwrap();
    }

    // Reader pinned to the pre-erase generation
    let old_reader = db.start_read_only_transaction().unwrap();

    {
        let mut tx = db.start_transaction().unwrap();
        tx.erase_all().unwrap();
        tx.commit().unwrap();
    }

    let token = CancellationToken::new();
    while db.compact(&token).unwrap() {}
    let marked = logger.marked_count();
    assert!(marked > 0);

    // Files the old reader can still reach were marked but not removed
    let files_with_reader = fc.enumerate().len();
    assert_eq!(old_reader.get_key_value_count(), 20);

    drop(old_reader);
    // Dropping the reader releases the floor; the next pass purges
    let _ = db.compact(&token).unwrap();
    assert!(fc.enumerate().len() <= files_with_reader);
}

#[test]
fn test_background_scheduler_smoke() {
    let fc = Arc::new(InMemoryFileCollection::new());
    let logger = Arc::new(CountingLogger::default());
    let db = KeyValueDB::open(
        options_on(&fc)
            .with_compactor_scheduler(Arc::new(ImmediateScheduler))
            .with_logger(Arc::clone(&logger) as _),
    )
    .unwrap();

    for i in 0..5 {
        let mut tx = db.start_transaction().unwrap();
        tx.create_or_update_key_value(format!("k{}", i).as_bytes(), b"v")
            .unwrap();
        tx.commit().unwrap();
    }

    let read = db.start_read_only_transaction().unwrap();
    assert_eq!(read.get_key_value_count(), 5);
    assert!(
        logger.kvi_created.load(std::sync::atomic::Ordering::SeqCst) >= 1,
        "the scheduler must have driven at least one snapshot"
    );
}
