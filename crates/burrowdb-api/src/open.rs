// Open and recovery: classify collection files, load the newest usable
// key-value-index snapshot, replay the log chain forward, and decide the
// writer's resume position.

use crate::db::{DbInner, DbState, LiveRegistry, RootSnapshot};
use crate::options::KeyValueDBOptions;
use burrowdb_core::{Error, FileId, Result};
use burrowdb_snapshot::read_kvi;
use burrowdb_storage::{BTree, CompactionStats, ValueStore};
use burrowdb_wal::{
    ChainFile, CommittedTransaction, FileCollection, FileHeader, FileKind, LogOp, LogReplayer,
    LogWriter,
};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};

/// A collection file with its decoded header.
pub(crate) struct ScannedFile {
    pub file_id: FileId,
    pub kind: FileKind,
    pub header: FileHeader,
    pub header_size: u64,
    pub size: u64,
}

/// Read every file's kind tag and header. Unreadable files come back as
/// `Unknown` and are ignored by the engine.
pub(crate) fn scan_files(files: &Arc<dyn FileCollection>) -> Vec<ScannedFile> {
    let mut scanned = Vec::new();
    for file_id in files.enumerate() {
        let Some(file) = files.get_file(file_id) else {
            continue;
        };
        match burrowdb_wal::read_header(file.as_ref()) {
            Ok((kind, header, header_size)) => scanned.push(ScannedFile {
                file_id,
                kind,
                header,
                header_size,
                size: file.size(),
            }),
            Err(e) => {
                tracing::warn!(file_id, error = %e, "unreadable file header");
                scanned.push(ScannedFile {
                    file_id,
                    kind: FileKind::Unknown,
                    header: FileHeader {
                        file_id,
                        generation: 0,
                        previous_log_file: None,
                    },
                    header_size: 0,
                    size: file.size(),
                });
            }
        }
    }
    scanned
}

struct ChainBuild {
    chain: Vec<ChainFile>,
    /// A file the chain needs is missing from the collection
    broken: bool,
}

/// Order the log files into a replayable chain starting at `start`
/// (a KVI's replay position) or at the oldest log file.
fn build_chain(logs: &[&ScannedFile], start: Option<(FileId, u64)>) -> ChainBuild {
    let mut chain = Vec::new();
    let mut broken = false;

    // Ids are monotonic and files are created in chain order, so walking
    // ascending ids and validating continuation pointers is enough.
    let mut expect_previous: Option<FileId> = None;
    let mut started = start.is_none();

    match start {
        Some((start_id, start_offset)) => {
            if let Some(first) = logs.iter().find(|l| l.file_id == start_id) {
                chain.push(ChainFile {
                    file_id: start_id,
                    start_offset: start_offset.max(first.header_size),
                });
                expect_previous = Some(start_id);
                started = true;
            } else if logs.iter().any(|l| l.file_id > start_id) {
                // The snapshot's continuation file is gone but later logs
                // exist; the chain is not walkable
                broken = true;
            }
            // No logs at or after the start position at all: the snapshot
            // is simply the latest state
        }
        None => {
            if let Some(first) = logs.first() {
                if first.header.previous_log_file.is_some() {
                    // The oldest surviving file says an earlier one existed
                    broken = true;
                }
            }
        }
    }

    for log in logs {
        if let Some((start_id, _)) = start {
            if log.file_id <= start_id {
                continue;
            }
        }
        if started && expect_previous.is_some() && log.header.previous_log_file != expect_previous
        {
            broken = true;
            break;
        }
        chain.push(ChainFile {
            file_id: log.file_id,
            start_offset: log.header_size,
        });
        expect_previous = Some(log.file_id);
        started = true;
    }

    ChainBuild { chain, broken }
}

/// What the first post-open write must discard when the database was
/// opened at an earlier commit counter.
pub(crate) struct PendingTruncate {
    /// Truncate this log file to this offset and drop every later log file
    pub boundary: Option<(FileId, u64)>,
    /// Generation the database was opened at; newer snapshots are stale
    pub generation: u64,
}

/// Apply a deferred rollback-window truncation: everything after the
/// opened commit is permanently discarded.
pub(crate) fn discard_later_history(db: &DbInner, t: PendingTruncate) -> Result<()> {
    let scanned = scan_files(&db.files);

    if let Some((boundary_file, boundary_offset)) = t.boundary {
        for f in &scanned {
            if f.kind == FileKind::TransactionLog && f.file_id > boundary_file {
                db.logger.file_marked_for_delete(f.file_id);
                let _ = db.files.remove(f.file_id);
            }
        }
        if let Some(file) = db.files.get_file(boundary_file) {
            if file.size() > boundary_offset {
                file.set_size(boundary_offset)?;
            }
        }
        db.log
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .resume(boundary_file, boundary_offset)?;
    } else {
        // Nothing replayed: any log content is later history
        for f in &scanned {
            if f.kind == FileKind::TransactionLog {
                db.logger.file_marked_for_delete(f.file_id);
                let _ = db.files.remove(f.file_id);
            }
        }
    }

    // Snapshots taken beyond the opened generation are stale too
    for f in &scanned {
        if f.kind == FileKind::KeyValueIndex && f.header.generation > t.generation {
            db.logger.file_marked_for_delete(f.file_id);
            let _ = db.files.remove(f.file_id);
        }
    }

    tracing::info!(
        generation = t.generation,
        "discarded history beyond the opened commit"
    );
    Ok(())
}

fn apply_committed(tree: &mut BTree, txn: &CommittedTransaction) {
    for op in &txn.ops {
        match op {
            LogOp::CreateOrUpdate { key, value } => {
                tree.insert(key, value.clone());
            }
            LogOp::EraseOne { key } => {
                if let (burrowdb_core::FindResult::Exact, rank) = tree.find(key) {
                    tree.erase_at(rank);
                }
            }
            LogOp::EraseRange {
                first_key,
                last_key,
            } => {
                let from = tree.lower_bound(first_key);
                let (result, rank) = tree.find(last_key);
                let to = match result {
                    burrowdb_core::FindResult::Exact
                    | burrowdb_core::FindResult::Previous => rank,
                    _ => continue,
                };
                if from <= to {
                    tree.erase_range(from, to);
                }
            }
            // Register writes are authoritative in the commit record
            LogOp::SetUlong { .. } | LogOp::SetCommitUlong { .. } => {}
            LogOp::Commit { .. } | LogOp::Rollback => {}
        }
    }
}

pub(crate) fn open(options: KeyValueDBOptions) -> Result<Arc<DbInner>> {
    let files = options.file_collection;
    let logger = options.logger;
    let scanned = scan_files(&files);

    let mut logs: Vec<&ScannedFile> = scanned
        .iter()
        .filter(|f| f.kind == FileKind::TransactionLog)
        .collect();
    logs.sort_by_key(|f| f.file_id);

    let mut kvis: Vec<&ScannedFile> = scanned
        .iter()
        .filter(|f| f.kind == FileKind::KeyValueIndex)
        .collect();
    kvis.sort_by_key(|f| std::cmp::Reverse(f.header.generation));

    // Newest snapshot not beyond the requested rollback point
    let mut base = RootSnapshot::empty();
    let mut replay_start: Option<(FileId, u64)> = None;
    let mut last_kvi: Option<(FileId, u64)> = None;
    let mut kvi_chosen = false;
    for kvi in &kvis {
        let Some(file) = files.get_file(kvi.file_id) else {
            continue;
        };
        match read_kvi(&file) {
            Ok(loaded) => {
                if let Some(limit) = options.open_up_to_commit_ulong {
                    if loaded.header.commit_ulong > limit {
                        continue;
                    }
                }
                replay_start = loaded.header.replay_position;
                last_kvi = loaded.header.replay_position;
                base = RootSnapshot {
                    tree: loaded.tree,
                    generation: loaded.header.generation,
                    commit_ulong: loaded.header.commit_ulong,
                    ulongs: loaded.header.ulongs,
                    log_position: loaded.header.replay_position,
                };
                kvi_chosen = true;
                break;
            }
            Err(e) => {
                logger.log_warning(&format!(
                    "Skipping invalid key-value index file {}: {}",
                    kvi.file_id, e
                ));
            }
        }
    }

    let mut build = build_chain(&logs, replay_start);

    // Rollback point older than anything retained: open at the earliest
    // retained snapshot instead of failing (replay stops before the first
    // commit beyond the requested point anyway)
    if build.broken && !kvi_chosen && options.open_up_to_commit_ulong.is_some() {
        for kvi in kvis.iter().rev() {
            let Some(file) = files.get_file(kvi.file_id) else {
                continue;
            };
            if let Ok(loaded) = read_kvi(&file) {
                logger.log_warning(&format!(
                    "Requested commit predates retained history; opening at commit {}",
                    loaded.header.commit_ulong
                ));
                replay_start = loaded.header.replay_position;
                last_kvi = loaded.header.replay_position;
                base = RootSnapshot {
                    tree: loaded.tree,
                    generation: loaded.header.generation,
                    commit_ulong: loaded.header.commit_ulong,
                    ulongs: loaded.header.ulongs,
                    log_position: loaded.header.replay_position,
                };
                build = build_chain(&logs, replay_start);
                break;
            }
        }
    }
    if build.broken {
        if options.lenient_open {
            logger.log_warning(
                "Transaction log chain is missing files; recovering the reachable suffix",
            );
            // Re-anchor on the oldest file that still chains to the newest
            let mut suffix_start = logs.len().saturating_sub(1);
            while suffix_start > 0 {
                let prev = logs[suffix_start].header.previous_log_file;
                if prev == Some(logs[suffix_start - 1].file_id) {
                    suffix_start -= 1;
                } else {
                    break;
                }
            }
            build = ChainBuild {
                chain: logs[suffix_start..]
                    .iter()
                    // Never replay files the snapshot already covers
                    .filter(|l| replay_start.map_or(true, |(sid, _)| l.file_id >= sid))
                    .map(|l| ChainFile {
                        file_id: l.file_id,
                        start_offset: l.header_size,
                    })
                    .collect(),
                broken: false,
            };
        } else {
            logger.log_warning(
                "Transaction log chain is missing files; opening an empty database",
            );
            for f in &scanned {
                if matches!(
                    f.kind,
                    FileKind::TransactionLog | FileKind::KeyValueIndex | FileKind::PureValue
                ) {
                    logger.file_marked_for_delete(f.file_id);
                    let _ = files.remove(f.file_id);
                }
            }
            base = RootSnapshot::empty();
            replay_start = None;
            last_kvi = None;
            build = ChainBuild {
                chain: Vec::new(),
                broken: false,
            };
        }
    }

    // Replay committed transactions onto the snapshot
    let mut tree = base.tree;
    let mut generation = base.generation;
    let mut commit_ulong = base.commit_ulong;
    let mut ulongs = base.ulongs;

    let replayer = LogReplayer::new(Arc::clone(&files))
        .stop_after_commit_ulong(options.open_up_to_commit_ulong);
    let outcome = replayer.replay(&build.chain, |txn| {
        apply_committed(&mut tree, &txn);
        generation = txn.generation;
        commit_ulong = txn.commit_ulong;
        ulongs = txn.ulongs;
        Ok(())
    })?;

    if outcome.truncated_tail {
        logger.log_warning("Dropped an incompletely written trailing transaction");
    }
    let mut replay_start = replay_start;
    if outcome.stopped_mid_chain {
        if options.lenient_open {
            logger.log_warning(
                "Transaction log corrupted mid-chain; later content is unreachable",
            );
        } else {
            // Fail-safe over silent partial data
            logger.log_warning(
                "Transaction log corrupted mid-chain; opening an empty database",
            );
            for f in &scanned {
                if matches!(
                    f.kind,
                    FileKind::TransactionLog | FileKind::KeyValueIndex | FileKind::PureValue
                ) {
                    logger.file_marked_for_delete(f.file_id);
                    let _ = files.remove(f.file_id);
                }
            }
            tree = BTree::new();
            generation = 0;
            commit_ulong = 0;
            ulongs = Vec::new();
            replay_start = None;
            last_kvi = None;
        }
    }

    let log_position = if outcome.stopped_mid_chain && !options.lenient_open {
        None
    } else {
        outcome.boundary.or(replay_start)
    };
    let current = RootSnapshot {
        tree,
        generation,
        commit_ulong,
        ulongs,
        log_position,
    };

    let mut log_writer = LogWriter::new(
        Arc::clone(&files),
        Arc::clone(&logger),
        options.file_split_size,
    );
    let mut pending_truncate = None;

    if options.open_up_to_commit_ulong.is_some() {
        // History beyond the opened commit survives until the next commit
        pending_truncate = Some(PendingTruncate {
            boundary: log_position,
            generation,
        });
    } else if let Some((boundary_file, boundary_offset)) = log_position {
        // Drop torn/uncommitted bytes and resume appending at the tail
        for log in &logs {
            if log.file_id > boundary_file {
                logger.file_marked_for_delete(log.file_id);
                let _ = files.remove(log.file_id);
            }
        }
        if let Some(file) = files.get_file(boundary_file) {
            if file.size() > boundary_offset {
                file.set_size(boundary_offset)?;
            }
            log_writer.resume(boundary_file, boundary_offset)?;
        }
    }

    tracing::info!(
        generation,
        commit_ulong,
        keys = current.tree.len(),
        "database opened"
    );

    let values = ValueStore::new(
        Arc::clone(&files),
        Arc::clone(&options.compression),
        options.file_split_size,
    );

    Ok(Arc::new(DbInner {
        files,
        compression: options.compression,
        logger,
        state: Mutex::new(DbState {
            current,
            writer_active: false,
            write_queue: VecDeque::new(),
            granted_ticket: None,
            next_ticket: 0,
            pending_truncate,
            pending_deletes: Vec::new(),
            last_kvi,
            preserve_history_up_to_commit_ulong: options.preserve_history_up_to_commit_ulong,
        }),
        writer_cv: Condvar::new(),
        log: Mutex::new(log_writer),
        values: Mutex::new(values),
        live: Mutex::new(LiveRegistry::default()),
        compaction_stats: Mutex::new(CompactionStats::default()),
        file_split_size: options.file_split_size,
        compactor_write_bytes_per_second_limit: options.compactor_write_bytes_per_second_limit,
        compactor_ram_limit_in_mb: options.compactor_ram_limit_in_mb,
        scheduler: options.compactor_scheduler,
        weak_self: Mutex::new(Weak::new()),
        compacting: std::sync::atomic::AtomicBool::new(false),
    }))
}
