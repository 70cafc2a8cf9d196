// Compaction: measure waste, relocate live values out of wasteful
// pure-value files, snapshot the index, and mark superseded files for
// deletion once no live transaction can still reach them.
//
// Every step is cancellable in between, idempotent to repeat, and runs
// through ordinary transactions so readers and writers are never
// disturbed; a long-lived reader only delays physical file removal.

use crate::db::{DbInner, PendingDelete};
use crate::open::scan_files;
use crate::transaction::Transaction;
use burrowdb_core::{Error, FileId, Result, ValueRef};
use burrowdb_snapshot::{write_kvi, KviHeader};
use burrowdb_storage::{
    live_bytes_per_value_file, CancellationToken, RateLimiter,
};
use burrowdb_wal::FileKind;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Waste below this many bytes is not worth a compaction pass.
const WASTE_THRESHOLD: u64 = 4096;

struct CompactingGuard<'a>(&'a DbInner);

impl Drop for CompactingGuard<'_> {
    fn drop(&mut self) {
        self.0.compacting.store(false, Ordering::SeqCst);
    }
}

/// One compaction pass. Returns whether any work was done.
pub(crate) fn compact(db: &Arc<DbInner>, token: &CancellationToken) -> Result<bool> {
    if db.compacting.swap(true, Ordering::SeqCst) {
        // Another pass is already running
        return Ok(false);
    }
    let _guard = CompactingGuard(db);

    let preserve = {
        let state = db.state.lock().map_err(|_| Error::LockPoisoned)?;
        state.preserve_history_up_to_commit_ulong
    };
    let pending: HashSet<FileId> = {
        let state = db.state.lock().map_err(|_| Error::LockPoisoned)?;
        state.pending_deletes.iter().map(|p| p.file_id).collect()
    };

    let snapshot = db.snapshot();
    let scanned = scan_files(&db.files);
    let live = live_bytes_per_value_file(&snapshot.tree);
    let current_value_file = db
        .values
        .lock()
        .map_err(|_| Error::LockPoisoned)?
        .current_file_id();

    // Reclaimable waste per pure-value file; the retention window and the
    // file still being appended to are exempt
    let mut waste_by_file: HashMap<FileId, u64> = HashMap::new();
    let mut total_waste = 0u64;
    if preserve.is_none() {
        for f in &scanned {
            if f.kind != FileKind::PureValue
                || Some(f.file_id) == current_value_file
                || pending.contains(&f.file_id)
            {
                continue;
            }
            let live_bytes = live.get(&f.file_id).copied().unwrap_or(0);
            let waste = f.size.saturating_sub(f.header_size).saturating_sub(live_bytes);
            if waste > 0 {
                waste_by_file.insert(f.file_id, waste);
                total_waste += waste;
            }
        }
    }
    db.logger.compaction_start(total_waste);
    tracing::debug!(total_waste, "compaction pass starting");

    let mut relocated = 0u64;
    let mut bytes_read = 0u64;
    let mut bytes_written = 0u64;

    if total_waste >= WASTE_THRESHOLD && !token.is_cancelled() {
        let victims: HashSet<FileId> = waste_by_file.keys().copied().collect();
        let ram_limit = db.compactor_ram_limit_in_mb.max(1) * 1024 * 1024;
        let mut limiter = RateLimiter::new(db.compactor_write_bytes_per_second_limit);

        // Relocated blocks go to a fresh pure-value file
        db.values
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .close_current()?;

        let mut tx = Transaction::new(Arc::clone(db), false);
        let mut batch_bytes = 0u64;
        for (key, vref) in snapshot.tree.iter() {
            if token.is_cancelled() {
                break;
            }
            let ValueRef::External { file_id, .. } = vref else {
                continue;
            };
            if !victims.contains(file_id) {
                continue;
            }
            // Skip keys rewritten since the scan; their new block already
            // lives outside the victim files
            if tx.current_value_ref(key) != Some(vref.clone()) {
                continue;
            }

            let raw = db.resolve_value(vref)?;
            bytes_read += raw.len() as u64;
            match tx.create_or_update_key_value(key, &raw) {
                Ok(_) => {}
                Err(Error::WriteConflict) => {
                    // A real writer owns the token; retry on a later pass
                    tracing::debug!("compaction yielded to an active writer");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
            limiter.throttle(raw.len() as u64);
            bytes_written += raw.len() as u64;
            batch_bytes += raw.len() as u64;
            relocated += 1;

            if batch_bytes >= ram_limit {
                tx.commit()?;
                tx = Transaction::new(Arc::clone(db), false);
                batch_bytes = 0;
            }
        }
        tx.commit()?;

        if relocated > 0 {
            let values = db.values.lock().map_err(|_| Error::LockPoisoned)?;
            if let Some(new_file) = values.current_file_id() {
                let size = db.files.get_file(new_file).map(|f| f.size()).unwrap_or(0);
                db.logger.compaction_created_pure_value_file(new_file, size);
            }
        }
    }

    // A fresh snapshot is due when values moved or commits piled up since
    // the last one
    let kvi_due = {
        let state = db.state.lock().map_err(|_| Error::LockPoisoned)?;
        relocated > 0 || state.current.log_position != state.last_kvi
    };
    let mut kvi_written = false;
    if kvi_due && !token.is_cancelled() {
        let mut limiter = RateLimiter::new(db.compactor_write_bytes_per_second_limit);
        write_index_snapshot(db, Some(&mut limiter))?;
        kvi_written = true;
    }

    let marked = if kvi_written && preserve.is_none() {
        // Re-read: relocation switched the value store to a fresh file
        let current = db
            .values
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .current_file_id();
        mark_superseded(db, current)?
    } else {
        0
    };

    {
        let mut stats = db
            .compaction_stats
            .lock()
            .map_err(|_| Error::LockPoisoned)?;
        stats.bytes_read += bytes_read;
        stats.bytes_written += bytes_written;
        stats.values_relocated += relocated;
        stats.files_marked += marked;
        if relocated > 0 || kvi_written || marked > 0 {
            stats.compaction_count += 1;
        }
    }

    db.try_purge_files();
    Ok(relocated > 0 || kvi_written || marked > 0)
}

/// Write a key-value-index snapshot of the current root.
pub(crate) fn create_kvi(db: &Arc<DbInner>, token: &CancellationToken) -> Result<bool> {
    if token.is_cancelled() {
        return Ok(false);
    }
    let mut limiter = RateLimiter::new(db.compactor_write_bytes_per_second_limit);
    write_index_snapshot(db, Some(&mut limiter))?;

    let preserve = {
        let state = db.state.lock().map_err(|_| Error::LockPoisoned)?;
        state.preserve_history_up_to_commit_ulong
    };
    if preserve.is_none() {
        let current_value_file = db
            .values
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .current_file_id();
        mark_superseded(db, current_value_file)?;
    }
    db.try_purge_files();
    Ok(true)
}

fn write_index_snapshot(
    db: &Arc<DbInner>,
    limiter: Option<&mut RateLimiter>,
) -> Result<FileId> {
    let snap = db.snapshot();
    let header = KviHeader {
        generation: snap.generation,
        commit_ulong: snap.commit_ulong,
        ulongs: snap.ulongs.clone(),
        pair_count: snap.tree.len(),
        replay_position: snap.log_position,
    };
    let start = Instant::now();
    let (file_id, bytes) = write_kvi(&db.files, &snap.tree, &header, limiter)?;
    db.logger
        .key_value_index_created(file_id, header.pair_count, bytes, start.elapsed());

    let mut state = db.state.lock().map_err(|_| Error::LockPoisoned)?;
    state.last_kvi = snap.log_position;
    Ok(file_id)
}

/// Mark files wholly superseded by the newest snapshot: older snapshots,
/// log files before the snapshot's replay position, and pure-value files
/// no live root references. Physical deletion waits for readers.
fn mark_superseded(db: &Arc<DbInner>, current_value_file: Option<FileId>) -> Result<u64> {
    let snap = db.snapshot();
    let live = live_bytes_per_value_file(&snap.tree);
    let scanned = scan_files(&db.files);

    let mut state = db.state.lock().map_err(|_| Error::LockPoisoned)?;
    let covered_before = state.last_kvi;
    let pending: HashSet<FileId> = state.pending_deletes.iter().map(|p| p.file_id).collect();
    let newest_kvi = scanned
        .iter()
        .filter(|f| f.kind == FileKind::KeyValueIndex)
        .map(|f| f.file_id)
        .max();

    let mut marked = 0u64;
    for f in &scanned {
        if pending.contains(&f.file_id) {
            continue;
        }
        let superseded = match f.kind {
            FileKind::KeyValueIndex => Some(f.file_id) != newest_kvi,
            FileKind::TransactionLog => match covered_before {
                Some((pos_file, _)) => f.file_id < pos_file,
                None => false,
            },
            FileKind::PureValue => {
                Some(f.file_id) != current_value_file
                    && live.get(&f.file_id).copied().unwrap_or(0) == 0
            }
            FileKind::Unknown => false,
        };
        if superseded {
            db.logger.file_marked_for_delete(f.file_id);
            state.pending_deletes.push(PendingDelete {
                file_id: f.file_id,
                superseded_at_generation: snap.generation,
            });
            marked += 1;
        }
    }
    Ok(marked)
}
