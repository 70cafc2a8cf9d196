// Transaction manager: admission control for the single writer, snapshot
// assignment for readers, generation tracking for the compactor, and the
// live-transaction registry used for leak diagnosis.

use crate::compactor;
use crate::open;
use crate::options::KeyValueDBOptions;
use crate::transaction::{Transaction, WritingTransactionWait};
use burrowdb_core::{
    CompressionStrategy, DbLogger, Error, FileId, Result, ValueRef,
};
use burrowdb_storage::{BTree, CancellationToken, CompactionStats, ValueStore};
use burrowdb_wal::{FileCollection, FileKind, LogOp, LogWriter};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

/// One published version of the index with its commit metadata.
#[derive(Clone)]
pub(crate) struct RootSnapshot {
    pub tree: BTree,
    pub generation: u64,
    pub commit_ulong: u64,
    pub ulongs: Vec<u64>,
    /// Log position right after this root's commit record; a snapshot
    /// taken of this root replays from here
    pub log_position: Option<(FileId, u64)>,
}

impl RootSnapshot {
    pub(crate) fn empty() -> Self {
        Self {
            tree: BTree::new(),
            generation: 0,
            commit_ulong: 0,
            ulongs: Vec::new(),
            log_position: None,
        }
    }
}

/// A file superseded by compaction, waiting for old readers to finish.
pub(crate) struct PendingDelete {
    pub file_id: FileId,
    pub superseded_at_generation: u64,
}

pub(crate) struct DbState {
    /// The root new transactions snapshot; swapped atomically at commit
    pub current: RootSnapshot,
    /// Whether the writer token is held (by a transaction or a waiter)
    pub writer_active: bool,
    /// FIFO queue of waiter tickets for the writer token
    pub write_queue: VecDeque<u64>,
    /// Ticket the token is currently offered to, not yet picked up
    pub granted_ticket: Option<u64>,
    /// Next waiter ticket to hand out
    pub next_ticket: u64,
    /// Deferred truncation after an `open_up_to_commit_ulong` open;
    /// applied right before the first write claims the token
    pub pending_truncate: Option<open::PendingTruncate>,
    /// Files marked for delete, waiting for live readers to move past
    pub pending_deletes: Vec<PendingDelete>,
    /// Log position the newest key-value index snapshot covers
    pub last_kvi: Option<(FileId, u64)>,
    pub preserve_history_up_to_commit_ulong: Option<u64>,
}

struct LiveTx {
    generation: u64,
    read_only: bool,
    created: Instant,
    description: Option<String>,
}

#[derive(Default)]
pub(crate) struct LiveRegistry {
    next_id: u64,
    live: HashMap<u64, LiveTx>,
}

impl LiveRegistry {
    fn register(&mut self, generation: u64, read_only: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(
            id,
            LiveTx {
                generation,
                read_only,
                created: Instant::now(),
                description: None,
            },
        );
        id
    }

    fn min_live_generation(&self) -> Option<u64> {
        self.live.values().map(|t| t.generation).min()
    }
}

/// A diagnostic view of one live transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub read_only: bool,
    pub age: Duration,
    pub generation: u64,
    pub description: Option<String>,
}

pub(crate) struct DbInner {
    pub files: Arc<dyn FileCollection>,
    pub compression: Arc<dyn CompressionStrategy>,
    pub logger: Arc<dyn DbLogger>,
    pub state: Mutex<DbState>,
    pub writer_cv: Condvar,
    pub log: Mutex<LogWriter>,
    pub values: Mutex<ValueStore>,
    pub live: Mutex<LiveRegistry>,
    pub compaction_stats: Mutex<CompactionStats>,
    pub file_split_size: u64,
    pub compactor_write_bytes_per_second_limit: u64,
    pub compactor_ram_limit_in_mb: u64,
    pub scheduler: Option<Arc<dyn crate::options::CompactorScheduler>>,
    /// Handed to scheduler closures so they never keep the engine alive
    pub weak_self: Mutex<Weak<DbInner>>,
    /// One compaction pass at a time
    pub compacting: std::sync::atomic::AtomicBool,
}

impl DbInner {
    pub(crate) fn snapshot(&self) -> RootSnapshot {
        self.state
            .lock()
            .expect("state lock poisoned")
            .current
            .clone()
    }

    /// Claim the writer token for a transaction rooted at
    /// `expected_generation`, failing with a retryable conflict when the
    /// token is taken or the snapshot is stale.
    pub(crate) fn try_acquire_writer(&self, expected_generation: u64) -> Result<u64> {
        let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
        if state.writer_active {
            return Err(Error::WriteConflict);
        }
        if state.current.generation != expected_generation {
            // A commit landed after this transaction snapshotted its root
            return Err(Error::WriteConflict);
        }
        state.writer_active = true;
        let commit_generation = state.current.generation + 1;
        let truncate = state.pending_truncate.take();
        drop(state);

        if let Some(t) = truncate {
            self.apply_pending_truncate(t)?;
        }
        Ok(commit_generation)
    }

    /// Queue for the writer token; returns the waiter's ticket.
    pub(crate) fn enqueue_writer(&self) -> u64 {
        let mut state = self.state.lock().expect("state lock poisoned");
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        if !state.writer_active {
            debug_assert!(state.write_queue.is_empty());
            state.writer_active = true;
            state.granted_ticket = Some(ticket);
        } else {
            state.write_queue.push_back(ticket);
        }
        ticket
    }

    /// Block until `ticket` is offered the writer token.
    pub(crate) fn await_writer(&self, ticket: u64) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
        while state.granted_ticket != Some(ticket) {
            state = self
                .writer_cv
                .wait(state)
                .map_err(|_| Error::LockPoisoned)?;
        }
        state.granted_ticket = None;
        Ok(())
    }

    /// Withdraw a queued waiter, re-offering the token if it was already
    /// granted but never picked up.
    pub(crate) fn cancel_waiter(&self, ticket: u64) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if state.granted_ticket == Some(ticket) {
            state.granted_ticket = None;
            Self::pass_token(&mut state);
            self.writer_cv.notify_all();
        } else {
            state.write_queue.retain(|t| *t != ticket);
        }
    }

    fn pass_token(state: &mut DbState) {
        match state.write_queue.pop_front() {
            Some(next) => state.granted_ticket = Some(next),
            None => state.writer_active = false,
        }
    }

    /// Build the snapshot for a queued writer that just received the
    /// token, and assign its commit generation.
    pub(crate) fn claim_writer_snapshot(&self) -> Result<(RootSnapshot, u64)> {
        let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
        debug_assert!(state.writer_active);
        let snapshot = state.current.clone();
        let commit_generation = snapshot.generation + 1;
        let truncate = state.pending_truncate.take();
        drop(state);

        if let Some(t) = truncate {
            self.apply_pending_truncate(t)?;
        }
        Ok((snapshot, commit_generation))
    }

    fn apply_pending_truncate(&self, t: open::PendingTruncate) -> Result<()> {
        open::discard_later_history(self, t)
    }

    /// Hand the token to the next queued writer, or clear it.
    pub(crate) fn release_writer(&self) {
        let mut state = self.state.lock().expect("state lock poisoned");
        Self::pass_token(&mut state);
        self.writer_cv.notify_all();
    }

    /// Publish a committed root and pass the writer token on.
    pub(crate) fn publish_commit(&self, root: RootSnapshot) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            debug_assert!(root.generation > state.current.generation);
            state.current = root;
        }
        self.release_writer();
        self.advise_compaction();
    }

    fn advise_compaction(&self) {
        if let Some(scheduler) = &self.scheduler {
            let weak = self.weak_self.lock().expect("weak lock poisoned").clone();
            scheduler.advise_running(Box::new(move || {
                weak.upgrade()
                    .map(|db| {
                        compactor::compact(&db, &CancellationToken::new()).unwrap_or(false)
                    })
                    .unwrap_or(false)
            }));
        }
    }

    pub(crate) fn append_op(&self, op: &LogOp, generation: u64) -> Result<(FileId, u64)> {
        self.log
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .append_op(op, generation)
    }

    pub(crate) fn flush_log(&self) -> Result<()> {
        self.log.lock().map_err(|_| Error::LockPoisoned)?.flush()
    }

    pub(crate) fn log_position(&self) -> Option<(FileId, u64)> {
        self.log.lock().ok()?.position()
    }

    pub(crate) fn store_value(&self, raw: &[u8], generation: u64) -> Result<ValueRef> {
        self.values
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .store(raw, generation)
    }

    pub(crate) fn resolve_value(&self, vref: &ValueRef) -> Result<Vec<u8>> {
        self.values
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .resolve(vref)
    }

    pub(crate) fn flush_values(&self) -> Result<()> {
        self.values.lock().map_err(|_| Error::LockPoisoned)?.flush()
    }

    pub(crate) fn register_tx(&self, generation: u64, read_only: bool) -> u64 {
        self.live
            .lock()
            .expect("live registry poisoned")
            .register(generation, read_only)
    }

    pub(crate) fn unregister_tx(&self, id: u64) {
        self.live
            .lock()
            .expect("live registry poisoned")
            .live
            .remove(&id);
    }

    pub(crate) fn set_tx_description(&self, id: u64, description: String) {
        if let Some(tx) = self
            .live
            .lock()
            .expect("live registry poisoned")
            .live
            .get_mut(&id)
        {
            tx.description = Some(description);
        }
    }

    pub(crate) fn min_live_generation(&self) -> Option<u64> {
        self.live
            .lock()
            .expect("live registry poisoned")
            .min_live_generation()
    }

    /// Physically remove marked files that no live transaction can still
    /// reach.
    pub(crate) fn try_purge_files(&self) {
        let removable: Vec<FileId> = {
            let min_live = self.min_live_generation();
            let mut state = self.state.lock().expect("state lock poisoned");
            let mut removable = Vec::new();
            state.pending_deletes.retain(|p| {
                let safe = match min_live {
                    None => true,
                    Some(g) => g > p.superseded_at_generation,
                };
                if safe {
                    removable.push(p.file_id);
                }
                !safe
            });
            removable
        };
        for file_id in removable {
            match self.files.remove(file_id) {
                Ok(()) => tracing::debug!(file_id, "removed superseded file"),
                Err(e) => tracing::warn!(file_id, error = %e, "failed to remove superseded file"),
            }
        }
    }
}

/// An embedded, transactional, ordered key-value store.
///
/// One writer at a time mutates a copy-on-write index; readers get
/// immutable snapshots and are never blocked. Every mutation goes through
/// a write-ahead log before it is visible, and a background-compactable
/// family of append-only files holds the persistent state.
///
/// # Examples
///
/// ```rust
/// use burrowdb::{KeyValueDB, KeyValueDBOptions};
///
/// let db = KeyValueDB::open(KeyValueDBOptions::in_memory())?;
///
/// let mut tx = db.start_transaction()?;
/// tx.create_or_update_key_value(b"user:1", b"Alice")?;
/// tx.commit()?;
///
/// let mut read = db.start_read_only_transaction()?;
/// assert!(read.find_first_key());
/// assert_eq!(read.get_value()?, b"Alice");
/// # Ok::<(), burrowdb::Error>(())
/// ```
#[derive(Clone)]
pub struct KeyValueDB {
    pub(crate) inner: Arc<DbInner>,
}

impl KeyValueDB {
    /// Open (or create) a database described by `options`.
    ///
    /// Recovery runs here: the newest valid key-value-index snapshot is
    /// loaded and the transaction-log chain is replayed up to the last
    /// well-formed commit.
    pub fn open(options: KeyValueDBOptions) -> Result<Self> {
        let inner = open::open(options)?;
        *inner.weak_self.lock().expect("weak lock poisoned") = Arc::downgrade(&inner);
        Ok(Self { inner })
    }

    /// Start a read/write transaction rooted at the current state.
    ///
    /// The writer token is claimed lazily at the first mutation; if
    /// another writer holds it, that mutation fails with the retryable
    /// [`Error::WriteConflict`].
    pub fn start_transaction(&self) -> Result<Transaction> {
        Ok(Transaction::new(Arc::clone(&self.inner), false))
    }

    /// Start a transaction that can never mutate.
    pub fn start_read_only_transaction(&self) -> Result<Transaction> {
        Ok(Transaction::new(Arc::clone(&self.inner), true))
    }

    /// Queue for the writer token; the returned handle resolves, in FIFO
    /// order, once every earlier writer committed or was dropped.
    pub fn start_writing_transaction(&self) -> WritingTransactionWait {
        let ticket = self.inner.enqueue_writer();
        WritingTransactionWait::new(Arc::clone(&self.inner), ticket)
    }

    /// Run one compaction pass; returns whether any work was done.
    ///
    /// Safe to call repeatedly and concurrently with transactions; a
    /// long-lived reader can delay file deletion but never correctness.
    pub fn compact(&self, token: &CancellationToken) -> Result<bool> {
        compactor::compact(&self.inner, token)
    }

    /// Write a fresh key-value-index snapshot of the current root.
    pub fn create_kvi(&self, token: &CancellationToken) -> Result<bool> {
        compactor::create_kvi(&self.inner, token)
    }

    /// Diagnostic view of all live transactions.
    pub fn transactions(&self) -> Vec<TransactionInfo> {
        let live = self.inner.live.lock().expect("live registry poisoned");
        live.live
            .values()
            .map(|t| TransactionInfo {
                read_only: t.read_only,
                age: t.created.elapsed(),
                generation: t.generation,
                description: t.description.clone(),
            })
            .collect()
    }

    /// Report transactions alive longer than `max_age` through the
    /// logger. Observational only; returns how many were reported.
    pub fn report_leaked_transactions(&self, max_age: Duration) -> usize {
        let live = self.inner.live.lock().expect("live registry poisoned");
        let mut reported = 0;
        for t in live.live.values() {
            let age = t.created.elapsed();
            if age >= max_age {
                let description = t.description.as_deref().unwrap_or("<unlabeled>");
                self.inner.logger.report_transaction_leak(description, age);
                reported += 1;
            }
        }
        reported
    }

    /// Keep enough history to later reopen at `value`; `None` lets the
    /// compactor reclaim everything unreferenced.
    pub fn set_preserve_history_up_to_commit_ulong(&self, value: Option<u64>) {
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .preserve_history_up_to_commit_ulong = value;
    }

    pub fn preserve_history_up_to_commit_ulong(&self) -> Option<u64> {
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .preserve_history_up_to_commit_ulong
    }

    pub fn compactor_ram_limit_in_mb(&self) -> u64 {
        self.inner.compactor_ram_limit_in_mb
    }

    pub fn max_tr_log_file_size(&self) -> u64 {
        self.inner.file_split_size
    }

    pub fn logger(&self) -> Arc<dyn DbLogger> {
        Arc::clone(&self.inner.logger)
    }

    /// Human-readable summary of the engine's state.
    pub fn calc_stats(&self) -> String {
        let state = self.inner.state.lock().expect("state lock poisoned");
        let live_count = self
            .inner
            .live
            .lock()
            .expect("live registry poisoned")
            .live
            .len();
        let stats = self
            .inner
            .compaction_stats
            .lock()
            .expect("stats lock poisoned")
            .clone();

        let mut by_kind: HashMap<&'static str, (usize, u64)> = HashMap::new();
        for id in self.inner.files.enumerate() {
            let Some(file) = self.inner.files.get_file(id) else {
                continue;
            };
            let kind = match burrowdb_wal::read_header(file.as_ref()) {
                Ok((FileKind::TransactionLog, _, _)) => "transaction-log",
                Ok((FileKind::PureValue, _, _)) => "pure-value",
                Ok((FileKind::KeyValueIndex, _, _)) => "key-value-index",
                _ => "unknown",
            };
            let entry = by_kind.entry(kind).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += file.size();
        }

        let mut out = String::new();
        out.push_str(&format!(
            "generation: {}\ncommit ulong: {}\nkey count: {}\nlive transactions: {}\npending deletes: {}\n",
            state.current.generation,
            state.current.commit_ulong,
            state.current.tree.len(),
            live_count,
            state.pending_deletes.len(),
        ));
        let mut kinds: Vec<_> = by_kind.into_iter().collect();
        kinds.sort_by_key(|(k, _)| *k);
        for (kind, (count, bytes)) in kinds {
            out.push_str(&format!("{} files: {} ({} bytes)\n", kind, count, bytes));
        }
        out.push_str(&format!(
            "compaction: {} passes, {} values relocated, {} bytes written\n",
            stats.compaction_count, stats.values_relocated, stats.bytes_written,
        ));
        out
    }
}

