// Transactions: snapshot readers, the single writer, the cursor and the
// prefix-scoped key space view.

use crate::db::{DbInner, RootSnapshot};
use burrowdb_core::{Error, FindResult, Result};
use burrowdb_storage::BTree;
use burrowdb_wal::LogOp;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

/// A transaction over one immutable snapshot of the key space.
///
/// Read operations never block. The first mutation claims the writer
/// token; if another writer holds it the mutation fails with the
/// retryable [`Error::WriteConflict`] and the whole transaction should be
/// retried. Dropping without [`commit`](Transaction::commit) rolls back.
pub struct Transaction {
    db: Arc<DbInner>,
    tree: BTree,
    snapshot_generation: u64,
    commit_generation: u64,
    commit_ulong: u64,
    ulongs: Vec<u64>,
    writing: bool,
    read_only: bool,
    committed: bool,
    ops_logged: bool,
    txn_id: u64,
    key_prefix: Vec<u8>,
    cursor: Option<u64>,
    created: Instant,
}

impl Transaction {
    pub(crate) fn new(db: Arc<DbInner>, read_only: bool) -> Self {
        let snapshot = db.snapshot();
        Self::from_snapshot(db, snapshot, read_only, false, 0)
    }

    pub(crate) fn new_writing(db: Arc<DbInner>, snapshot: RootSnapshot, commit_generation: u64) -> Self {
        Self::from_snapshot(db, snapshot, false, true, commit_generation)
    }

    fn from_snapshot(
        db: Arc<DbInner>,
        snapshot: RootSnapshot,
        read_only: bool,
        writing: bool,
        commit_generation: u64,
    ) -> Self {
        let txn_id = db.register_tx(snapshot.generation, read_only);
        Self {
            db,
            tree: snapshot.tree,
            snapshot_generation: snapshot.generation,
            commit_generation,
            commit_ulong: snapshot.commit_ulong,
            ulongs: snapshot.ulongs,
            writing,
            read_only,
            committed: false,
            ops_logged: false,
            txn_id,
            key_prefix: Vec::new(),
            cursor: None,
            created: Instant::now(),
        }
    }

    /// Generation of the snapshot this transaction reads.
    pub fn generation(&self) -> u64 {
        self.snapshot_generation
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn created_at(&self) -> Instant {
        self.created
    }

    /// Label reported if this transaction is ever flagged as leaked.
    pub fn set_description_for_leaks(&mut self, description: impl Into<String>) {
        self.db.set_tx_description(self.txn_id, description.into());
    }

    /// Value reference currently stored under an absolute key, if any.
    /// Used by compaction to skip keys rewritten since its scan.
    pub(crate) fn current_value_ref(&self, full_key: &[u8]) -> Option<burrowdb_core::ValueRef> {
        let (result, rank) = self.tree.find(full_key);
        if result != FindResult::Exact {
            return None;
        }
        self.tree.entry_at(rank).map(|(_, v)| v.clone())
    }

    fn ensure_writable(&mut self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        if !self.writing {
            self.commit_generation = self.db.try_acquire_writer(self.snapshot_generation)?;
            self.writing = true;
        }
        Ok(())
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.key_prefix.len() + key.len());
        full.extend_from_slice(&self.key_prefix);
        full.extend_from_slice(key);
        full
    }

    /// Absolute rank window `[start, end)` of the current prefix.
    fn window(&self) -> (u64, u64) {
        self.tree.prefix_range(&self.key_prefix)
    }

    // -- prefix scoping ----------------------------------------------------

    /// Restrict every following operation to keys sharing `prefix`.
    /// Returned keys and key indexes are relative to the prefix. Clears
    /// the cursor.
    pub fn set_key_prefix(&mut self, prefix: &[u8]) {
        self.key_prefix = prefix.to_vec();
        self.cursor = None;
    }

    pub fn key_prefix(&self) -> &[u8] {
        &self.key_prefix
    }

    // -- cursor movement ---------------------------------------------------

    /// Locate `key` (relative to the prefix). `Exact` on a hit; otherwise
    /// the cursor sits on the nearest neighbor inside the prefix window,
    /// preferring the previous key.
    pub fn find(&mut self, key: &[u8]) -> FindResult {
        let (start, end) = self.window();
        if start == end {
            self.cursor = None;
            return FindResult::NotFound;
        }
        let full = self.full_key(key);
        let lb = self.tree.lower_bound(&full);
        if lb < end {
            if let Some((k, _)) = self.tree.entry_at(lb) {
                if k == full.as_slice() {
                    self.cursor = Some(lb);
                    return FindResult::Exact;
                }
            }
        }
        if lb >= end {
            self.cursor = Some(end - 1);
            FindResult::Previous
        } else if lb > start {
            self.cursor = Some(lb - 1);
            FindResult::Previous
        } else {
            self.cursor = Some(start);
            FindResult::Next
        }
    }

    /// Position on the first key in the prefix window.
    pub fn find_first_key(&mut self) -> bool {
        let (start, end) = self.window();
        if start == end {
            self.cursor = None;
            return false;
        }
        self.cursor = Some(start);
        true
    }

    /// Position on the last key in the prefix window.
    pub fn find_last_key(&mut self) -> bool {
        let (start, end) = self.window();
        if start == end {
            self.cursor = None;
            return false;
        }
        self.cursor = Some(end - 1);
        true
    }

    /// Advance to the next key; false (and unpositioned) past the end.
    pub fn find_next_key(&mut self) -> bool {
        let (start, end) = self.window();
        match self.cursor {
            None => self.find_first_key(),
            Some(rank) => {
                let next = rank + 1;
                if next >= end || next < start {
                    self.cursor = None;
                    false
                } else {
                    self.cursor = Some(next);
                    true
                }
            }
        }
    }

    /// Step back to the previous key; false (and unpositioned) before the
    /// start.
    pub fn find_previous_key(&mut self) -> bool {
        let (start, end) = self.window();
        match self.cursor {
            None => self.find_last_key(),
            Some(rank) => {
                if rank <= start || rank > end {
                    self.cursor = None;
                    false
                } else {
                    self.cursor = Some(rank - 1);
                    true
                }
            }
        }
    }

    /// Rank of the cursor relative to the prefix window.
    pub fn get_key_index(&self) -> Option<u64> {
        let (start, _) = self.window();
        self.cursor.map(|rank| rank - start)
    }

    /// Position the cursor at relative rank `index`.
    pub fn set_key_index(&mut self, index: u64) -> bool {
        let (start, end) = self.window();
        if start + index < end {
            self.cursor = Some(start + index);
            true
        } else {
            self.cursor = None;
            false
        }
    }

    /// Number of keys in the prefix window.
    pub fn get_key_value_count(&self) -> u64 {
        let (start, end) = self.window();
        end - start
    }

    // -- reads -------------------------------------------------------------

    /// Key at the cursor, with the prefix stripped.
    pub fn get_key(&self) -> Option<Vec<u8>> {
        let rank = self.cursor?;
        let (key, _) = self.tree.entry_at(rank)?;
        Some(key[self.key_prefix.len()..].to_vec())
    }

    /// Value at the cursor, resolving external references.
    pub fn get_value(&self) -> Result<Vec<u8>> {
        let rank = self
            .cursor
            .ok_or_else(|| Error::InvalidOperation("Cursor is not positioned".to_string()))?;
        let (_, vref) = self
            .tree
            .entry_at(rank)
            .ok_or_else(|| Error::InvalidOperation("Cursor is not positioned".to_string()))?;
        self.db.resolve_value(vref)
    }

    // -- mutations ---------------------------------------------------------

    /// Insert or update `key` (relative to the prefix); returns whether
    /// the key was created. The cursor ends on the written key.
    pub fn create_or_update_key_value(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.ensure_writable()?;
        let full = self.full_key(key);
        let vref = self.db.store_value(value, self.commit_generation)?;
        self.db.append_op(
            &LogOp::CreateOrUpdate {
                key: full.clone(),
                value: vref.clone(),
            },
            self.commit_generation,
        )?;
        self.ops_logged = true;
        let created = self.tree.insert(&full, vref);
        self.cursor = Some(self.tree.lower_bound(&full));
        Ok(created)
    }

    /// Replace the value under the cursor.
    pub fn set_value(&mut self, value: &[u8]) -> Result<()> {
        let key = self
            .get_key()
            .ok_or_else(|| Error::InvalidOperation("Cursor is not positioned".to_string()))?;
        self.create_or_update_key_value(&key, value)?;
        Ok(())
    }

    /// Erase the pair under the cursor; the cursor becomes unpositioned.
    pub fn erase_current(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let rank = self
            .cursor
            .ok_or_else(|| Error::InvalidOperation("Cursor is not positioned".to_string()))?;
        let key = self
            .tree
            .entry_at(rank)
            .map(|(k, _)| k.to_vec())
            .ok_or_else(|| Error::InvalidOperation("Cursor is not positioned".to_string()))?;
        self.db
            .append_op(&LogOp::EraseOne { key }, self.commit_generation)?;
        self.ops_logged = true;
        self.tree.erase_at(rank);
        self.cursor = None;
        Ok(())
    }

    /// Erase relative ranks `[first, last]` inside the prefix window in
    /// one pass; returns the number erased.
    pub fn erase_range(&mut self, first: u64, last: u64) -> Result<u64> {
        self.ensure_writable()?;
        let (start, end) = self.window();
        let count = end - start;
        if count == 0 || first > last || first >= count {
            return Ok(0);
        }
        let last = last.min(count - 1);
        let abs_first = start + first;
        let abs_last = start + last;

        let first_key = self
            .tree
            .entry_at(abs_first)
            .map(|(k, _)| k.to_vec())
            .expect("rank in range");
        let last_key = self
            .tree
            .entry_at(abs_last)
            .map(|(k, _)| k.to_vec())
            .expect("rank in range");
        self.db.append_op(
            &LogOp::EraseRange {
                first_key,
                last_key,
            },
            self.commit_generation,
        )?;
        self.ops_logged = true;

        let erased = self.tree.erase_range(abs_first, abs_last);
        self.cursor = None;
        Ok(erased)
    }

    /// Erase every key in the prefix window.
    pub fn erase_all(&mut self) -> Result<u64> {
        let count = self.get_key_value_count();
        if count == 0 {
            return Ok(0);
        }
        self.erase_range(0, count - 1)
    }

    // -- ulong registers ---------------------------------------------------

    /// Read 64-bit register `index`; unset registers read as zero.
    pub fn get_ulong(&self, index: u32) -> u64 {
        self.ulongs.get(index as usize).copied().unwrap_or(0)
    }

    /// Write 64-bit register `index`; persisted with the commit.
    pub fn set_ulong(&mut self, index: u32, value: u64) -> Result<()> {
        self.ensure_writable()?;
        self.db.append_op(
            &LogOp::SetUlong { index, value },
            self.commit_generation,
        )?;
        self.ops_logged = true;
        if self.ulongs.len() <= index as usize {
            self.ulongs.resize(index as usize + 1, 0);
        }
        self.ulongs[index as usize] = value;
        Ok(())
    }

    /// The commit counter this transaction snapshotted or set.
    pub fn get_commit_ulong(&self) -> u64 {
        self.commit_ulong
    }

    /// Set the commit counter persisted with this commit.
    pub fn set_commit_ulong(&mut self, value: u64) -> Result<()> {
        self.ensure_writable()?;
        self.db.append_op(
            &LogOp::SetCommitUlong { value },
            self.commit_generation,
        )?;
        self.ops_logged = true;
        self.commit_ulong = value;
        Ok(())
    }

    /// Serialize the registers (commit counter first) to a byte stream.
    pub fn export_ulongs(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.commit_ulong.to_le_bytes())?;
        writer.write_all(&(self.ulongs.len() as u32).to_le_bytes())?;
        for v in &self.ulongs {
            writer.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    /// Restore registers previously written by
    /// [`export_ulongs`](Transaction::export_ulongs).
    pub fn import_ulongs(&mut self, reader: &mut impl Read) -> Result<()> {
        let mut u64_buf = [0u8; 8];
        reader.read_exact(&mut u64_buf)?;
        self.set_commit_ulong(u64::from_le_bytes(u64_buf))?;

        let mut u32_buf = [0u8; 4];
        reader.read_exact(&mut u32_buf)?;
        let count = u32::from_le_bytes(u32_buf);
        for index in 0..count {
            reader.read_exact(&mut u64_buf)?;
            self.set_ulong(index, u64::from_le_bytes(u64_buf))?;
        }
        Ok(())
    }

    // -- lifecycle ---------------------------------------------------------

    /// Make every mutation durable and visible to transactions started
    /// from now on. A transaction that never mutated commits as a no-op.
    pub fn commit(mut self) -> Result<()> {
        if !self.writing {
            self.committed = true;
            return Ok(());
        }

        // Value blocks must be durable before the commit record that
        // references them
        self.db.flush_values()?;
        self.db.append_op(
            &LogOp::Commit {
                generation: self.commit_generation,
                commit_ulong: self.commit_ulong,
                ulongs: self.ulongs.clone(),
            },
            self.commit_generation,
        )?;
        self.db.flush_log()?;
        let log_position = self.db.log_position();

        let root = RootSnapshot {
            tree: std::mem::take(&mut self.tree),
            generation: self.commit_generation,
            commit_ulong: self.commit_ulong,
            ulongs: std::mem::take(&mut self.ulongs),
            log_position,
        };
        self.committed = true;
        self.db.publish_commit(root);
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.writing && !self.committed {
            // Rollback: the working root is discarded; the marker keeps
            // replay from attributing our ops to a later commit
            if self.ops_logged {
                let _ = self
                    .db
                    .append_op(&LogOp::Rollback, self.commit_generation);
            }
            self.db.release_writer();
        }
        self.db.unregister_tx(self.txn_id);
        self.db.try_purge_files();
    }
}

/// Pending writer-token acquisition from
/// [`start_writing_transaction`](crate::KeyValueDB::start_writing_transaction).
///
/// Dropping the handle without calling [`wait`](Self::wait) withdraws the
/// request and passes the token on.
pub struct WritingTransactionWait {
    db: Arc<DbInner>,
    ticket: u64,
    claimed: bool,
}

impl WritingTransactionWait {
    pub(crate) fn new(db: Arc<DbInner>, ticket: u64) -> Self {
        Self {
            db,
            ticket,
            claimed: false,
        }
    }

    /// Block until every earlier writer finished, then return a
    /// transaction already holding the writer token.
    pub fn wait(mut self) -> Result<Transaction> {
        self.db.await_writer(self.ticket)?;
        self.claimed = true;
        let (snapshot, commit_generation) = self.db.claim_writer_snapshot()?;
        Ok(Transaction::new_writing(
            Arc::clone(&self.db),
            snapshot,
            commit_generation,
        ))
    }
}

impl Drop for WritingTransactionWait {
    fn drop(&mut self) {
        if !self.claimed {
            self.db.cancel_waiter(self.ticket);
        }
    }
}
