// Log replay - walks a chain of transaction-log files and surfaces each
// committed transaction in order.
//
// Replay is responsible for:
// 1. Reading record frames across file boundaries (transactions may span
//    a split)
// 2. Buffering operations until their commit marker is reached
// 3. Dropping a trailing, incompletely written transaction (treated as
//    rolled back)
// 4. Stopping cleanly at a corrupt or truncated tail; records up to that
//    point stay valid

use crate::filecollection::FileCollection;
use crate::record::LogOp;
use burrowdb_core::{Error, FileId, Result};
use std::sync::Arc;

/// One file of the log chain with the offset of its first record.
#[derive(Debug, Clone, Copy)]
pub struct ChainFile {
    pub file_id: FileId,
    pub start_offset: u64,
}

/// A fully committed transaction reconstructed from the log.
#[derive(Debug, Clone)]
pub struct CommittedTransaction {
    pub generation: u64,
    pub commit_ulong: u64,
    pub ulongs: Vec<u64>,
    /// Data operations in log order (no commit/rollback markers)
    pub ops: Vec<LogOp>,
}

/// What replay saw and where it stopped.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// Committed transactions delivered to the callback
    pub transactions_applied: usize,
    /// A trailing unterminated or torn transaction was dropped
    pub truncated_tail: bool,
    /// A bad frame was hit before the newest file; later files were not read
    pub stopped_mid_chain: bool,
    /// Position right after the last applied commit or rollback marker
    /// (initially the start of the chain); the safe truncation point
    pub boundary: Option<(FileId, u64)>,
    /// Generation of the last applied commit
    pub last_generation: u64,
    /// Commit counter of the last applied commit
    pub last_commit_ulong: u64,
}

/// Replays committed transactions from an ordered log chain.
pub struct LogReplayer {
    files: Arc<dyn FileCollection>,
    /// Stop before the first commit whose counter exceeds this
    stop_after_commit_ulong: Option<u64>,
}

impl LogReplayer {
    pub fn new(files: Arc<dyn FileCollection>) -> Self {
        Self {
            files,
            stop_after_commit_ulong: None,
        }
    }

    /// Do not deliver commits whose commit counter exceeds `value`.
    pub fn stop_after_commit_ulong(mut self, value: Option<u64>) -> Self {
        self.stop_after_commit_ulong = value;
        self
    }

    /// Walk `chain` (oldest to newest) delivering each committed
    /// transaction to `apply`.
    pub fn replay(
        &self,
        chain: &[ChainFile],
        mut apply: impl FnMut(CommittedTransaction) -> Result<()>,
    ) -> Result<ReplayOutcome> {
        let mut outcome = ReplayOutcome {
            transactions_applied: 0,
            truncated_tail: false,
            stopped_mid_chain: false,
            boundary: chain.first().map(|c| (c.file_id, c.start_offset)),
            last_generation: 0,
            last_commit_ulong: 0,
        };

        let mut pending: Vec<LogOp> = Vec::new();

        'files: for (idx, entry) in chain.iter().enumerate() {
            let is_last_file = idx + 1 == chain.len();
            let file = self.files.get_file(entry.file_id).ok_or_else(|| {
                Error::Corrupt(format!(
                    "Log file {} missing from the collection",
                    entry.file_id
                ))
            })?;

            let mut offset = entry.start_offset;
            loop {
                let len_bytes = file.read(offset, 4)?;
                if len_bytes.is_empty() {
                    // Clean end of this file
                    continue 'files;
                }
                if len_bytes.len() < 4 {
                    self.note_bad_tail(is_last_file, &mut outcome, &mut pending);
                    break 'files;
                }
                let content_len =
                    u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                        as usize;
                let total = 4 + content_len + 4;
                let frame = file.read(offset, total)?;
                if frame.len() < total {
                    self.note_bad_tail(is_last_file, &mut outcome, &mut pending);
                    break 'files;
                }

                let op = match LogOp::decode(&frame) {
                    Ok((op, _)) => op,
                    Err(_) => {
                        self.note_bad_tail(is_last_file, &mut outcome, &mut pending);
                        break 'files;
                    }
                };
                offset += total as u64;

                match op {
                    LogOp::Commit {
                        generation,
                        commit_ulong,
                        ulongs,
                    } => {
                        if let Some(stop) = self.stop_after_commit_ulong {
                            if commit_ulong > stop {
                                // Everything beyond the rollback point stays
                                // on disk until a later commit discards it
                                pending.clear();
                                break 'files;
                            }
                        }
                        let txn = CommittedTransaction {
                            generation,
                            commit_ulong,
                            ulongs,
                            ops: std::mem::take(&mut pending),
                        };
                        apply(txn)?;
                        outcome.transactions_applied += 1;
                        outcome.last_generation = generation;
                        outcome.last_commit_ulong = commit_ulong;
                        outcome.boundary = Some((entry.file_id, offset));
                    }
                    LogOp::Rollback => {
                        pending.clear();
                        outcome.boundary = Some((entry.file_id, offset));
                    }
                    data_op => pending.push(data_op),
                }
            }
        }

        if !pending.is_empty() {
            outcome.truncated_tail = true;
            tracing::warn!(
                dropped_ops = pending.len(),
                "dropping unterminated trailing transaction"
            );
        }

        Ok(outcome)
    }

    fn note_bad_tail(
        &self,
        is_last_file: bool,
        outcome: &mut ReplayOutcome,
        pending: &mut Vec<LogOp>,
    ) {
        if is_last_file {
            outcome.truncated_tail = true;
        } else {
            outcome.stopped_mid_chain = true;
        }
        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filecollection::InMemoryFileCollection;
    use crate::writer::LogWriter;
    use burrowdb_core::{NullLogger, ValueRef};

    fn setup(split: u64) -> (Arc<InMemoryFileCollection>, LogWriter) {
        let fc = Arc::new(InMemoryFileCollection::new());
        let w = LogWriter::new(
            Arc::clone(&fc) as Arc<dyn FileCollection>,
            Arc::new(NullLogger),
            split,
        );
        (fc, w)
    }

    fn put(w: &mut LogWriter, gen: u64, i: usize) {
        w.append_op(
            &LogOp::CreateOrUpdate {
                key: format!("key{}", i).into_bytes(),
                value: ValueRef::Inline(format!("value{}", i).into_bytes()),
            },
            gen,
        )
        .expect("Failed to append");
    }

    fn commit(w: &mut LogWriter, gen: u64, commit_ulong: u64) {
        w.append_op(
            &LogOp::Commit {
                generation: gen,
                commit_ulong,
                ulongs: vec![commit_ulong],
            },
            gen,
        )
        .expect("Failed to append commit");
    }

    fn chain_from(fc: &Arc<InMemoryFileCollection>) -> Vec<ChainFile> {
        use crate::fileformat::read_header;
        fc.enumerate()
            .into_iter()
            .map(|id| {
                let file = fc.get_file(id).unwrap();
                let (_, _, header_size) = read_header(file.as_ref()).unwrap();
                ChainFile {
                    file_id: id,
                    start_offset: header_size,
                }
            })
            .collect()
    }

    #[test]
    fn test_replay_empty_chain() {
        let (fc, _) = setup(1024);
        let replayer = LogReplayer::new(Arc::clone(&fc) as Arc<dyn FileCollection>);
        let outcome = replayer.replay(&[], |_| Ok(())).unwrap();
        assert_eq!(outcome.transactions_applied, 0);
        assert!(!outcome.truncated_tail);
    }

    #[test]
    fn test_replay_committed_transactions() {
        let (fc, mut w) = setup(64 * 1024);
        put(&mut w, 1, 0);
        put(&mut w, 1, 1);
        commit(&mut w, 1, 1);
        put(&mut w, 2, 2);
        commit(&mut w, 2, 2);

        let replayer = LogReplayer::new(Arc::clone(&fc) as Arc<dyn FileCollection>);
        let mut txns = Vec::new();
        let outcome = replayer
            .replay(&chain_from(&fc), |t| {
                txns.push(t);
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome.transactions_applied, 2);
        assert_eq!(txns[0].ops.len(), 2);
        assert_eq!(txns[0].generation, 1);
        assert_eq!(txns[1].ops.len(), 1);
        assert_eq!(outcome.last_generation, 2);
        assert_eq!(outcome.last_commit_ulong, 2);
        assert!(!outcome.truncated_tail);
    }

    #[test]
    fn test_replay_drops_unterminated_tail() {
        let (fc, mut w) = setup(64 * 1024);
        put(&mut w, 1, 0);
        commit(&mut w, 1, 1);
        // Crash before commit
        put(&mut w, 2, 1);
        put(&mut w, 2, 2);

        let replayer = LogReplayer::new(Arc::clone(&fc) as Arc<dyn FileCollection>);
        let mut count = 0;
        let outcome = replayer
            .replay(&chain_from(&fc), |_| {
                count += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(count, 1);
        assert!(outcome.truncated_tail);
    }

    #[test]
    fn test_replay_transaction_spanning_files() {
        let (fc, mut w) = setup(100);
        for i in 0..8 {
            put(&mut w, 1, i);
        }
        commit(&mut w, 1, 1);
        assert!(fc.enumerate().len() > 1);

        let replayer = LogReplayer::new(Arc::clone(&fc) as Arc<dyn FileCollection>);
        let mut txns = Vec::new();
        replayer
            .replay(&chain_from(&fc), |t| {
                txns.push(t);
                Ok(())
            })
            .unwrap();

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].ops.len(), 8);
    }

    #[test]
    fn test_replay_torn_tail_frame() {
        let (fc, mut w) = setup(64 * 1024);
        put(&mut w, 1, 0);
        commit(&mut w, 1, 1);
        put(&mut w, 2, 1);

        // Tear the last frame
        let id = *fc.enumerate().last().unwrap();
        let file = fc.get_file(id).unwrap();
        file.set_size(file.size() - 3).unwrap();

        let replayer = LogReplayer::new(Arc::clone(&fc) as Arc<dyn FileCollection>);
        let mut count = 0;
        let outcome = replayer
            .replay(&chain_from(&fc), |_| {
                count += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(count, 1);
        assert!(outcome.truncated_tail);
        assert!(!outcome.stopped_mid_chain);
    }

    #[test]
    fn test_replay_rollback_marker() {
        let (fc, mut w) = setup(64 * 1024);
        put(&mut w, 1, 0);
        w.append_op(&LogOp::Rollback, 1).unwrap();
        put(&mut w, 1, 1);
        commit(&mut w, 1, 1);

        let replayer = LogReplayer::new(Arc::clone(&fc) as Arc<dyn FileCollection>);
        let mut txns = Vec::new();
        replayer
            .replay(&chain_from(&fc), |t| {
                txns.push(t);
                Ok(())
            })
            .unwrap();

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].ops.len(), 1, "rolled back op must not reappear");
    }

    #[test]
    fn test_replay_stops_at_commit_ulong() {
        let (fc, mut w) = setup(64 * 1024);
        for c in 1..=5u64 {
            put(&mut w, c, c as usize);
            commit(&mut w, c, c);
        }

        let replayer = LogReplayer::new(Arc::clone(&fc) as Arc<dyn FileCollection>)
            .stop_after_commit_ulong(Some(3));
        let mut count = 0;
        let outcome = replayer
            .replay(&chain_from(&fc), |_| {
                count += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(outcome.last_commit_ulong, 3);
    }

    #[test]
    fn test_boundary_tracks_last_commit() {
        let (fc, mut w) = setup(64 * 1024);
        put(&mut w, 1, 0);
        commit(&mut w, 1, 1);
        let after_commit = w.position().unwrap();
        put(&mut w, 2, 1);

        let replayer = LogReplayer::new(Arc::clone(&fc) as Arc<dyn FileCollection>);
        let outcome = replayer.replay(&chain_from(&fc), |_| Ok(())).unwrap();
        assert_eq!(outcome.boundary, Some(after_commit));
    }
}
