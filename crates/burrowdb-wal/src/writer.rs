// Log writer - appends record frames to the current log file and rotates
// to a new chained file when the split size would be exceeded.

use crate::filecollection::{CollectionFile, FileCollection};
use crate::fileformat::{write_header, FileHeader, FileKind};
use crate::record::LogOp;
use burrowdb_core::{DbLogger, FileId, Result};
use std::sync::Arc;

struct CurrentLog {
    file: Arc<dyn CollectionFile>,
    file_id: FileId,
    size: u64,
}

/// Appends transaction-log records, splitting into chained files.
pub struct LogWriter {
    files: Arc<dyn FileCollection>,
    logger: Arc<dyn DbLogger>,
    split_size: u64,
    current: Option<CurrentLog>,
    previous_file_id: Option<FileId>,
}

impl LogWriter {
    pub fn new(
        files: Arc<dyn FileCollection>,
        logger: Arc<dyn DbLogger>,
        split_size: u64,
    ) -> Self {
        Self {
            files,
            logger,
            split_size,
            current: None,
            previous_file_id: None,
        }
    }

    /// Continue appending to the log tail found during open.
    pub fn resume(&mut self, file_id: FileId, size: u64) -> Result<()> {
        let file = self
            .files
            .get_file(file_id)
            .ok_or_else(|| burrowdb_core::Error::NotFound)?;
        // Drop anything after the last well-formed record
        if file.size() != size {
            file.set_size(size)?;
        }
        self.current = Some(CurrentLog {
            file,
            file_id,
            size,
        });
        self.previous_file_id = Some(file_id);
        Ok(())
    }

    /// Append one record; rotates first if the frame would not fit.
    /// Returns the file and offset the frame was written at.
    pub fn append_op(&mut self, op: &LogOp, generation: u64) -> Result<(FileId, u64)> {
        let frame = op.encode()?;

        let needs_roll = match &self.current {
            None => true,
            Some(cur) => cur.size + frame.len() as u64 > self.split_size,
        };
        if needs_roll {
            self.roll(generation)?;
        }

        let cur = self.current.as_mut().expect("roll always sets current");
        let offset = cur.file.append(&frame)?;
        cur.size = offset + frame.len() as u64;
        Ok((cur.file_id, offset))
    }

    /// Open a new log file whose header points back at the previous one.
    fn roll(&mut self, generation: u64) -> Result<()> {
        if let Some(cur) = &self.current {
            cur.file.flush()?;
        }

        let file = self.files.create_file()?;
        let file_id = file.id();
        let header = FileHeader {
            file_id,
            generation,
            previous_log_file: self.previous_file_id,
        };
        let header_size = write_header(file.as_ref(), FileKind::TransactionLog, &header)?;

        tracing::debug!(file_id, generation, "opened transaction log file");
        self.logger.transaction_log_created(file_id);

        self.previous_file_id = Some(file_id);
        self.current = Some(CurrentLog {
            file,
            file_id,
            size: header_size,
        });
        Ok(())
    }

    /// Make everything appended so far durable.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(cur) = &self.current {
            cur.file.flush()?;
        }
        Ok(())
    }

    /// Position the next record will be appended at, if a file is open.
    pub fn position(&self) -> Option<(FileId, u64)> {
        self.current.as_ref().map(|c| (c.file_id, c.size))
    }

    pub fn current_file_id(&self) -> Option<FileId> {
        self.current.as_ref().map(|c| c.file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filecollection::InMemoryFileCollection;
    use crate::fileformat::read_header;
    use burrowdb_core::{NullLogger, ValueRef};

    fn writer(split_size: u64) -> (Arc<InMemoryFileCollection>, LogWriter) {
        let fc = Arc::new(InMemoryFileCollection::new());
        let w = LogWriter::new(
            Arc::clone(&fc) as Arc<dyn FileCollection>,
            Arc::new(NullLogger),
            split_size,
        );
        (fc, w)
    }

    fn put_op(i: usize) -> LogOp {
        LogOp::CreateOrUpdate {
            key: format!("key{}", i).into_bytes(),
            value: ValueRef::Inline(format!("value{}", i).into_bytes()),
        }
    }

    #[test]
    fn test_first_append_creates_file() {
        let (fc, mut w) = writer(64 * 1024);
        assert!(w.current_file_id().is_none());

        let (file_id, offset) = w.append_op(&put_op(0), 1).unwrap();
        assert_eq!(w.current_file_id(), Some(file_id));
        assert!(offset > 0, "first record lands after the header");
        assert_eq!(fc.enumerate(), vec![file_id]);
    }

    #[test]
    fn test_split_chains_files() {
        let (fc, mut w) = writer(120);

        for i in 0..10 {
            w.append_op(&put_op(i), 1).unwrap();
        }
        w.flush().unwrap();

        let ids = fc.enumerate();
        assert!(ids.len() > 1, "expected multiple log files after split");

        // Every file after the first must point back at its predecessor
        for pair in ids.windows(2) {
            let file = fc.get_file(pair[1]).unwrap();
            let (kind, header, _) = read_header(file.as_ref()).unwrap();
            assert_eq!(kind, FileKind::TransactionLog);
            assert_eq!(header.previous_log_file, Some(pair[0]));
        }
    }

    #[test]
    fn test_resume_truncates_partial_tail() {
        let (fc, mut w) = writer(64 * 1024);
        let (file_id, _) = w.append_op(&put_op(0), 1).unwrap();
        let (_, good_end) = w.append_op(&put_op(1), 1).unwrap();
        let frame_len = {
            let file = fc.get_file(file_id).unwrap();
            file.size() - good_end
        };
        let good_size = good_end + frame_len;

        // Simulate a torn write after the second record
        let file = fc.get_file(file_id).unwrap();
        file.append(&[0xAA, 0xBB, 0xCC]).unwrap();

        let mut w2 = LogWriter::new(
            Arc::clone(&fc) as Arc<dyn FileCollection>,
            Arc::new(NullLogger),
            64 * 1024,
        );
        w2.resume(file_id, good_size).unwrap();
        assert_eq!(fc.get_file(file_id).unwrap().size(), good_size);
        assert_eq!(w2.position(), Some((file_id, good_size)));
    }
}
