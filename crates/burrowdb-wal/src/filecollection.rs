// File collection abstraction - a named set of append-only, growable,
// truncatable binary files. Leaf dependency for the log, the value store
// and the snapshot writer.

use burrowdb_core::{Error, FileId, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// A single append-only file inside a collection.
pub trait CollectionFile: Send + Sync {
    /// Identifier of this file within its collection.
    fn id(&self) -> FileId;

    /// Append `data` at the end; returns the offset the data starts at.
    fn append(&self, data: &[u8]) -> Result<u64>;

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// The returned buffer is shorter than `len` when the file ends first;
    /// callers treat a short read as truncation, not as a hard error.
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Current size in bytes.
    fn size(&self) -> u64;

    /// Grow or shrink the file to exactly `n` bytes.
    fn set_size(&self, n: u64) -> Result<()>;

    /// Make all appended data durable.
    fn flush(&self) -> Result<()>;
}

/// A named set of collection files with monotonic ids.
pub trait FileCollection: Send + Sync {
    /// Create a new empty file with the next id.
    fn create_file(&self) -> Result<Arc<dyn CollectionFile>>;

    /// Look up an existing file.
    fn get_file(&self, id: FileId) -> Option<Arc<dyn CollectionFile>>;

    /// All file ids currently in the collection, in ascending order.
    fn enumerate(&self) -> Vec<FileId>;

    /// Remove a file from the collection.
    fn remove(&self, id: FileId) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct InMemoryFile {
    id: FileId,
    data: RwLock<Vec<u8>>,
}

impl CollectionFile for InMemoryFile {
    fn id(&self) -> FileId {
        self.id
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut buf = self.data.write().map_err(|_| Error::LockPoisoned)?;
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let buf = self.data.read().map_err(|_| Error::LockPoisoned)?;
        let start = (offset as usize).min(buf.len());
        let end = (start + len).min(buf.len());
        Ok(buf[start..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.data.read().map(|b| b.len() as u64).unwrap_or(0)
    }

    fn set_size(&self, n: u64) -> Result<()> {
        let mut buf = self.data.write().map_err(|_| Error::LockPoisoned)?;
        buf.resize(n as usize, 0);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Volatile file collection holding everything in memory.
///
/// Used by tests and by databases that do not need to survive the process.
#[derive(Default)]
pub struct InMemoryFileCollection {
    files: Mutex<HashMap<FileId, Arc<InMemoryFile>>>,
    next_id: AtomicU64,
}

impl InMemoryFileCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl FileCollection for InMemoryFileCollection {
    fn create_file(&self) -> Result<Arc<dyn CollectionFile>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let file = Arc::new(InMemoryFile {
            id,
            data: RwLock::new(Vec::new()),
        });
        self.files
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .insert(id, Arc::clone(&file));
        Ok(file)
    }

    fn get_file(&self, id: FileId) -> Option<Arc<dyn CollectionFile>> {
        self.files
            .lock()
            .ok()?
            .get(&id)
            .map(|f| Arc::clone(f) as Arc<dyn CollectionFile>)
    }

    fn enumerate(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self
            .files
            .lock()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn remove(&self, id: FileId) -> Result<()> {
        self.files
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }
}

// ---------------------------------------------------------------------------
// On-disk implementation
// ---------------------------------------------------------------------------

// Files are named {id:016x}.bdb inside the collection directory.
const FILE_EXTENSION: &str = "bdb";

struct OnDiskFile {
    id: FileId,
    path: PathBuf,
    file: Mutex<File>,
    size: AtomicU64,
}

impl CollectionFile for OnDiskFile {
    fn id(&self) -> FileId {
        self.id
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut file = self.file.lock().map_err(|_| Error::LockPoisoned)?;
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        self.size.store(offset + data.len() as u64, Ordering::SeqCst);
        Ok(offset)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock().map_err(|_| Error::LockPoisoned)?;
        let end = file.seek(SeekFrom::End(0))?;
        if offset >= end {
            return Ok(Vec::new());
        }
        let avail = ((end - offset) as usize).min(len);
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; avail];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    fn set_size(&self, n: u64) -> Result<()> {
        let file = self.file.lock().map_err(|_| Error::LockPoisoned)?;
        file.set_len(n)?;
        self.size.store(n, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut file = self.file.lock().map_err(|_| Error::LockPoisoned)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

/// Durable file collection backed by a directory.
pub struct OnDiskFileCollection {
    dir: PathBuf,
    files: Mutex<HashMap<FileId, Arc<OnDiskFile>>>,
    next_id: AtomicU64,
}

impl OnDiskFileCollection {
    /// Open the collection at `dir`, creating the directory if missing and
    /// registering every `{id:016x}.bdb` file already present.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("Failed to create collection dir: {}", e)))?;

        let mut files = HashMap::new();
        let mut max_id = 0u64;
        for entry in fs::read_dir(&dir)
            .map_err(|e| Error::Storage(format!("Failed to read collection dir: {}", e)))?
        {
            let entry = entry.map_err(Error::Io)?;
            let path = entry.path();
            let Some(id) = Self::parse_file_id(&path) else {
                continue;
            };
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            let size = file.metadata()?.len();
            files.insert(
                id,
                Arc::new(OnDiskFile {
                    id,
                    path,
                    file: Mutex::new(file),
                    size: AtomicU64::new(size),
                }),
            );
            max_id = max_id.max(id);
        }

        Ok(Self {
            dir,
            files: Mutex::new(files),
            next_id: AtomicU64::new(max_id + 1),
        })
    }

    fn parse_file_id(path: &Path) -> Option<FileId> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(&format!(".{}", FILE_EXTENSION))?;
        u64::from_str_radix(stem, 16).ok()
    }

    fn path_for(&self, id: FileId) -> PathBuf {
        self.dir.join(format!("{:016x}.{}", id, FILE_EXTENSION))
    }
}

impl FileCollection for OnDiskFileCollection {
    fn create_file(&self) -> Result<Arc<dyn CollectionFile>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = self.path_for(id);
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to create file {:?}: {}", path, e)))?;
        let handle = Arc::new(OnDiskFile {
            id,
            path,
            file: Mutex::new(file),
            size: AtomicU64::new(0),
        });
        self.files
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    fn get_file(&self, id: FileId) -> Option<Arc<dyn CollectionFile>> {
        self.files
            .lock()
            .ok()?
            .get(&id)
            .map(|f| Arc::clone(f) as Arc<dyn CollectionFile>)
    }

    fn enumerate(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self
            .files
            .lock()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn remove(&self, id: FileId) -> Result<()> {
        let handle = self
            .files
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .remove(&id)
            .ok_or(Error::NotFound)?;
        fs::remove_file(&handle.path)
            .map_err(|e| Error::Storage(format!("Failed to delete {:?}: {}", handle.path, e)))?;
        Ok(())
    }
}
