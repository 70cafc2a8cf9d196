// Shared test helpers.

use burrowdb::DbLogger;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Logger that counts engine events for assertions.
#[derive(Default)]
pub struct CountingLogger {
    pub warnings: Mutex<Vec<String>>,
    pub files_marked: AtomicUsize,
    pub leaks: Mutex<Vec<String>>,
    pub kvi_created: AtomicUsize,
    pub logs_created: AtomicUsize,
}

// Not every test binary touches every counter
#[allow(dead_code)]
impl CountingLogger {
    pub fn warning_count(&self) -> usize {
        self.warnings.lock().unwrap().len()
    }

    pub fn marked_count(&self) -> usize {
        self.files_marked.load(Ordering::SeqCst)
    }

    pub fn leak_count(&self) -> usize {
        self.leaks.lock().unwrap().len()
    }
}

impl DbLogger for CountingLogger {
    fn transaction_log_created(&self, _file_id: u64) {
        self.logs_created.fetch_add(1, Ordering::SeqCst);
    }

    fn file_marked_for_delete(&self, _file_id: u64) {
        self.files_marked.fetch_add(1, Ordering::SeqCst);
    }

    fn key_value_index_created(
        &self,
        _file_id: u64,
        _pair_count: u64,
        _bytes: u64,
        _elapsed: Duration,
    ) {
        self.kvi_created.fetch_add(1, Ordering::SeqCst);
    }

    fn report_transaction_leak(&self, description: &str, _age: Duration) {
        self.leaks.lock().unwrap().push(description.to_string());
    }

    fn log_warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}
