#![no_main]

use burrowdb_wal::filecollection::{FileCollection, InMemoryFileCollection};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // An arbitrary byte blob must never panic the snapshot reader
    let fc = InMemoryFileCollection::new();
    let Ok(file) = fc.create_file() else { return };
    if file.append(data).is_err() {
        return;
    }
    let _ = burrowdb_snapshot::read_kvi(&file);
});
