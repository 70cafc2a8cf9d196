#![no_main]

use burrowdb_wal::record::LogOp;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // Try to decode a log record - should never panic
    let _ = LogOp::decode(data);
});
