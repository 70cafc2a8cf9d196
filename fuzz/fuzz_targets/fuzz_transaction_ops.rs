#![no_main]

use arbitrary::Arbitrary;
use burrowdb::{KeyValueDB, KeyValueDBOptions};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum TxOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Find { key: Vec<u8> },
    EraseCurrent,
    EraseRange { first: u8, last: u8 },
    SetPrefix { prefix: Vec<u8> },
    SetKeyIndex { index: u8 },
    Commit,
}

fuzz_target!(|ops: Vec<TxOp>| {
    let Ok(db) = KeyValueDB::open(KeyValueDBOptions::in_memory()) else {
        return;
    };
    let Ok(mut tx) = db.start_transaction() else {
        return;
    };

    for op in ops.iter().take(100) {
        // Limit operations to prevent timeout
        match op {
            TxOp::Put { key, value } => {
                if key.len() <= 1024 && value.len() <= 1024 {
                    let _ = tx.create_or_update_key_value(key, value);
                }
            }
            TxOp::Find { key } => {
                if key.len() <= 1024 {
                    let _ = tx.find(key);
                    let _ = tx.get_key();
                    let _ = tx.get_value();
                }
            }
            TxOp::EraseCurrent => {
                let _ = tx.erase_current();
            }
            TxOp::EraseRange { first, last } => {
                let _ = tx.erase_range(*first as u64, *last as u64);
            }
            TxOp::SetPrefix { prefix } => {
                if prefix.len() <= 64 {
                    tx.set_key_prefix(prefix);
                }
            }
            TxOp::SetKeyIndex { index } => {
                let _ = tx.set_key_index(*index as u64);
            }
            TxOp::Commit => {
                let _ = tx.commit();
                match db.start_transaction() {
                    Ok(next) => tx = next,
                    Err(_) => return,
                }
            }
        }
    }
});
