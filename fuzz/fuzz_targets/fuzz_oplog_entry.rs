//! Fuzz target for raw oplog entry conversion.
//!
//! Arbitrary JSON must either convert or produce a parse error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oplog_sync::ChangeRecord;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Should never panic
    if let Ok(record) = ChangeRecord::from_oplog_json(&raw) {
        let _ = record.op.is_mutation();
        let _ = record.namespace.is_reserved();
    }
});
