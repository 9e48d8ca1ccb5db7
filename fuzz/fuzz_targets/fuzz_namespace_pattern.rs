//! Fuzz target for namespace pattern compilation and matching.
//!
//! Arbitrary patterns must compile or fail with a configuration error,
//! and reserved namespaces must never match.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oplog_sync::{Namespace, NamespaceFilter};

fuzz_target!(|data: (&str, &str, &str)| {
    let (pattern, db, coll) = data;
    let candidate = Namespace::new(db, coll);
    let known = [candidate.clone(), Namespace::new("admin", "users")];

    // Should never panic
    if let Ok(filter) = NamespaceFilter::compile(&known, &[pattern]) {
        if candidate.is_reserved() {
            assert!(!filter.matches(&candidate));
        }
        assert!(!filter.matches(&Namespace::new("admin", "users")));
    }
});
