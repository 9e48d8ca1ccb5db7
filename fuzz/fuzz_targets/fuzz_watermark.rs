//! Fuzz target for watermark parsing and lag calculation.
//!
//! This tests that parsing never panics on arbitrary input and that any
//! parsed watermark survives a display round trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oplog_sync::Watermark;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    // Should never panic
    let parsed_a = a.parse::<Watermark>();
    let parsed_b = b.parse::<Watermark>();

    if let Ok(w) = parsed_a {
        assert_eq!(w.to_string().parse::<Watermark>().ok(), Some(w));
    }

    if let (Ok(a), Ok(b)) = (parsed_a, parsed_b) {
        let _ = a.lag_secs(&b);
        let _ = b.lag_secs(&a);
    }
});
