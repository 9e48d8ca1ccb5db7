// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-log positions.
//!
//! A [`Watermark`] is the oplog timestamp of a record: seconds since the
//! Unix epoch plus an ordinal that orders operations within the same second.
//! Watermarks compare by time first, then ordinal, and pack losslessly into
//! a `u64` as `time << 32 | ordinal`.
//!
//! ```text
//! 1700000000:3  <  1700000000:4  <  1700000001:0
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A totally-ordered position in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    /// Seconds since the Unix epoch.
    pub time: u32,
    /// Incrementing ordinal for operations within `time`.
    pub ordinal: u32,
}

impl Watermark {
    /// The position before every record.
    pub const ZERO: Watermark = Watermark { time: 0, ordinal: 0 };

    pub const fn new(time: u32, ordinal: u32) -> Self {
        Self { time, ordinal }
    }

    /// Pack into the 64-bit oplog timestamp layout.
    pub const fn as_u64(&self) -> u64 {
        ((self.time as u64) << 32) | self.ordinal as u64
    }

    /// Unpack from the 64-bit oplog timestamp layout.
    pub const fn from_u64(packed: u64) -> Self {
        Self {
            time: (packed >> 32) as u32,
            ordinal: packed as u32,
        }
    }

    /// Seconds between this watermark and a later one.
    ///
    /// Returns 0 if `later` is actually behind us.
    pub fn lag_secs(&self, later: &Watermark) -> u64 {
        (later.time as u64).saturating_sub(self.time as u64)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.time, self.ordinal)
    }
}

/// Error returned when a watermark string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid watermark '{0}': expected TIME:ORDINAL, TIME-ORDINAL or a packed integer")]
pub struct ParseWatermarkError(pub String);

impl FromStr for Watermark {
    type Err = ParseWatermarkError;

    /// Accepts `time:ordinal`, `time-ordinal`, or a packed `u64`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ParseWatermarkError(s.to_string());

        match s.split_once([':', '-']) {
            Some((time, ordinal)) => {
                let time = time.parse().map_err(|_| err())?;
                let ordinal = ordinal.parse().map_err(|_| err())?;
                Ok(Watermark::new(time, ordinal))
            }
            None => s.parse::<u64>().map(Watermark::from_u64).map_err(|_| err()),
        }
    }
}
