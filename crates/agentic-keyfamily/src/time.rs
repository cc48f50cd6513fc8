//! Time utilities for AgenticKeyFamily.
//!
//! Wall-clock times are Unix epoch seconds (`i64`), matching the
//! granularity that chain links carry. A validity end of `0` means the
//! window has no upper bound.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Return the current time as seconds since Unix epoch.
///
/// A clock set before the epoch reads as `0`.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Convert Unix seconds to an RFC 3339 string.
pub fn unix_to_rfc3339(secs: i64) -> String {
    let dt = chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default();
    dt.to_rfc3339()
}

/// A point in an identity's history, measured on two clocks at once.
///
/// `unix` is the wall-clock time the link claims, which may be skewed.
/// `chain` is the global chain sequence number, which every client agrees
/// on. Ordering compares `chain` first; `unix` only breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DualTime {
    /// Wall-clock seconds since epoch.
    pub unix: i64,
    /// Chain sequence number.
    pub chain: u64,
}

impl DualTime {
    pub fn new(unix: i64, chain: u64) -> Self {
        Self { unix, chain }
    }

    /// Did this happen strictly before `other` in chain order?
    pub fn happened_before(&self, other: &DualTime) -> bool {
        self < other
    }
}

impl PartialOrd for DualTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DualTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chain
            .cmp(&other.chain)
            .then_with(|| self.unix.cmp(&other.unix))
    }
}

impl std::fmt::Display for DualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (chain #{})", unix_to_rfc3339(self.unix), self.chain)
    }
}
