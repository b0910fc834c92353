// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Maps event timestamps to tumbling windows
pub mod assigner;
/// Keyed window state on top of a state backend
pub mod store;

pub use assigner::TumblingWindows;
pub use store::{EntryGuard, EvictedEntry, WindowStore};

use std::fmt;

/// A half-open time interval `[start, end)` in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start < end, "empty window [{}, {})", start, end);
        Window { start, end }
    }

    #[inline]
    pub fn contains(&self, timestamp: u64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the window is past its retention horizon at `now`
    #[inline]
    pub fn is_expired(&self, now: u64, grace_period_ms: u64) -> bool {
        self.end.saturating_add(grace_period_ms) <= now
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
