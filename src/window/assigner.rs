// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::Window;
use crate::error::RecordError;

/// Window Assigner for tumbling windows
///
/// Windows are aligned to multiples of the window size from epoch, so the
/// same timestamp always maps to the same window no matter when or how often
/// it is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingWindows {
    size_ms: u64,
}

impl TumblingWindows {
    pub fn new(size_ms: u64) -> Self {
        // Sanity check on length
        if size_ms == 0 {
            panic!("Window size must be positive");
        }
        TumblingWindows { size_ms }
    }

    #[inline]
    pub fn size_ms(&self) -> u64 {
        self.size_ms
    }

    /// Returns the single window containing `timestamp`
    ///
    /// A timestamp equal to a window's end belongs to the next window.
    #[inline]
    pub fn assign(&self, timestamp: i64) -> Result<Window, RecordError> {
        if timestamp < 0 {
            return Err(RecordError::InvalidTimestamp { timestamp });
        }
        let ts = timestamp as u64;
        let start = ts - ts % self.size_ms;
        match start.checked_add(self.size_ms) {
            Some(end) => Ok(Window::new(start, end)),
            None => Err(RecordError::InvalidTimestamp { timestamp }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const SIZE: u64 = 60_000;

    #[test]
    fn assign_aligns_to_epoch() {
        let windows = TumblingWindows::new(SIZE);
        let w = windows.assign(1_553_120_535_123).unwrap();
        assert_eq!(w, Window::new(1_553_120_520_000, 1_553_120_580_000));

        let first = windows.assign(0).unwrap();
        assert_eq!(first, Window::new(0, SIZE));
    }

    #[test]
    fn window_end_belongs_to_next_window() {
        let windows = TumblingWindows::new(SIZE);
        let closing = windows.assign(1_553_120_579_999).unwrap();
        let next = windows.assign(1_553_120_580_000).unwrap();

        assert_eq!(closing.end, 1_553_120_580_000);
        assert_eq!(next.start, closing.end);
        assert!(!closing.contains(1_553_120_580_000));
    }

    #[test]
    fn every_timestamp_lies_inside_its_window() {
        let windows = TumblingWindows::new(SIZE);
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let ts: i64 = rng.gen_range(0, 4_000_000_000_000);
            let w = windows.assign(ts).unwrap();
            assert!(w.start <= ts as u64 && (ts as u64) < w.end);
            assert_eq!(w.size(), SIZE);
            assert_eq!(w.start % SIZE, 0);
            // replaying the same timestamp gives the same window
            assert_eq!(windows.assign(ts).unwrap(), w);
        }
    }

    #[test]
    fn negative_timestamps_are_rejected() {
        let windows = TumblingWindows::new(SIZE);
        assert_eq!(
            windows.assign(-1),
            Err(RecordError::InvalidTimestamp { timestamp: -1 })
        );
    }

    #[test]
    #[should_panic]
    fn zero_sized_windows_are_rejected() {
        let _ = TumblingWindows::new(0);
    }
}
