// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::{
    conf::logger::TumblerLogger,
    error::{StateResult, TumblerResult},
};
use slog::{error, warn};
use std::{
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[inline]
pub fn get_system_time() -> u64 {
    let start = SystemTime::now();
    let since_the_epoch = start
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_millis(0));

    since_the_epoch.as_millis() as u64
}

/// Bounded retry with exponential backoff for storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    /// Sleep before the first retry, doubled on every following one
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        RetryPolicy { retries, backoff }
    }

    pub fn none() -> Self {
        RetryPolicy::new(0, Duration::from_millis(0))
    }

    /// Runs `op` until it succeeds, fails with a non-transient error or the
    /// retries are used up
    pub fn run<T>(
        &self,
        logger: &TumblerLogger,
        what: &str,
        mut op: impl FnMut() -> StateResult<T>,
    ) -> TumblerResult<T> {
        let mut attempt = 0;
        let mut backoff = self.backoff;
        loop {
            match op() {
                Ok(res) => return Ok(res),
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(logger, "Transient storage error during {}, retrying", what;
                        "attempt" => attempt, "error" => %err);
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => {
                    error!(logger, "Storage error during {}", what; "error" => %err);
                    return Err(err.into());
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_millis(10))
    }
}

/// Logger that drops everything, for tests
#[cfg(test)]
pub(crate) fn test_logger() -> TumblerLogger {
    slog::Logger::root(slog::Discard, slog::o!())
}
