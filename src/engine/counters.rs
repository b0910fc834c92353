// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

#[cfg(feature = "metrics")]
use metrics::{counter, register_counter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Ingestion counters of an engine
///
/// With the `metrics` feature enabled every bump is mirrored to the
/// installed metrics recorder under `tumbler_<name>`.
#[derive(Debug, Default)]
pub struct EngineCounters {
    records_in: AtomicU64,
    filtered: AtomicU64,
    decode_errors: AtomicU64,
    invalid_timestamps: AtomicU64,
    late_dropped: AtomicU64,
    duplicates: AtomicU64,
    updates_emitted: AtomicU64,
    finals_emitted: AtomicU64,
    evicted: AtomicU64,
    sweeps: AtomicU64,
}

/// A point in time copy of [EngineCounters]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub records_in: u64,
    pub filtered: u64,
    pub decode_errors: u64,
    pub invalid_timestamps: u64,
    pub late_dropped: u64,
    pub duplicates: u64,
    pub updates_emitted: u64,
    pub finals_emitted: u64,
    pub evicted: u64,
    pub sweeps: u64,
}

macro_rules! counter_ops {
    ($($field:ident => $name:literal),* $(,)?) => {
        impl EngineCounters {
            pub fn new() -> Self {
                #[cfg(feature = "metrics")]
                {
                    $(register_counter!(concat!("tumbler_", $name));)*
                }
                Self::default()
            }

            $(
                #[inline]
                pub(crate) fn $field(&self, n: u64) {
                    self.$field.fetch_add(n, Ordering::Relaxed);
                    #[cfg(feature = "metrics")]
                    counter!(concat!("tumbler_", $name), n);
                }
            )*

            pub fn snapshot(&self) -> CountersSnapshot {
                CountersSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counter_ops!(
    records_in => "records_in",
    filtered => "filtered",
    decode_errors => "decode_errors",
    invalid_timestamps => "invalid_timestamps",
    late_dropped => "late_dropped",
    duplicates => "duplicates",
    updates_emitted => "updates_emitted",
    finals_emitted => "finals_emitted",
    evicted => "evicted",
    sweeps => "sweeps",
);
