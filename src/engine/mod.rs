// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Ingestion counters
pub mod counters;

pub use counters::{CountersSnapshot, EngineCounters};

use crate::{
    conf::{logger::TumblerLogger, EmitPolicy, LatePolicy, TimeMode, TumblerConf},
    data::{decode::RecordDecoder, AggregateResult, EventRecord, RawRecord, SourcePosition},
    emitter::ResultEmitter,
    error::{RecordResult, TumblerResult},
    util::get_system_time,
    window::{EvictedEntry, TumblingWindows, Window, WindowStore},
};
use crossbeam_utils::CachePadded;
use slog::{debug, info, o, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use tumbler_state::Backend;

/// What became of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The record was counted, `count` is the new count of the pair
    Updated { key: u32, window: Window, count: u64 },
    /// Not a denied transaction with a known failure cause
    Filtered,
    /// Already applied before, according to the committed source offset
    Duplicate,
    /// Its window had expired and [LatePolicy::Drop] is in effect
    LateDropped,
}

/// Counts denied transactions per failure cause in tumbling windows
///
/// The engine is shared between ingestion workers. Every record goes through
/// deduplication, filtering, window assignment and a locked
/// create-increment-emit step on the [WindowStore], after which expired
/// windows are swept on the configured cadence.
pub struct AggregationEngine<B: Backend, E: ResultEmitter> {
    conf: TumblerConf,
    assigner: TumblingWindows,
    store: WindowStore<B>,
    emitter: E,
    /// Highest event timestamp observed
    stream_time: CachePadded<AtomicU64>,
    since_sweep: CachePadded<AtomicU64>,
    counters: EngineCounters,
    logger: TumblerLogger,
}

impl<B: Backend, E: ResultEmitter> AggregationEngine<B, E> {
    pub fn new(
        conf: TumblerConf,
        store: WindowStore<B>,
        emitter: E,
        logger: TumblerLogger,
    ) -> TumblerResult<Self> {
        conf.validate()?;
        let logger = logger.new(o!("component" => "engine"));
        info!(logger, "Starting aggregation engine";
            "window_size_ms" => conf.window_size_ms,
            "grace_period_ms" => conf.grace_period_ms,
            "emit_policy" => ?conf.emit_policy,
            "late_policy" => ?conf.late_policy,
            "time_mode" => ?conf.time_mode);

        Ok(AggregationEngine {
            assigner: TumblingWindows::new(conf.window_size_ms),
            conf,
            store,
            emitter,
            stream_time: CachePadded::new(AtomicU64::new(0)),
            since_sweep: CachePadded::new(AtomicU64::new(0)),
            counters: EngineCounters::new(),
            logger,
        })
    }

    /// Engine on top of the live store at `conf.store_backend_path`
    pub fn open(conf: TumblerConf, emitter: E, logger: TumblerLogger) -> TumblerResult<Self> {
        let store = WindowStore::open(&conf, logger.clone())?;
        Self::new(conf, store, emitter, logger)
    }

    /// Engine on top of the snapshot in `conf.checkpoint_dir`
    pub fn restore(conf: TumblerConf, emitter: E, logger: TumblerLogger) -> TumblerResult<Self> {
        let store = WindowStore::restore(&conf, &conf.checkpoint_dir, logger.clone())?;
        Self::new(conf, store, emitter, logger)
    }

    #[inline]
    pub fn conf(&self) -> &TumblerConf {
        &self.conf
    }

    #[inline]
    pub fn store(&self) -> &WindowStore<B> {
        &self.store
    }

    #[inline]
    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    #[inline]
    pub fn stream_time(&self) -> u64 {
        self.stream_time.load(Ordering::Acquire)
    }

    /// Moves stream time forward, e.g. from a transport watermark
    pub fn advance_stream_time(&self, timestamp: u64) {
        self.stream_time.fetch_max(timestamp, Ordering::AcqRel);
    }

    /// Current time of the expiry clock
    pub fn now(&self) -> u64 {
        match self.conf.time_mode {
            TimeMode::Event => self.stream_time(),
            TimeMode::Process => get_system_time(),
        }
    }

    /// Decodes and processes a raw transport record
    pub fn process_raw<D>(&self, decoder: &D, raw: &RawRecord) -> RecordResult<Outcome>
    where
        D: RecordDecoder + ?Sized,
    {
        match decoder.decode(raw) {
            Ok(record) => self.process(&record),
            Err(err) => {
                self.counters.records_in(1);
                if self.is_duplicate(raw.position)? {
                    self.counters.duplicates(1);
                    return Ok(Ok(Outcome::Duplicate));
                }
                self.counters.decode_errors(1);
                warn!(self.logger, "Skipping undecodable record";
                    "error" => %err, "position" => ?raw.position);
                self.commit(raw.position)?;
                Ok(Err(err))
            }
        }
    }

    /// Processes a single record
    ///
    /// The outer error halts ingestion, the inner one only skips the record.
    pub fn process(&self, record: &EventRecord) -> RecordResult<Outcome> {
        self.counters.records_in(1);
        if self.is_duplicate(record.position)? {
            self.counters.duplicates(1);
            return Ok(Ok(Outcome::Duplicate));
        }

        let outcome = self.apply(record)?;
        self.commit(record.position)?;

        if self.sweep_due() {
            self.sweep()?;
        }

        Ok(outcome)
    }

    /// Counts one processed record, true for every `sweep_every`-th
    fn sweep_due(&self) -> bool {
        let every = self.conf.sweep_every;
        if every == 0 {
            return false;
        }
        let prev = self
            .since_sweep
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |seen| {
                Some((seen + 1) % every)
            });
        match prev {
            Ok(seen) | Err(seen) => seen + 1 == every,
        }
    }

    fn apply(&self, record: &EventRecord) -> RecordResult<Outcome> {
        let key = match record.value.grouping_key() {
            Some(key) => key,
            None => {
                self.counters.filtered(1);
                return Ok(Ok(Outcome::Filtered));
            }
        };

        let window = match self.assigner.assign(record.timestamp) {
            Ok(window) => window,
            Err(err) => {
                self.counters.invalid_timestamps(1);
                warn!(self.logger, "Skipping record"; "error" => %err, "position" => ?record.position);
                return Ok(Err(err));
            }
        };

        let timestamp = record.timestamp as u64;
        if self.conf.time_mode == TimeMode::Event {
            self.advance_stream_time(timestamp);
        }

        if self.conf.late_policy == LatePolicy::Drop
            && window.is_expired(self.now(), self.conf.grace_period_ms)
        {
            self.counters.late_dropped(1);
            debug!(self.logger, "Dropping late record"; "window" => %window, "key" => key);
            return Ok(Ok(Outcome::LateDropped));
        }

        let entry = self.store.lock(key, window);
        let previous = entry.get()?;
        if previous.is_none() {
            entry.get_or_create()?;
        }
        let count = entry.increment(1, timestamp)?;
        if self.conf.emit_policy == EmitPolicy::Continuous {
            let update = AggregateResult::new(key, count, window, false);
            if let Err(err) = self.emitter.emit(update) {
                // The offset stays uncommitted, a redelivery counts the record once
                entry.reset(previous)?;
                warn!(self.logger, "Undid update after failed emit";
                    "key" => key, "window" => %window, "error" => %err);
                return Err(err);
            }
            self.counters.updates_emitted(1);
        }

        Ok(Ok(Outcome::Updated { key, window, count }))
    }

    fn is_duplicate(&self, position: Option<SourcePosition>) -> TumblerResult<bool> {
        match position {
            Some(pos) => Ok(self
                .store
                .committed_offset(pos.partition)?
                .map_or(false, |committed| pos.offset <= committed)),
            None => Ok(false),
        }
    }

    fn commit(&self, position: Option<SourcePosition>) -> TumblerResult<()> {
        match position {
            Some(pos) => self.store.commit_offset(pos.partition, pos.offset),
            None => Ok(()),
        }
    }

    /// Evicts every expired entry, emitting final values if configured
    pub fn sweep(&self) -> TumblerResult<Vec<EvictedEntry>> {
        let now = self.now();
        let emit_final = self.conf.emits_final();
        self.counters.sweeps(1);
        let evicted = self
            .store
            .evict_expired_with(now, self.conf.grace_period_ms, |evicted| {
                if emit_final {
                    self.emitter.emit(evicted.to_final())?;
                    self.counters.finals_emitted(1);
                }
                Ok(())
            })?;

        if !evicted.is_empty() {
            self.counters.evicted(evicted.len() as u64);
            debug!(self.logger, "Sweep finished"; "now" => now, "evicted" => evicted.len());
        }
        Ok(evicted)
    }

    /// Writes a snapshot of the store to `conf.checkpoint_dir`
    pub fn snapshot(&self) -> TumblerResult<()> {
        self.store.snapshot(&self.conf.checkpoint_dir)
    }

    /// Flushes and snapshots the store
    pub fn shutdown(&self) -> TumblerResult<()> {
        self.snapshot()?;
        let counters = self.counters();
        info!(self.logger, "Aggregation engine shut down";
            "records_in" => counters.records_in,
            "updates_emitted" => counters.updates_emitted,
            "finals_emitted" => counters.finals_emitted);
        Ok(())
    }
}
