// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::Window;
use crate::{
    conf::{logger::TumblerLogger, TumblerConf},
    data::{AggregateEntry, AggregateResult},
    error::{Corruption, Error, TumblerResult},
    reportable_error,
    util::RetryPolicy,
};
use crossbeam_utils::CachePadded;
use slog::{debug, info};
use snafu::ensure;
use std::{
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tumbler_state::{
    serialization::{fixed_bytes, protobuf},
    Backend,
};

/// Tree holding one [AggregateEntry] per grouping key and window
pub const AGGREGATES_TREE: &str = "window_aggregates";
/// Tree holding the highest processed offset per source partition
pub const OFFSETS_TREE: &str = "source_offsets";

/// Stored key of an entry: `(window end, window start, grouping key)`
///
/// Big-endian encoding keeps the tree sorted by window end, so everything up to
/// an expiry cutoff is a prefix of the tree and everything of one window
/// shares a prefix.
type StoreKey = (u64, u64, u32);

#[inline]
fn store_key(key: u32, window: Window) -> TumblerResult<Vec<u8>> {
    Ok(fixed_bytes::serialize::<StoreKey>(&(window.end, window.start, key))?)
}

#[inline]
fn window_prefix(window: Window) -> TumblerResult<Vec<u8>> {
    Ok(fixed_bytes::serialize(&(window.end, window.start))?)
}

fn decode_store_key(bytes: &[u8]) -> TumblerResult<(u32, Window)> {
    let (end, start, key) = fixed_bytes::deserialize::<StoreKey>(bytes)?;
    ensure!(
        start < end,
        Corruption {
            msg: format!("stored window [{}, {}) is empty", start, end),
        }
    );
    Ok((key, Window::new(start, end)))
}

#[inline]
fn decode_entry(bytes: &[u8]) -> TumblerResult<AggregateEntry> {
    Ok(protobuf::deserialize(bytes)?)
}

/// An entry removed by [WindowStore::evict_expired]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictedEntry {
    pub key: u32,
    pub window: Window,
    pub entry: AggregateEntry,
}

impl EvictedEntry {
    /// The final result of the evicted entry
    pub fn to_final(&self) -> AggregateResult {
        AggregateResult::new(self.key, self.entry.count, self.window, true)
    }
}

/// Durable map from `(grouping key, window)` to [AggregateEntry]
///
/// Mutations of a pair are serialised through a fixed set of lock stripes.
/// The engine holds an [EntryGuard] across its create, increment and emit
/// steps so that the three happen as one, and eviction takes the same stripe
/// before it removes an entry.
pub struct WindowStore<B: Backend> {
    backend: B,
    stripes: Box<[CachePadded<Mutex<()>>]>,
    retry: RetryPolicy,
    logger: TumblerLogger,
}

impl<B: Backend> WindowStore<B> {
    pub fn new(backend: B, lock_stripes: usize, retry: RetryPolicy, logger: TumblerLogger) -> Self {
        let stripes = (0..lock_stripes.max(1))
            .map(|_| CachePadded::new(Mutex::new(())))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        WindowStore {
            backend,
            stripes,
            retry,
            logger,
        }
    }

    /// Open the live store found at `conf.store_backend_path`
    pub fn open(conf: &TumblerConf, logger: TumblerLogger) -> TumblerResult<Self> {
        let retry = conf.retry_policy();
        let path = conf.store_backend_path.as_path();
        let backend = retry.run(&logger, "open", || B::create(path))?;
        info!(logger, "Opened window store"; "path" => %path.display());
        Ok(Self::new(backend, conf.lock_stripes, retry, logger))
    }

    /// Open the live store at `conf.store_backend_path` and replace its content
    /// with the snapshot found in `checkpoint_path`
    pub fn restore(
        conf: &TumblerConf,
        checkpoint_path: impl AsRef<Path>,
        logger: TumblerLogger,
    ) -> TumblerResult<Self> {
        let retry = conf.retry_policy();
        let live = conf.store_backend_path.as_path();
        let checkpoint = checkpoint_path.as_ref();
        let backend = retry.run(&logger, "restore", || B::restore(live, checkpoint))?;
        let store = Self::new(backend, conf.lock_stripes, retry, logger);
        let entries = store.len()?;
        info!(store.logger, "Restored window store";
            "checkpoint" => %checkpoint.display(), "entries" => entries);
        Ok(store)
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn was_restored(&self) -> bool {
        self.backend.was_restored()
    }

    fn stripe(&self, key: u32, window: Window) -> &Mutex<()> {
        let idx = fxhash::hash64(&(key, window)) as usize % self.stripes.len();
        &self.stripes[idx]
    }

    fn lock_stripe(&self, key: u32, window: Window) -> MutexGuard<'_, ()> {
        // The stripes guard no data, a poisoned one is as good as a healthy one
        self.stripe(key, window)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lock of the `(key, window)` pair
    pub fn lock(&self, key: u32, window: Window) -> EntryGuard<'_, B> {
        EntryGuard {
            _stripe: self.lock_stripe(key, window),
            store: self,
            key,
            window,
        }
    }

    /// Returns the entry of the pair, creating it with a zero count if absent
    pub fn get_or_create(&self, key: u32, window: Window) -> TumblerResult<AggregateEntry> {
        self.lock(key, window).get_or_create()
    }

    /// Adds `delta` to the count of the pair and returns the new count
    ///
    /// Fails with [Error::EntryNotFound] if the pair was never created.
    pub fn increment(
        &self,
        key: u32,
        window: Window,
        delta: u64,
        timestamp: u64,
    ) -> TumblerResult<u64> {
        self.lock(key, window).increment(delta, timestamp)
    }

    /// Point lookup that never creates an entry
    pub fn get(&self, key: u32, window: Window) -> TumblerResult<Option<AggregateEntry>> {
        let k = store_key(key, window)?;
        let res = self
            .retry
            .run(&self.logger, "get", || self.backend.get(AGGREGATES_TREE, &k))?;
        res.as_deref().map(decode_entry).transpose()
    }

    /// Every entry of `window`, ordered by grouping key
    pub fn scan_window(&self, window: Window) -> TumblerResult<Vec<(u32, AggregateEntry)>> {
        let prefix = window_prefix(window)?;
        let pairs = self.retry.run(&self.logger, "scan", || {
            self.backend.scan_prefix(AGGREGATES_TREE, &prefix)
        })?;

        pairs
            .iter()
            .map(|(k, v)| {
                let (key, _) = decode_store_key(k)?;
                Ok((key, decode_entry(v)?))
            })
            .collect()
    }

    /// Removes and returns every entry with `window.end + grace_period_ms <= now`
    pub fn evict_expired(&self, now: u64, grace_period_ms: u64) -> TumblerResult<Vec<EvictedEntry>> {
        self.evict_expired_with(now, grace_period_ms, |_| Ok(()))
    }

    /// Like [WindowStore::evict_expired], calling `on_evict` for every entry
    /// before it is removed, while the pair's lock is held
    ///
    /// An entry whose `on_evict` fails stays in the store and is handed out
    /// again by the next eviction.
    pub fn evict_expired_with(
        &self,
        now: u64,
        grace_period_ms: u64,
        mut on_evict: impl FnMut(&EvictedEntry) -> TumblerResult<()>,
    ) -> TumblerResult<Vec<EvictedEntry>> {
        let cutoff = match now.checked_sub(grace_period_ms) {
            Some(cutoff) => cutoff,
            None => return Ok(Vec::new()),
        };

        // Expired windows have `end <= cutoff`, which are the keys below `cutoff + 1`
        let candidates = match cutoff.checked_add(1) {
            Some(bound) => {
                let end = fixed_bytes::serialize(&bound)?;
                self.retry.run(&self.logger, "expiry scan", || {
                    self.backend.scan_range(AGGREGATES_TREE, &[], &end)
                })?
            }
            None => self.retry.run(&self.logger, "expiry scan", || {
                self.backend.scan_prefix(AGGREGATES_TREE, &[])
            })?,
        };

        let mut evicted = Vec::with_capacity(candidates.len());
        for (k, _) in candidates {
            let (key, window) = decode_store_key(&k)?;
            let _stripe = self.lock_stripe(key, window);
            let current = self
                .retry
                .run(&self.logger, "evict", || self.backend.get(AGGREGATES_TREE, &k))?;
            // Gone already if another sweep got here first
            if let Some(bytes) = current {
                let entry = EvictedEntry {
                    key,
                    window,
                    entry: decode_entry(&bytes)?,
                };
                on_evict(&entry)?;
                self.retry
                    .run(&self.logger, "evict", || self.backend.remove(AGGREGATES_TREE, &k))?;
                evicted.push(entry);
            }
        }

        if !evicted.is_empty() {
            debug!(self.logger, "Evicted expired entries";
                "evicted" => evicted.len(), "now" => now, "cutoff" => cutoff);
        }
        Ok(evicted)
    }

    /// Highest offset of `partition` whose record has been fully applied
    pub fn committed_offset(&self, partition: u32) -> TumblerResult<Option<u64>> {
        let k = fixed_bytes::serialize(&partition)?;
        let res = self
            .retry
            .run(&self.logger, "offset lookup", || self.backend.get(OFFSETS_TREE, &k))?;
        match res {
            Some(bytes) => Ok(Some(fixed_bytes::deserialize::<u64>(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Records `offset` as applied, the committed offset never moves backwards
    pub fn commit_offset(&self, partition: u32, offset: u64) -> TumblerResult<()> {
        let k = fixed_bytes::serialize(&partition)?;
        let new = fixed_bytes::serialize(&offset)?;
        self.retry.run(&self.logger, "offset commit", || {
            self.backend.update(OFFSETS_TREE, &k, &mut |old: Option<&[u8]>| {
                let current = old.and_then(|bytes| fixed_bytes::deserialize::<u64>(bytes).ok());
                if current >= Some(offset) {
                    old.map(<[u8]>::to_vec)
                } else {
                    Some(new.clone())
                }
            })
        })?;
        Ok(())
    }

    /// Flush and write a snapshot of every entry and offset to `checkpoint_dir`
    pub fn snapshot(&self, checkpoint_dir: impl AsRef<Path>) -> TumblerResult<()> {
        let dir = checkpoint_dir.as_ref();
        self.flush()?;
        self.retry
            .run(&self.logger, "snapshot", || self.backend.checkpoint(dir))?;
        info!(self.logger, "Snapshot written"; "dir" => %dir.display());
        Ok(())
    }

    pub fn flush(&self) -> TumblerResult<()> {
        self.retry.run(&self.logger, "flush", || self.backend.flush())
    }

    /// Amount of live entries
    pub fn len(&self) -> TumblerResult<usize> {
        self.retry
            .run(&self.logger, "len", || self.backend.len(AGGREGATES_TREE))
    }

    pub fn is_empty(&self) -> TumblerResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Exclusive access to one `(grouping key, window)` pair
///
/// Dropping the guard releases the pair's lock stripe.
pub struct EntryGuard<'a, B: Backend> {
    _stripe: MutexGuard<'a, ()>,
    store: &'a WindowStore<B>,
    key: u32,
    window: Window,
}

impl<'a, B: Backend> EntryGuard<'a, B> {
    #[inline]
    pub fn key(&self) -> u32 {
        self.key
    }

    #[inline]
    pub fn window(&self) -> Window {
        self.window
    }

    pub fn get(&self) -> TumblerResult<Option<AggregateEntry>> {
        self.store.get(self.key, self.window)
    }

    pub fn get_or_create(&self) -> TumblerResult<AggregateEntry> {
        let store = self.store;
        let k = store_key(self.key, self.window)?;
        let fresh = protobuf::serialize(&AggregateEntry::default())?;

        let res = store.retry.run(&store.logger, "get_or_create", || {
            store.backend.update(AGGREGATES_TREE, &k, &mut |old: Option<&[u8]>| {
                Some(old.map_or_else(|| fresh.clone(), <[u8]>::to_vec))
            })
        })?;

        match res {
            Some(bytes) => decode_entry(&bytes),
            None => reportable_error!(
                "get_or_create of key {} in window {} left no entry",
                self.key,
                self.window
            ),
        }
    }

    /// Adds `delta` to the count and moves `last_updated` forward to `timestamp`
    pub fn increment(&self, delta: u64, timestamp: u64) -> TumblerResult<u64> {
        let store = self.store;
        let k = store_key(self.key, self.window)?;

        let current = store
            .retry
            .run(&store.logger, "increment", || store.backend.get(AGGREGATES_TREE, &k))?;
        let mut entry = match current {
            Some(bytes) => decode_entry(&bytes)?,
            None => {
                return Err(Error::EntryNotFound {
                    key: self.key,
                    window: self.window,
                })
            }
        };

        entry.count = entry.count.saturating_add(delta);
        entry.last_updated = entry.last_updated.max(timestamp);

        let bytes = protobuf::serialize(&entry)?;
        store.retry.run(&store.logger, "increment", || {
            store.backend.put(AGGREGATES_TREE, &k, &bytes)
        })?;
        Ok(entry.count)
    }

    /// Puts the pair back to `previous`, removing it if there was none
    pub fn reset(&self, previous: Option<AggregateEntry>) -> TumblerResult<()> {
        let store = self.store;
        let k = store_key(self.key, self.window)?;
        match previous {
            Some(entry) => {
                let bytes = protobuf::serialize(&entry)?;
                store.retry.run(&store.logger, "reset", || {
                    store.backend.put(AGGREGATES_TREE, &k, &bytes)
                })?;
            }
            None => {
                store
                    .retry
                    .run(&store.logger, "reset", || store.backend.remove(AGGREGATES_TREE, &k))?;
            }
        }
        Ok(())
    }
}
