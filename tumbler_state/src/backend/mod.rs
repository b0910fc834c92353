// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::error::*;
use std::{fmt::Debug, path::Path};

#[cfg(test)]
#[macro_use]
mod test_common;

pub mod export;
pub mod in_memory;
#[cfg(feature = "sled")]
pub mod sled;

pub use self::in_memory::InMemory;
#[cfg(feature = "sled")]
pub use self::sled::Sled;

cfg_if::cfg_if! {
    if #[cfg(feature = "sled")] {
        /// Backend used when nothing else is requested
        pub type DefaultBackend = Sled;
    } else {
        /// Backend used when nothing else is requested
        pub type DefaultBackend = InMemory;
    }
}

/// Owned key-value pair as returned by scans
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Read-modify-write function passed to [Backend::update]
///
/// Receives the current value (if any) and returns the value to store,
/// where `None` removes the key.
pub type UpdateFn<'a> = dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>> + 'a;

/// A keyed byte store organised in named trees
///
/// Every operation is safe to call from several threads. [Backend::update]
/// must apply its function atomically with respect to other writers of the
/// same key.
pub trait Backend: Send + Sync + Debug + 'static {
    /// Open (or reopen) the live state found at `live_path`
    fn create(live_path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Open the live state at `live_path` and replace its content with the
    /// checkpoint stored at `checkpoint_path`
    fn restore(live_path: &Path, checkpoint_path: &Path) -> Result<Self>
    where
        Self: Sized;

    fn was_restored(&self) -> bool;

    /// Write a consistent copy of every tree to `checkpoint_path`
    fn checkpoint(&self, checkpoint_path: &Path) -> Result<()>;

    /// Make all buffered writes durable
    fn flush(&self) -> Result<()>;

    fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>>;
    fn remove(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn contains(&self, tree: &str, key: &[u8]) -> Result<bool>;

    /// Atomically apply `f` to the value stored under `key`, returning the new value
    fn update(&self, tree: &str, key: &[u8], f: &mut UpdateFn<'_>) -> Result<Option<Vec<u8>>>;

    /// All pairs with `start <= key < end`, in key order
    fn scan_range(&self, tree: &str, start: &[u8], end: &[u8]) -> Result<Vec<KeyValue>>;

    /// All pairs whose key starts with `prefix`, in key order
    fn scan_prefix(&self, tree: &str, prefix: &[u8]) -> Result<Vec<KeyValue>>;

    fn len(&self, tree: &str) -> Result<usize>;

    fn is_empty(&self, tree: &str) -> Result<bool> {
        Ok(self.len(tree)? == 0)
    }
}
