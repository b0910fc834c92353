// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::{
    export::{read_export, write_export, ExportData},
    Backend, KeyValue, UpdateFn,
};
use crate::error::*;
use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// Heap backed [Backend]
///
/// Nothing survives a process restart except what was written with
/// [Backend::checkpoint]. Meant for tests and for deployments where the
/// checkpoint is the only durability needed.
#[derive(Debug, Default)]
pub struct InMemory {
    trees: RwLock<HashMap<String, Tree>>,
    restored: bool,
}

impl InMemory {
    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Tree>>> {
        self.trees.read().map_err(|_| TumblerStateError::Unknown {
            msg: "in-memory state lock poisoned".to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Tree>>> {
        self.trees.write().map_err(|_| TumblerStateError::Unknown {
            msg: "in-memory state lock poisoned".to_string(),
        })
    }

    fn collect<'a>(iter: impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)>) -> Vec<KeyValue> {
        iter.map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Backend for InMemory {
    fn create(_live_path: &Path) -> Result<Self>
    where
        Self: Sized,
    {
        Ok(Self::default())
    }

    fn restore(_live_path: &Path, checkpoint_path: &Path) -> Result<Self>
    where
        Self: Sized,
    {
        let trees = read_export(checkpoint_path)?
            .into_iter()
            .map(|(name, pairs)| (name, pairs.into_iter().collect::<Tree>()))
            .collect();

        Ok(InMemory {
            trees: RwLock::new(trees),
            restored: true,
        })
    }

    fn was_restored(&self) -> bool {
        self.restored
    }

    fn checkpoint(&self, checkpoint_path: &Path) -> Result<()> {
        let data: ExportData = {
            let trees = self.read()?;
            trees
                .iter()
                .map(|(name, tree)| (name.clone(), Self::collect(tree.iter())))
                .collect()
        };
        write_export(checkpoint_path, &data)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.get(tree).and_then(|t| t.get(key)).cloned())
    }

    fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut trees = self.write()?;
        Ok(trees
            .entry(tree.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec()))
    }

    fn remove(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .write()?
            .get_mut(tree)
            .and_then(|t| t.remove(key)))
    }

    fn contains(&self, tree: &str, key: &[u8]) -> Result<bool> {
        Ok(self
            .read()?
            .get(tree)
            .map(|t| t.contains_key(key))
            .unwrap_or(false))
    }

    fn update(&self, tree: &str, key: &[u8], f: &mut UpdateFn<'_>) -> Result<Option<Vec<u8>>> {
        // the write lock is held across `f`, so concurrent updates serialize
        let mut trees = self.write()?;
        let tree = trees.entry(tree.to_string()).or_default();
        let new = f(tree.get(key).map(|v| v.as_slice()));
        match &new {
            Some(value) => {
                tree.insert(key.to_vec(), value.clone());
            }
            None => {
                tree.remove(key);
            }
        }
        Ok(new)
    }

    fn scan_range(&self, tree: &str, start: &[u8], end: &[u8]) -> Result<Vec<KeyValue>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let trees = self.read()?;
        Ok(trees
            .get(tree)
            .map(|t| {
                Self::collect(t.range::<[u8], _>((
                    Bound::Included(start),
                    Bound::Excluded(end),
                )))
            })
            .unwrap_or_default())
    }

    fn scan_prefix(&self, tree: &str, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let trees = self.read()?;
        Ok(trees
            .get(tree)
            .map(|t| {
                Self::collect(
                    t.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
                        .take_while(|(k, _)| k.starts_with(prefix)),
                )
            })
            .unwrap_or_default())
    }

    fn len(&self, tree: &str) -> Result<usize> {
        Ok(self.read()?.get(tree).map(|t| t.len()).unwrap_or(0))
    }
}
