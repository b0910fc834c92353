// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::{
    export::{read_export, write_export, ExportData},
    Backend, KeyValue, UpdateFn,
};
use crate::error::*;
use ::sled::{open, Batch, Db, IVec, Tree};
use std::path::Path;

/// Sled backed [Backend]
///
/// The live state is durable on its own: sled flushes its page cache in the
/// background and [Backend::create] on an existing directory picks up where
/// the last process left off. [Backend::checkpoint] additionally dumps every
/// tree into an export that [Backend::restore] can load into a fresh directory.
#[derive(Debug)]
pub struct Sled {
    db: Db,
    restored: bool,
}

impl Sled {
    fn tree(&self, tree_name: &str) -> Result<Tree> {
        Ok(self.db.open_tree(tree_name)?)
    }

    fn user_trees(&self) -> impl Iterator<Item = IVec> + '_ {
        let default_name = self.db.name();
        self.db
            .tree_names()
            .into_iter()
            .filter(move |name| *name != default_name)
    }

    fn collect(iter: impl Iterator<Item = ::sled::Result<(IVec, IVec)>>) -> Result<Vec<KeyValue>> {
        let mut res = Vec::new();
        for kv in iter {
            let (k, v) = kv?;
            res.push((k.to_vec(), v.to_vec()));
        }
        Ok(res)
    }
}

impl Backend for Sled {
    fn create(live_path: &Path) -> Result<Self>
    where
        Self: Sized,
    {
        let db = open(live_path)?;
        Ok(Sled {
            db,
            restored: false,
        })
    }

    fn restore(live_path: &Path, checkpoint_path: &Path) -> Result<Self>
    where
        Self: Sized,
    {
        let import_data = read_export(checkpoint_path)?;
        let db = open(live_path)?;
        let sled = Sled { db, restored: true };

        // whatever the live directory held is superseded by the checkpoint
        for name in sled.user_trees().collect::<Vec<_>>() {
            sled.db.drop_tree(name)?;
        }

        for (name, pairs) in import_data {
            let tree = sled.tree(&name)?;
            let mut batch = Batch::default();
            for (key, value) in pairs {
                batch.insert(key, value);
            }
            tree.apply_batch(batch)?;
        }
        sled.db.flush()?;

        Ok(sled)
    }

    fn was_restored(&self) -> bool {
        self.restored
    }

    fn checkpoint(&self, checkpoint_path: &Path) -> Result<()> {
        // sled has no native snapshots, so every tree is iterated into an export
        let mut data: ExportData = Vec::new();
        for name in self.user_trees() {
            let tree = self.db.open_tree(&name)?;
            let pairs = Self::collect(tree.iter())?;
            data.push((String::from_utf8_lossy(&name).into_owned(), pairs));
        }
        write_export(checkpoint_path, &data)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn get(&self, tree_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(tree_name)?;
        Ok(tree.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, tree_name: &str, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(tree_name)?;
        let old = tree.insert(key, value)?;
        Ok(old.map(|v| v.to_vec()))
    }

    fn remove(&self, tree_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(tree_name)?;
        let old = tree.remove(key)?;
        Ok(old.map(|v| v.to_vec()))
    }

    fn contains(&self, tree_name: &str, key: &[u8]) -> Result<bool> {
        let tree = self.tree(tree_name)?;
        Ok(tree.contains_key(key)?)
    }

    fn update(
        &self,
        tree_name: &str,
        key: &[u8],
        f: &mut UpdateFn<'_>,
    ) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(tree_name)?;
        // compare-and-swap loop, `f` may run more than once under contention
        let new = tree.update_and_fetch(key, |old| f(old))?;
        Ok(new.map(|v| v.to_vec()))
    }

    fn scan_range(&self, tree_name: &str, start: &[u8], end: &[u8]) -> Result<Vec<KeyValue>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let tree = self.tree(tree_name)?;
        Self::collect(tree.range(start..end))
    }

    fn scan_prefix(&self, tree_name: &str, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let tree = self.tree(tree_name)?;
        Self::collect(tree.scan_prefix(prefix))
    }

    fn len(&self, tree_name: &str) -> Result<usize> {
        let tree = self.tree(tree_name)?;
        Ok(tree.len())
    }
}
