// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::Backend;
use std::{path::Path, sync::Arc};

/// Restores a backend of the same type as `_like`
pub fn restore_like<B: Backend>(_like: &Arc<B>, live_path: &Path, checkpoint_path: &Path) -> B {
    B::restore(live_path, checkpoint_path).unwrap()
}

pub fn counter_increment(current: Option<&[u8]>) -> Option<Vec<u8>> {
    let mut buf = [0u8; 8];
    if let Some(bytes) = current {
        buf.copy_from_slice(bytes);
    }
    Some((u64::from_le_bytes(buf) + 1).to_le_bytes().to_vec())
}

/// Tests every [Backend] implementation must pass
///
/// `$construct_backend` must evaluate to `(Arc<impl Backend>, TempDir)`, the
/// directory being kept alive for the duration of the test.
macro_rules! common_backend_tests {
    ($construct_backend: expr) => {
        mod common {
            use super::*;
            use crate::backend::test_common::*;

            #[test]
            fn put_get_remove() {
                let (db, _dir) = $construct_backend;

                assert_eq!(db.get("tree", b"key").unwrap(), None);
                assert_eq!(db.put("tree", b"key", b"one").unwrap(), None);
                assert_eq!(db.get("tree", b"key").unwrap(), Some(b"one".to_vec()));
                assert!(db.contains("tree", b"key").unwrap());

                let old = db.put("tree", b"key", b"two").unwrap();
                assert_eq!(old, Some(b"one".to_vec()));

                let removed = db.remove("tree", b"key").unwrap();
                assert_eq!(removed, Some(b"two".to_vec()));
                assert!(!db.contains("tree", b"key").unwrap());
                assert_eq!(db.remove("tree", b"key").unwrap(), None);
            }

            #[test]
            fn trees_are_independent() {
                let (db, _dir) = $construct_backend;

                db.put("first", b"k", b"1").unwrap();
                db.put("second", b"k", b"2").unwrap();

                assert_eq!(db.get("first", b"k").unwrap(), Some(b"1".to_vec()));
                assert_eq!(db.get("second", b"k").unwrap(), Some(b"2".to_vec()));
                assert_eq!(db.len("first").unwrap(), 1);

                db.remove("first", b"k").unwrap();
                assert!(db.is_empty("first").unwrap());
                assert_eq!(db.len("second").unwrap(), 1);
            }

            #[test]
            fn update_can_insert_modify_and_delete() {
                let (db, _dir) = $construct_backend;

                let v = db.update("t", b"c", &mut counter_increment).unwrap();
                assert_eq!(v, Some(1u64.to_le_bytes().to_vec()));
                let v = db.update("t", b"c", &mut counter_increment).unwrap();
                assert_eq!(v, Some(2u64.to_le_bytes().to_vec()));

                let v = db.update("t", b"c", &mut |_: Option<&[u8]>| None).unwrap();
                assert_eq!(v, None);
                assert!(!db.contains("t", b"c").unwrap());
            }

            #[test]
            fn concurrent_updates_are_not_lost() {
                let (db, _dir) = $construct_backend;
                let threads = 4;
                let per_thread = 250;

                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let db = db.clone();
                        std::thread::spawn(move || {
                            for _ in 0..per_thread {
                                db.update("t", b"c", &mut counter_increment).unwrap();
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }

                let bytes = db.get("t", b"c").unwrap().unwrap();
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                assert_eq!(u64::from_le_bytes(buf), (threads * per_thread) as u64);
            }

            #[test]
            fn range_scans_are_ordered_and_half_open() {
                let (db, _dir) = $construct_backend;

                for i in (0u8..10).rev() {
                    db.put("t", &[i], &[i * 2]).unwrap();
                }

                let keys: Vec<u8> = db
                    .scan_range("t", &[2], &[5])
                    .unwrap()
                    .into_iter()
                    .map(|(k, _)| k[0])
                    .collect();
                assert_eq!(keys, vec![2, 3, 4]);

                assert!(db.scan_range("t", &[5], &[5]).unwrap().is_empty());
                assert!(db.scan_range("missing", &[0], &[9]).unwrap().is_empty());
            }

            #[test]
            fn prefix_scans_stop_at_the_prefix() {
                let (db, _dir) = $construct_backend;

                db.put("t", &[1, 0], b"a").unwrap();
                db.put("t", &[1, 1], b"b").unwrap();
                db.put("t", &[2, 0], b"c").unwrap();
                db.put("t", &[0, 9], b"d").unwrap();

                let values: Vec<Vec<u8>> = db
                    .scan_prefix("t", &[1])
                    .unwrap()
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect();
                assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec()]);
            }

            #[test]
            fn checkpoint_and_restore() {
                let (db, dir) = $construct_backend;

                db.put("a", b"1", b"one").unwrap();
                db.put("a", b"2", b"two").unwrap();
                db.put("b", b"x", b"ex").unwrap();

                let checkpoint = dir.path().join("checkpoint");
                db.checkpoint(&checkpoint).unwrap();

                // writes after the checkpoint must not leak into the restored state
                db.put("a", b"3", b"three").unwrap();

                let live = dir.path().join("restored_live");
                let restored = restore_like(&db, &live, &checkpoint);

                assert!(restored.was_restored());
                assert_eq!(restored.get("a", b"1").unwrap(), Some(b"one".to_vec()));
                assert_eq!(restored.get("a", b"2").unwrap(), Some(b"two".to_vec()));
                assert_eq!(restored.get("b", b"x").unwrap(), Some(b"ex".to_vec()));
                assert_eq!(restored.get("a", b"3").unwrap(), None);
                assert_eq!(restored.len("a").unwrap(), 2);
            }
        }
    };
}
