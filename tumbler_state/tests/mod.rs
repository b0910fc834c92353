// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use tumbler_state::{
    backend::{Backend, InMemory, Sled},
    serialization::{fixed_bytes, protobuf},
};

#[derive(prost::Message, Clone, PartialEq)]
struct Counter {
    #[prost(uint64, tag = "1")]
    count: u64,
}

#[test]
fn sled_checkpoint_restores_into_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let sled = Sled::create(&dir.path().join("live")).unwrap();

    for (window_end, key) in &[(120u64, 1u32), (60, 2), (60, 1)] {
        let k = fixed_bytes::serialize(&(*window_end, *key)).unwrap();
        let v = protobuf::serialize(&Counter {
            count: window_end + *key as u64,
        })
        .unwrap();
        sled.put("counters", &k, &v).unwrap();
    }

    let checkpoint = dir.path().join("checkpoint");
    sled.checkpoint(&checkpoint).unwrap();

    let mem = InMemory::restore(&dir.path().join("unused"), &checkpoint).unwrap();
    let all = mem.scan_prefix("counters", &[]).unwrap();
    let decoded: Vec<((u64, u32), u64)> = all
        .iter()
        .map(|(k, v)| {
            let key = fixed_bytes::deserialize(k).unwrap();
            let counter: Counter = protobuf::deserialize(v).unwrap();
            (key, counter.count)
        })
        .collect();

    assert_eq!(
        decoded,
        vec![((60, 1), 61), ((60, 2), 62), ((120, 1), 121)]
    );
}
