// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Decoders from raw transport records
pub mod decode;

use crate::window::Window;
use prost::{Enumeration, Message};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

/// Highest failure cause that is aggregated
pub const MAX_FAIL_CAUSE: i32 = 5;

/// Outcome of a transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Status {
    Approved = 0,
    Denied = 1,
}

/// Payload of an incoming transaction record
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "camelCase"))]
#[derive(Message, Clone, PartialEq)]
pub struct TransactionStatus {
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
    #[prost(int32, tag = "2")]
    pub fail_cause: i32,
}

impl TransactionStatus {
    pub fn new(status: Status, fail_cause: i32) -> Self {
        TransactionStatus {
            status: status as i32,
            fail_cause,
        }
    }

    #[inline]
    pub fn is_denied(&self) -> bool {
        self.status == Status::Denied as i32
    }

    /// The grouping key of this payload, if it is one that gets aggregated
    #[inline]
    pub fn grouping_key(&self) -> Option<u32> {
        if self.is_denied() && (0..=MAX_FAIL_CAUSE).contains(&self.fail_cause) {
            Some(self.fail_cause as u32)
        } else {
            None
        }
    }
}

/// Where a record sits in the transport
#[derive(Message, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    #[prost(uint32, tag = "1")]
    pub partition: u32,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
}

impl SourcePosition {
    pub fn new(partition: u32, offset: u64) -> Self {
        SourcePosition { partition, offset }
    }
}

/// A decoded transaction record
#[derive(Message, Clone, PartialEq)]
pub struct EventRecord {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(message, required, tag = "2")]
    pub value: TransactionStatus,
    /// Event time in epoch milliseconds
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "4")]
    pub position: Option<SourcePosition>,
}

impl EventRecord {
    pub fn new(value: TransactionStatus, timestamp: i64) -> Self {
        EventRecord {
            key: Vec::new(),
            value,
            timestamp,
            position: None,
        }
    }

    pub fn with_position(mut self, position: SourcePosition) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }
}

/// A record as handed over by the transport, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    /// Event time in epoch milliseconds, as stamped by the transport
    pub timestamp: i64,
    pub position: Option<SourcePosition>,
}

impl RawRecord {
    pub fn new(payload: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        RawRecord {
            key: None,
            payload: payload.into(),
            timestamp,
            position: None,
        }
    }

    pub fn with_position(mut self, position: SourcePosition) -> Self {
        self.position = Some(position);
        self
    }
}

/// Running aggregate of one grouping key within one window
#[derive(Message, Clone, Copy, PartialEq, Eq)]
pub struct AggregateEntry {
    #[prost(uint64, tag = "1")]
    pub count: u64,
    /// Timestamp of the most recent contributing event
    #[prost(uint64, tag = "2")]
    pub last_updated: u64,
}

/// A count handed to the transport
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "camelCase"))]
#[derive(Message, Clone, PartialEq, Eq)]
pub struct AggregateResult {
    #[prost(uint32, tag = "1")]
    pub fail_cause: u32,
    #[prost(uint64, tag = "2")]
    pub fail_count: u64,
    #[prost(uint64, tag = "3")]
    pub window_start_time: u64,
    #[prost(uint64, tag = "4")]
    pub window_end_time: u64,
    /// Set on the value emitted when the window is evicted
    #[cfg_attr(
        feature = "json",
        serde(rename = "final", default, skip_serializing_if = "is_false")
    )]
    #[prost(bool, tag = "5")]
    pub is_final: bool,
}

#[cfg(feature = "json")]
fn is_false(b: &bool) -> bool {
    !*b
}

impl AggregateResult {
    pub fn new(fail_cause: u32, fail_count: u64, window: Window, is_final: bool) -> Self {
        AggregateResult {
            fail_cause,
            fail_count,
            window_start_time: window.start,
            window_end_time: window.end,
            is_final,
        }
    }

    pub fn window(&self) -> Window {
        Window::new(self.window_start_time, self.window_end_time)
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
