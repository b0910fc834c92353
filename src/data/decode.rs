// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::{EventRecord, RawRecord, TransactionStatus};
use crate::error::RecordError;
use prost::Message;

/// Turns raw transport records into [EventRecord]s
///
/// Decoding failures are per record and never halt ingestion.
pub trait RecordDecoder: Send + Sync + 'static {
    fn decode_payload(&self, payload: &[u8]) -> Result<TransactionStatus, RecordError>;

    fn decode(&self, raw: &RawRecord) -> Result<EventRecord, RecordError> {
        let value = self.decode_payload(&raw.payload)?;
        Ok(EventRecord {
            key: raw.key.clone().unwrap_or_default(),
            value,
            timestamp: raw.timestamp,
            position: raw.position,
        })
    }
}

/// Payloads encoded as protobuf `TransactionStatus` messages
#[derive(Debug, Clone, Copy, Default)]
pub struct ProstDecoder;

impl RecordDecoder for ProstDecoder {
    fn decode_payload(&self, payload: &[u8]) -> Result<TransactionStatus, RecordError> {
        TransactionStatus::decode(payload).map_err(|e| RecordError::Decode { msg: e.to_string() })
    }
}

/// Payloads encoded as JSON objects, e.g. `{"status": 1, "failCause": 3}`
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

#[cfg(feature = "json")]
impl RecordDecoder for JsonDecoder {
    fn decode_payload(&self, payload: &[u8]) -> Result<TransactionStatus, RecordError> {
        serde_json::from_slice(payload).map_err(|e| RecordError::Decode { msg: e.to_string() })
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "json")] {
        /// Decoder used when nothing else is requested
        pub type DefaultDecoder = JsonDecoder;
    } else {
        /// Decoder used when nothing else is requested
        pub type DefaultDecoder = ProstDecoder;
    }
}
