// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

//! Tumbler is a windowed streaming aggregation engine.
//!
//! It counts denied transactions per failure cause inside tumbling event-time
//! windows, emits the running counts as they change and a final count when a
//! window is evicted, and keeps its state in a durable window store that can
//! be snapshotted and restored.

#[doc(hidden)]
pub use tumbler_state as state;

// Public Interface

/// Tumbler Configuration
pub mod conf;
/// Event records, aggregates and their decoders
pub mod data;
/// The aggregation engine
pub mod engine;
/// Result emitters handing aggregates to the transport
pub mod emitter;
/// Tumbler error types
pub mod error;
/// Ingestion pipeline connecting transport partitions to an engine
pub mod pipeline;
/// Tumbling windows and the window store
pub mod window;

// Internal modules

/// Internal Tumbler Utilities
mod util;

/// Helper module that imports everything related to Tumbler into scope
pub mod prelude {
    pub use crate::{
        conf::{
            logger::{LoggerType, TumblerLogger},
            EmitPolicy, LatePolicy, TimeMode, TumblerConf,
        },
        data::{
            decode::{DefaultDecoder, ProstDecoder, RecordDecoder},
            AggregateEntry, AggregateResult, EventRecord, RawRecord, SourcePosition, Status,
            TransactionStatus, MAX_FAIL_CAUSE,
        },
        emitter::{ChannelEmitter, DebugEmitter, ResultEmitter},
        engine::{AggregationEngine, CountersSnapshot, Outcome},
        error::{Error, RecordError, RecordResult, TumblerResult},
        pipeline::Pipeline,
        util::RetryPolicy,
        window::{EntryGuard, EvictedEntry, TumblingWindows, Window, WindowStore},
    };

    #[cfg(feature = "json")]
    pub use crate::{data::decode::JsonDecoder, emitter::LocalFileEmitter};

    #[cfg(feature = "sled")]
    pub use crate::state::Sled;
    pub use crate::state::{Backend, DefaultBackend, InMemory};
}
