// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::TumblerResult;
use snafu::Snafu;

/// Nested result type for handling per record errors
///
/// The outer layer carries errors that halt the engine, the inner one
/// errors that only cost the record that caused them.
pub type RecordResult<A> = TumblerResult<std::result::Result<A, RecordError>>;

/// Enum containing every reason a single record may be skipped
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility = "pub(crate)")]
pub enum RecordError {
    #[snafu(display("Failed to decode record {}", msg))]
    Decode { msg: String },
    #[snafu(display("Invalid event timestamp {}", timestamp))]
    InvalidTimestamp { timestamp: i64 },
}
