// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use snafu::{Backtrace, Snafu};
use std::{io, path::PathBuf, result::Result as StdResult};

pub type Result<T, E = TumblerStateError> = StdResult<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum TumblerStateError {
    #[snafu(context(false))]
    IO {
        source: io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid path: {}", path.display()))]
    InvalidPath { path: PathBuf, backtrace: Backtrace },
    #[snafu(display("Destination buffer is too short: {} < {}", dest_len, needed))]
    FixedBytesSerializationError {
        dest_len: usize,
        needed: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Source buffer is too short: {} < {}", source_len, needed))]
    FixedBytesDeserializationError {
        source_len: usize,
        needed: usize,
        backtrace: Backtrace,
    },
    #[snafu(context(false))]
    ProtobufDecodeError {
        source: prost::DecodeError,
        backtrace: Backtrace,
    },
    #[snafu(context(false))]
    ProtobufEncodeError {
        source: prost::EncodeError,
        backtrace: Backtrace,
    },
    #[snafu(display("Checkpoint export at {} is corrupt: {}", path.display(), msg))]
    CorruptExport {
        path: PathBuf,
        msg: String,
        backtrace: Backtrace,
    },
    #[cfg(feature = "sled")]
    #[snafu(context(false))]
    SledError {
        source: ::sled::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Error : {}", msg))]
    Unknown { msg: String },
}

impl TumblerStateError {
    /// Returns true if the operation that produced this error may succeed when retried
    pub fn is_transient(&self) -> bool {
        match self {
            TumblerStateError::IO { source, .. } => is_transient_io(source),
            #[cfg(feature = "sled")]
            TumblerStateError::SledError { source, .. } => match source {
                ::sled::Error::Io(io_err) => is_transient_io(io_err),
                _ => false,
            },
            _ => false,
        }
    }
}

fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
