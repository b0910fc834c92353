// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// A helper macro to indicate a reportable bug
#[macro_export]
macro_rules! reportable_error {
    ( $($arg:tt)* ) => ({
        $crate::error::TumblerResult::Err($crate::error::Error::ReportableBug { msg: format!($($arg)*) })
    })
}

pub mod record;

use crate::window::Window;
use snafu::{Backtrace, Snafu};
use std::io;
use tumbler_state::TumblerStateError;

pub use record::{RecordError, RecordResult};

// Inspired by Sled's error management approach.
// http://sled.rs/errors.html

/// Top level Result type in Tumbler
pub type TumblerResult<T> = std::result::Result<T, Error>;
/// Alias for State Error
pub type StateResult<T> = std::result::Result<T, TumblerStateError>;

/// Errors that halt the engine
///
/// Anything that may be skipped on a per record basis is a [RecordError] instead.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum Error {
    /// The system has been used in an unsupported way.
    #[snafu(display("Unsupported operation {}", msg))]
    Unsupported { msg: String },
    /// An unexpected bug has happened.
    #[snafu(display("Unexpected bug {}", msg))]
    ReportableBug { msg: String },
    /// An increment reached the store without a preceding create.
    #[snafu(display("No aggregate entry for key {} in window {}", key, window))]
    EntryNotFound { key: u32, window: Window },
    /// A read or write error has happened when interacting with the file system.
    #[snafu(display("An IO error occured {}", error))]
    Io { error: io::Error },
    /// An error that indicates possible data corruption
    ///
    /// It could for example be that stored entries no longer decode.
    #[snafu(display("Unexpected data corruption {} with backtrace {:?}", msg, backtrace))]
    Corruption { msg: String, backtrace: Backtrace },
    /// The storage layer failed and retrying did not help.
    #[snafu(display("Storage failure {}", msg))]
    Storage { msg: String },
    /// Results could not be handed to the transport.
    #[snafu(display("Failed to publish result {}", msg))]
    Transport { msg: String },
    /// Configuration could not be loaded or is invalid.
    #[snafu(display("Invalid configuration {}", msg))]
    Config { msg: String },
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        Error::Io { error: io_error }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> io::Error {
        use self::Error::*;
        use std::io::ErrorKind;
        match error {
            Io { error } => error,
            Unsupported { ref msg } => io::Error::new(
                ErrorKind::InvalidInput,
                format!("operation not supported: {:?}", msg),
            ),
            Corruption { msg, .. } => io::Error::new(
                ErrorKind::InvalidData,
                format!("corruption encountered: {:?}", msg),
            ),
            Config { ref msg } => io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid configuration: {:?}", msg),
            ),
            other => io::Error::new(ErrorKind::Other, other.to_string()),
        }
    }
}

// Transform TumblerStateError into top level Error
impl From<TumblerStateError> for Error {
    fn from(error: TumblerStateError) -> Self {
        let msg = error.to_string();
        match error {
            TumblerStateError::IO { source, .. } => Error::Io { error: source },
            TumblerStateError::FixedBytesSerializationError { backtrace, .. } => {
                Error::Corruption { msg, backtrace }
            }
            TumblerStateError::FixedBytesDeserializationError { backtrace, .. } => {
                Error::Corruption { msg, backtrace }
            }
            TumblerStateError::ProtobufDecodeError { backtrace, .. } => {
                Error::Corruption { msg, backtrace }
            }
            TumblerStateError::ProtobufEncodeError { backtrace, .. } => {
                Error::Corruption { msg, backtrace }
            }
            TumblerStateError::CorruptExport { backtrace, .. } => {
                Error::Corruption { msg, backtrace }
            }
            // Transform rest of errors into storage failures
            _ => Error::Storage { msg },
        }
    }
}

impl Error {
    /// Process exit code an operator may use when the engine halts on this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } | Error::Unsupported { .. } => 64,
            Error::Corruption { .. } => 65,
            Error::Io { .. } | Error::Storage { .. } => 74,
            Error::Transport { .. } => 69,
            Error::EntryNotFound { .. } | Error::ReportableBug { .. } => 70,
        }
    }
}
