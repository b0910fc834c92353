// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

//! `tumbler_state` contains the storage layer of the Tumbler window store.

/// State Backend Implementations
pub mod backend;
/// Error utilities
pub mod error;
/// Key and value encodings
pub mod serialization;

#[doc(hidden)]
pub use crate::backend::*;
pub use crate::error::{Result, TumblerStateError};
