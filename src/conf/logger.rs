// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::error::TumblerResult;
use serde::Deserialize;
use slog::{o, Drain, Logger};
use std::fs::OpenOptions;

/// Alias for logger in Tumbler
pub type TumblerLogger = Logger;

pub const TUMBLER_LOG_NAME: &str = "tumbler.log";

/// Defines a logger type
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoggerType {
    /// Logs output directly to the terminal
    Terminal,
    /// Logs output to file
    File,
}

impl Default for LoggerType {
    fn default() -> Self {
        LoggerType::Terminal
    }
}

pub fn term_logger() -> TumblerLogger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).chan_size(1024).build().fuse();

    slog::Logger::root(
        drain,
        o!(
        "location" => slog::PushFnValue(|r: &slog::Record<'_>, ser: slog::PushFnValueSerializer<'_>| {
            ser.emit(format_args!("{}:{}", r.file(), r.line()))
        })),
    )
}

pub fn file_logger(log_path: &str) -> TumblerResult<TumblerLogger> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).chan_size(1024).build().fuse();

    Ok(slog::Logger::root(
        drain,
        o!(
        "location" => slog::PushFnValue(|r: &slog::Record<'_>, ser: slog::PushFnValueSerializer<'_>| {
            ser.emit(format_args!("{}:{}", r.file(), r.line()))
        })),
    ))
}
