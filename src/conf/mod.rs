// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

pub mod logger;

use crate::{
    error::{Error, TumblerResult},
    util::RetryPolicy,
};
use hocon::HoconLoader;
use logger::{file_logger, term_logger, LoggerType, TumblerLogger};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// When aggregate results are handed to the emitter
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitPolicy {
    /// Emit the running count on every increment
    Continuous,
    /// Emit a single final count when the window is evicted
    OnClose,
}

impl Default for EmitPolicy {
    fn default() -> Self {
        EmitPolicy::Continuous
    }
}

/// What happens to records whose window is already past its grace period
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatePolicy {
    /// Aggregate into a fresh entry, evicted again on the next sweep
    Recreate,
    /// Skip the record
    Drop,
}

impl Default for LatePolicy {
    fn default() -> Self {
        LatePolicy::Recreate
    }
}

/// Clock used to decide when windows expire
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeMode {
    /// Highest event timestamp observed so far
    Event,
    /// Wall clock of the host
    Process,
}

impl Default for TimeMode {
    fn default() -> Self {
        TimeMode::Event
    }
}

/// Configuration for a Tumbler engine
#[derive(Deserialize, Clone, Debug)]
pub struct TumblerConf {
    /// Tumbling window size in milliseconds
    #[serde(default = "window_size_ms_default")]
    pub window_size_ms: u64,
    /// Retention after a window's end before its entries are evicted
    #[serde(default = "grace_period_ms_default")]
    pub grace_period_ms: u64,
    /// Directory of the live window store
    #[serde(default = "store_backend_path_default")]
    pub store_backend_path: PathBuf,
    /// Directory that snapshots are written to and restored from
    #[serde(default = "checkpoint_dir_default")]
    pub checkpoint_dir: PathBuf,
    #[serde(default)]
    pub emit_policy: EmitPolicy,
    /// Emit a final marked result for every evicted entry
    ///
    /// Always on under [EmitPolicy::OnClose].
    #[serde(default = "emit_final_on_eviction_default")]
    pub emit_final_on_eviction: bool,
    #[serde(default)]
    pub late_policy: LatePolicy,
    #[serde(default)]
    pub time_mode: TimeMode,
    /// Run an expiry sweep every `sweep_every` ingested records, 0 disables
    #[serde(default = "sweep_every_default")]
    pub sweep_every: u64,
    /// Interval in milliseconds of the pipeline's sweep ticker, 0 disables
    #[serde(default = "sweep_interval_ms_default")]
    pub sweep_interval_ms: u64,
    /// Amount of per-key lock stripes in the window store
    #[serde(default = "lock_stripes_default")]
    pub lock_stripes: usize,
    /// Retries of a storage operation failing with a transient error
    #[serde(default = "storage_retries_default")]
    pub storage_retries: u32,
    /// Backoff in milliseconds before the first storage retry
    #[serde(default = "retry_backoff_ms_default")]
    pub retry_backoff_ms: u64,
    /// [LoggerType] for tumbler related logging
    #[serde(default)]
    pub logger_type: LoggerType,
    /// Directory for the log file when logging to file
    #[serde(default = "log_dir_default")]
    pub log_dir: PathBuf,
}

impl Default for TumblerConf {
    fn default() -> Self {
        TumblerConf {
            window_size_ms: window_size_ms_default(),
            grace_period_ms: grace_period_ms_default(),
            store_backend_path: store_backend_path_default(),
            checkpoint_dir: checkpoint_dir_default(),
            emit_policy: Default::default(),
            emit_final_on_eviction: emit_final_on_eviction_default(),
            late_policy: Default::default(),
            time_mode: Default::default(),
            sweep_every: sweep_every_default(),
            sweep_interval_ms: sweep_interval_ms_default(),
            lock_stripes: lock_stripes_default(),
            storage_retries: storage_retries_default(),
            retry_backoff_ms: retry_backoff_ms_default(),
            logger_type: Default::default(),
            log_dir: log_dir_default(),
        }
    }
}

impl TumblerConf {
    /// Loads TumblerConf from a file
    pub fn from_file(path: impl AsRef<Path>) -> TumblerResult<TumblerConf> {
        let data = std::fs::read_to_string(path).map_err(|e| Error::Config {
            msg: format!("Failed to read config file with err {}", e),
        })?;
        Self::from_str(&data)
    }

    /// Loads TumblerConf from a HOCON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> TumblerResult<TumblerConf> {
        let loader: HoconLoader = HoconLoader::new().load_str(data).map_err(|e| Error::Config {
            msg: format!("Failed to load Hocon Loader with err {}", e),
        })?;

        let conf: TumblerConf = loader.resolve().map_err(|e| Error::Config {
            msg: format!("Failed to resolve TumblerConf with err {}", e),
        })?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> TumblerResult<()> {
        if self.window_size_ms == 0 {
            return Err(Error::Config {
                msg: "window_size_ms must be positive".to_string(),
            });
        }
        if self.lock_stripes == 0 {
            return Err(Error::Config {
                msg: "lock_stripes must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.storage_retries,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    /// Whether evicted entries produce a final result
    pub fn emits_final(&self) -> bool {
        self.emit_final_on_eviction || self.emit_policy == EmitPolicy::OnClose
    }

    pub fn logger(&self) -> TumblerResult<TumblerLogger> {
        match self.logger_type {
            LoggerType::File => {
                let path = self.log_dir.join(logger::TUMBLER_LOG_NAME);
                file_logger(&path.to_string_lossy())
            }
            LoggerType::Terminal => Ok(term_logger()),
        }
    }
}

// Default values

fn window_size_ms_default() -> u64 {
    60_000
}

fn grace_period_ms_default() -> u64 {
    // one window
    60_000
}

fn store_backend_path_default() -> PathBuf {
    let mut res = std::env::temp_dir();
    res.push("tumbler/live_state");
    res
}

fn checkpoint_dir_default() -> PathBuf {
    let mut res = std::env::temp_dir();
    res.push("tumbler/checkpoints");
    res
}

fn emit_final_on_eviction_default() -> bool {
    true
}

fn sweep_every_default() -> u64 {
    1
}

fn sweep_interval_ms_default() -> u64 {
    1000
}

fn lock_stripes_default() -> usize {
    std::cmp::max(1, num_cpus::get()) * 16
}

fn storage_retries_default() -> u32 {
    3
}

fn retry_backoff_ms_default() -> u64 {
    10
}

fn log_dir_default() -> PathBuf {
    let mut res = std::env::temp_dir();
    res.push("tumbler");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let conf = TumblerConf::default();
        assert_eq!(conf.window_size_ms, 60_000);
        assert_eq!(conf.grace_period_ms, 60_000);
        assert_eq!(conf.emit_policy, EmitPolicy::Continuous);
        assert_eq!(conf.late_policy, LatePolicy::Recreate);
        assert_eq!(conf.time_mode, TimeMode::Event);
        assert!(conf.emits_final());
        assert!(conf.lock_stripes >= 16);
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn hocon_overrides_defaults() {
        let conf = TumblerConf::from_str(
            r#"
            window_size_ms = 1000
            grace_period_ms = 250
            store_backend_path = "/tmp/tumbler_conf_test"
            emit_policy = "OnClose"
            emit_final_on_eviction = false
            late_policy = "Drop"
            time_mode = "Process"
            "#,
        )
        .unwrap();

        assert_eq!(conf.window_size_ms, 1000);
        assert_eq!(conf.grace_period_ms, 250);
        assert_eq!(conf.store_backend_path, PathBuf::from("/tmp/tumbler_conf_test"));
        assert_eq!(conf.emit_policy, EmitPolicy::OnClose);
        assert_eq!(conf.late_policy, LatePolicy::Drop);
        assert_eq!(conf.time_mode, TimeMode::Process);
        // OnClose has nothing to emit other than the final value
        assert!(conf.emits_final());
        assert_eq!(conf.sweep_every, 1);
    }

    #[test]
    fn zero_window_size_is_rejected() {
        let res = TumblerConf::from_str("window_size_ms = 0");
        assert!(matches!(res, Err(Error::Config { .. })));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = TumblerConf::from_file(dir.path().join("missing.conf"));
        assert!(matches!(res, Err(Error::Config { .. })));
    }

    #[test]
    fn conf_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tumbler.conf");
        std::fs::write(&path, "sweep_every = 100\nstorage_retries = 7").unwrap();

        let conf = TumblerConf::from_file(&path).unwrap();
        assert_eq!(conf.sweep_every, 100);
        assert_eq!(conf.retry_policy().retries, 7);
    }
}
