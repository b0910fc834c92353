// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use super::ResultEmitter;
use crate::{
    data::AggregateResult,
    error::{Error, TumblerResult},
};
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
    sync::{Mutex, PoisonError},
};

/// Appends every result as one JSON object per line
pub struct LocalFileEmitter {
    file: Mutex<BufWriter<File>>,
}

impl LocalFileEmitter {
    pub fn new(file_path: impl AsRef<Path>) -> TumblerResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(LocalFileEmitter {
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn flush(&self) -> TumblerResult<()> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }
}

impl ResultEmitter for LocalFileEmitter {
    fn emit(&self, result: AggregateResult) -> TumblerResult<()> {
        let line = result.to_json().map_err(|e| Error::Transport { msg: e.to_string() })?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl Drop for LocalFileEmitter {
    fn drop(&mut self) {
        if let Ok(file) = self.file.get_mut() {
            let _ = file.flush();
        }
    }
}
