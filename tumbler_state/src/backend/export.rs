// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

//! On-disk checkpoint format shared by the backends
//!
//! A checkpoint directory holds a single `STATE_EXPORT` file laid out as
//!
//! ```text
//! tree_count: u64
//! repeated tree_count times:
//!     name_len: u64, name bytes
//!     pair_count: u64
//!     repeated pair_count times:
//!         key_len: u64, key bytes
//!         value_len: u64, value bytes
//! ```
//!
//! with every length little-endian. The file is written under a temporary
//! name and renamed into place, so a crash never leaves a half written export.

use super::KeyValue;
use crate::error::*;
use snafu::{ensure, OptionExt};
use std::{
    fs,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

pub const EXPORT_FILE: &str = "STATE_EXPORT";
const EXPORT_TMP_FILE: &str = "STATE_EXPORT.tmp";

/// Every tree of a backend, by name
pub type ExportData = Vec<(String, Vec<KeyValue>)>;

pub fn export_path(checkpoint_path: &Path) -> PathBuf {
    checkpoint_path.join(EXPORT_FILE)
}

pub fn write_export(checkpoint_path: &Path, data: &ExportData) -> Result<()> {
    if !checkpoint_path.exists() {
        fs::create_dir_all(checkpoint_path)?;
    }

    let tmp = checkpoint_path.join(EXPORT_TMP_FILE);
    {
        let out = fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(out);

        write_len(&mut writer, data.len())?;
        for (name, pairs) in data {
            write_len_and_bytes(&mut writer, name.as_bytes())?;
            write_len(&mut writer, pairs.len())?;
            for (key, value) in pairs {
                write_len_and_bytes(&mut writer, key)?;
                write_len_and_bytes(&mut writer, value)?;
            }
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&tmp, export_path(checkpoint_path))?;
    Ok(())
}

pub fn read_export(checkpoint_path: &Path) -> Result<ExportData> {
    let path = export_path(checkpoint_path);
    let file = fs::File::open(&path)?;
    let mut reader = BufReader::new(file);

    let tree_count = read_len(&mut reader)?;
    let mut data = Vec::with_capacity(tree_count.min(1024));
    for _ in 0..tree_count {
        let name = String::from_utf8(read_bytes(&mut reader)?)
            .ok()
            .context(CorruptExport {
                path: path.clone(),
                msg: "tree name is not valid utf-8",
            })?;
        let pair_count = read_len(&mut reader)?;
        let mut pairs = Vec::with_capacity(pair_count.min(1 << 16));
        for _ in 0..pair_count {
            let key = read_bytes(&mut reader)?;
            let value = read_bytes(&mut reader)?;
            pairs.push((key, value));
        }
        data.push((name, pairs));
    }

    let mut trailing = [0u8; 1];
    ensure!(
        reader.read(&mut trailing)? == 0,
        CorruptExport {
            path: path.clone(),
            msg: "trailing bytes after the last tree",
        }
    );

    Ok(data)
}

#[inline]
fn write_len(mut w: impl Write, len: usize) -> io::Result<()> {
    w.write_all(&(len as u64).to_le_bytes())
}

#[inline]
fn write_len_and_bytes(mut w: impl Write, bytes: &[u8]) -> io::Result<()> {
    write_len(&mut w, bytes.len())?;
    w.write_all(bytes)
}

#[inline]
fn read_len(mut r: impl Read) -> io::Result<usize> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf) as usize)
}

fn read_bytes(mut r: impl Read) -> io::Result<Vec<u8>> {
    let len = read_len(&mut r)?;
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "export ended in the middle of a record",
        ));
    }
    Ok(buf)
}
