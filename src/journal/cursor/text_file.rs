// SPDX-License-Identifier: Apache-2.0

//! Plain text cursor file with atomic writes.
//!
//! The file holds one timestamp and nothing else, so it stays human readable
//! and editable. Writes go to a temp file that is then renamed over the
//! original.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::journal::cursor::store::CursorStore;
use crate::journal::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TextFileCursorStore {
    path: PathBuf,
}

impl TextFileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CursorStore for TextFileCursorStore {
    fn load(&self) -> Result<Option<String>> {
        // Undecodable bytes are left for the timestamp parser to reject
        match fs::read(&self.path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                let value = contents.trim();
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(value.to_string()))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::fatal_io(&self.path, e)),
        }
    }

    fn store(&mut self, value: &str) -> Result<()> {
        atomic_write(&self.path, value).map_err(|e| Error::fatal_io(&self.path, e))
    }
}

/// Write contents to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    // Process ID plus counter keeps concurrent writers off each other's temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(contents.as_bytes())?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    // Close the handle before rename
    drop(writer);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}
