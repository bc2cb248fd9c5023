// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// One line as read from disk, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number within the file
    pub number: usize,
    /// Line bytes including the terminator, if any
    pub bytes: Vec<u8>,
}

/// Sequential line reader over a single journal file.
///
/// Lines are returned as raw bytes so that invalid UTF-8 or NUL padding only
/// affects the line it appears on.
pub struct JournalReader {
    reader: BufReader<File>,
    line_number: usize,
    bytes_read: u64,
}

impl JournalReader {
    /// Open a journal file for reading from the beginning
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            reader: BufReader::new(file),
            line_number: 0,
            bytes_read: 0,
        })
    }

    /// Number of lines returned so far
    pub fn lines_read(&self) -> usize {
        self.line_number
    }

    /// Number of bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the next line, or None at end of file
    pub fn next_line(&mut self) -> io::Result<Option<RawLine>> {
        let mut bytes = Vec::new();
        let n = self.reader.read_until(b'\n', &mut bytes)?;
        if n == 0 {
            return Ok(None);
        }

        self.line_number += 1;
        self.bytes_read += n as u64;

        Ok(Some(RawLine {
            number: self.line_number,
            bytes,
        }))
    }
}
