// SPDX-License-Identifier: Apache-2.0

//! Discovery and chronological ordering of journal files.
//!
//! Journal files are named `Journal.<datetime>.<part>.log`. The datetime token
//! is either `YYYY-MM-DDTHHMMSS` or, for files written by older game versions,
//! `YYMMDDHHMMSS`. Both are local wall-clock times without an offset; they are
//! read as UTC since they only serve as an ordering key.

use chrono::{DateTime, NaiveDateTime, Utc};
use glob::glob;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::journal::error::{Error, Result};

pub const DEFAULT_PREFIX: &str = "Journal";
pub const DEFAULT_EXTENSION: &str = "log";

const TOKEN_FORMAT: &str = "%Y-%m-%dT%H%M%S";
const LEGACY_TOKEN_FORMAT: &str = "%y%m%d%H%M%S";

/// A discovered journal file and the timestamp embedded in its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalFile {
    pub path: PathBuf,
    pub embedded_timestamp: DateTime<Utc>,
}

impl JournalFile {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Result of a directory scan: usable files in order, plus the files that
/// looked like journals but could not be used.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<JournalFile>,
    pub rejected: Vec<Error>,
}

/// JournalFinder recursively finds journal files below a root directory
#[derive(Debug, Clone)]
pub struct JournalFinder {
    root: PathBuf,
    prefix: String,
    extension: String,
}

impl JournalFinder {
    /// Create a finder using the standard `Journal.*.log` naming convention
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Find all journal files, ordered by embedded timestamp then file name.
    ///
    /// Fails only when the root itself is unusable; individual bad entries
    /// are collected in [`Discovery::rejected`].
    pub fn find_files(&self) -> Result<Discovery> {
        if !self.root.is_dir() {
            return Err(Error::DiscoveryRoot {
                path: self.root.clone(),
                reason: "not an existing directory".to_string(),
            });
        }

        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let pattern = format!("{}/**/{}.*", root, glob::Pattern::escape(&self.prefix));
        let matches = glob(&pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut discovery = Discovery::default();

        for entry in matches {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    discovery.rejected.push(Error::Discovery {
                        path: e.path().to_path_buf(),
                        reason: e.error().to_string(),
                    });
                    continue;
                }
            };

            // Skip directories and anything else that is not a regular file
            if !path.is_file() {
                continue;
            }

            if !seen.insert(path.clone()) {
                continue;
            }

            match self.parse_name(&path) {
                Ok(embedded_timestamp) => discovery.files.push(JournalFile {
                    path,
                    embedded_timestamp,
                }),
                Err(reason) => discovery.rejected.push(Error::Discovery { path, reason }),
            }
        }

        discovery.files.sort_by(|a, b| {
            a.embedded_timestamp
                .cmp(&b.embedded_timestamp)
                .then_with(|| a.file_name().cmp(b.file_name()))
        });

        Ok(discovery)
    }

    /// Split `<prefix>.<datetime>.<part>.<ext>` and parse the datetime token
    fn parse_name(&self, path: &Path) -> std::result::Result<DateTime<Utc>, String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| "file name is not valid UTF-8".to_string())?;

        let parts: Vec<&str> = name.split('.').collect();
        let [prefix, token, part, extension] = parts.as_slice() else {
            return Err(format!(
                "expected {}.<datetime>.<part>.{}",
                self.prefix, self.extension
            ));
        };

        if *prefix != self.prefix || *extension != self.extension {
            return Err(format!(
                "expected {}.<datetime>.<part>.{}",
                self.prefix, self.extension
            ));
        }

        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("part number {:?} is not numeric", part));
        }

        parse_token(token)
    }
}

fn parse_token(token: &str) -> std::result::Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(token, TOKEN_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(token, LEGACY_TOKEN_FORMAT))
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid datetime token {:?}: {}", token, e))
}
