// SPDX-License-Identifier: Apache-2.0

//! Decoding of single journal lines.
//!
//! Every line is a JSON object carrying at least `timestamp` and `event`. Only
//! those two fields are interpreted; the rest of the line travels to the remote
//! API untouched. The one exception is the `Fileheader` event, whose version
//! metadata must accompany every later upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::journal::error::{Error, Result};

/// Event kind of the header line that opens every journal file.
pub const FILE_HEADER_EVENT: &str = "Fileheader";

/// The two fields every journal line carries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JournalEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "event")]
    pub event_kind: String,
}

/// Session metadata from a `Fileheader` line.
///
/// Unknown fields are ignored so newer game versions can add to the header
/// without breaking decoding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileHeaderMeta {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "event")]
    pub event_kind: String,
    #[serde(default)]
    pub part: u32,
    #[serde(default)]
    pub language: String,
    #[serde(rename = "gameversion", default)]
    pub game_version: String,
    #[serde(default)]
    pub build: String,
    #[serde(rename = "Odyssey", default)]
    pub odyssey: bool,
}

/// A decoded journal line.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEvent {
    pub envelope: JournalEnvelope,
    /// Present only when the line is itself a `Fileheader`.
    pub header: Option<FileHeaderMeta>,
    /// The line text as it is forwarded, without padding or line terminator.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Blank, whitespace-only or NUL padding.
    NoOp,
    Event(JournalEvent),
}

/// Parser for raw journal lines. Holds no state; the current header is tracked
/// by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct LineParser;

impl LineParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one raw line (with or without its trailing newline).
    pub fn parse(&self, raw: &[u8]) -> Result<ParsedLine> {
        let trimmed = trim_padding(raw);
        if trimmed.is_empty() {
            return Ok(ParsedLine::NoOp);
        }

        let text = std::str::from_utf8(trimmed)
            .map_err(|e| Error::parse(format!("invalid UTF-8: {}", e)))?;

        let envelope: JournalEnvelope =
            serde_json::from_str(text).map_err(|e| Error::parse(format!("invalid JSON: {}", e)))?;

        let header = if envelope.event_kind == FILE_HEADER_EVENT {
            let header: FileHeaderMeta = serde_json::from_str(text)
                .map_err(|e| Error::parse(format!("invalid Fileheader: {}", e)))?;
            Some(header)
        } else {
            None
        };

        Ok(ParsedLine::Event(JournalEvent {
            envelope,
            header,
            message: text.to_string(),
        }))
    }
}

/// Strip NUL padding from pre-allocated files along with surrounding
/// whitespace and the line terminator.
fn trim_padding(raw: &[u8]) -> &[u8] {
    let is_pad = |b: &u8| *b == 0 || b.is_ascii_whitespace();

    let start = raw.iter().position(|b| !is_pad(b)).unwrap_or(raw.len());
    let end = raw.iter().rposition(|b| !is_pad(b)).map_or(start, |i| i + 1);

    &raw[start..end]
}
