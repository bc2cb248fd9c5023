// SPDX-License-Identifier: Apache-2.0

//! Resume cursor: the timestamp of the last line confirmed by the remote API.
//!
//! The cursor is the only state kept between runs. Lines strictly older than
//! the cursor loaded at startup are skipped; a line stamped exactly at the
//! cursor is sent again, so delivery at the boundary is at-least-once.

mod store;
mod text_file;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::journal::error::Result;

pub use store::{CursorStore, MemoryCursorStore};
pub use text_file::TextFileCursorStore;

pub struct ResumeCursor<S> {
    store: S,
    /// Cursor as loaded at startup; decides which lines are skipped
    resume_from: Option<DateTime<Utc>>,
    /// Latest confirmed timestamp; only ever moves forward
    last_forwarded: Option<DateTime<Utc>>,
}

impl<S: CursorStore> ResumeCursor<S> {
    /// Load the cursor from the store.
    ///
    /// A corrupt value is logged and treated as no cursor. Failing to read the
    /// store at all is returned as an error.
    pub fn load(store: S) -> Result<Self> {
        let resume_from = match store.load()? {
            None => None,
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(e) => {
                    warn!(value = %raw, error = %e, "Ignoring unparseable resume cursor, starting from the beginning");
                    None
                }
            },
        };

        debug!(cursor = ?resume_from, "Loaded resume cursor");

        Ok(Self {
            store,
            resume_from,
            last_forwarded: resume_from,
        })
    }

    /// True if the line is older than the cursor loaded at startup
    pub fn should_skip(&self, timestamp: DateTime<Utc>) -> bool {
        self.resume_from.is_some_and(|cursor| timestamp < cursor)
    }

    /// Move the cursor to `timestamp` if it is newer, persisting the new value.
    ///
    /// Returns whether the cursor moved. Only call this for confirmed uploads,
    /// in line order.
    pub fn advance(&mut self, timestamp: DateTime<Utc>) -> Result<bool> {
        if self.last_forwarded.is_some_and(|current| timestamp <= current) {
            return Ok(false);
        }

        self.store.store(&format_cursor(timestamp))?;
        self.last_forwarded = Some(timestamp);

        Ok(true)
    }

    pub fn resume_from(&self) -> Option<DateTime<Utc>> {
        self.resume_from
    }

    pub fn last_forwarded(&self) -> Option<DateTime<Utc>> {
        self.last_forwarded
    }
}

/// RFC 3339 in UTC with a `Z` suffix; sub-second digits only when present
pub fn format_cursor(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
