// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use std::fmt::{self, Debug, Formatter};

pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Application-level reply the API may send alongside a 2xx status
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiReply {
    pub msgnum: i64,
    #[serde(default)]
    pub msg: String,
}

impl ApiReply {
    /// 2xx message numbers report a refused request (unknown commander, bad
    /// API key, blocked software)
    pub fn is_rejection(&self) -> bool {
        (200..300).contains(&self.msgnum)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Retry,
    Rejected,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn reply(&self) -> Option<ApiReply> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn verdict(&self) -> Verdict {
        if self.status.is_success() {
            return match self.reply() {
                Some(reply) if reply.is_rejection() => Verdict::Rejected,
                _ => Verdict::Accepted,
            };
        }

        if is_retryable_status(self.status) {
            Verdict::Retry
        } else {
            Verdict::Rejected
        }
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    match status.as_u16() {
        code if code < 200 => true,
        408 | 429 => true,
        500..=599 => true,
        _ => false,
    }
}

impl Debug for ApiResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HTTPResponse{{Status={}, Body={:?}}}",
            self.status,
            self.body_text()
        )
    }
}
