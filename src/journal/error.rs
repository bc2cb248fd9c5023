// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use crate::uploader::UploadError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Journal directory {path} is not usable: {reason}")]
    DiscoveryRoot { path: PathBuf, reason: String },

    #[error("Skipping {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    #[error("Malformed journal line: {reason}")]
    Parse { reason: String },

    #[error("No Fileheader seen before this event")]
    MissingHeader,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Fatal IO error on {path}: {source}")]
    FatalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn parse(reason: impl ToString) -> Self {
        Error::Parse {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn fatal_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FatalIo {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DiscoveryRoot { .. } | Error::FatalIo { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
