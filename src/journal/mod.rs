// SPDX-License-Identifier: Apache-2.0

pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod finder;
pub mod parser;
pub mod reader;

pub use coordinator::{CoordinatorConfig, IngestStats, JournalCoordinator};
pub use error::{Error, Result};
pub use finder::{Discovery, JournalFile, JournalFinder};
