// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use crate::journal::error::Result;

/// Durable storage for the single cursor value.
pub trait CursorStore: Send {
    /// Read the stored value. `Ok(None)` means nothing has been stored yet.
    fn load(&self) -> Result<Option<String>>;

    /// Replace the stored value.
    fn store(&mut self, value: &str) -> Result<()>;
}

/// In-memory cursor store. Clones share the same value, which lets callers
/// observe what a coordinator has written.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    value: Option<String>,
    writes: usize,
}

impl MemoryCursorStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a value
    pub fn with_value(value: impl Into<String>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.inner.lock() {
            state.value = Some(value.into());
        }
        store
    }

    /// Current stored value
    pub fn value(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|s| s.value.clone())
    }

    /// Number of `store` calls so far
    pub fn writes(&self) -> usize {
        self.inner.lock().map(|s| s.writes).unwrap_or(0)
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.value())
    }

    fn store(&mut self, value: &str) -> Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        state.value = Some(value.to_string());
        state.writes += 1;
        Ok(())
    }
}
