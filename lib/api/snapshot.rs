// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use log::info;

use crate::{
    errors::{ExecutionError, SnapshotError},
    Executor,
};

impl Executor {
    /// Copies out the whole of linear memory.
    ///
    /// Only a paused executor has a consistent memory to copy, so this returns `None` otherwise.
    /// The copy includes the control block, which records where execution stopped.
    pub fn serialize_memory(&self) -> Option<Vec<u8>> {
        if !self.is_paused() || self.is_faulted() {
            return None;
        }

        Some(self.memory().to_vec())
    }

    /// Overwrites linear memory with `bytes` and pauses the executor.
    ///
    /// The next [`Executor::run`] rewinds from the control block inside `bytes`. Fails without
    /// touching memory if `bytes` is not exactly as long as memory currently is.
    pub fn deserialize_memory(&mut self, bytes: &[u8]) -> Result<()> {
        if self.is_faulted() {
            return Err(ExecutionError::Faulted.into());
        }

        let expected = self.memory_size();
        if bytes.len() != expected {
            return Err(SnapshotError::MemorySizeMismatch {
                expected,
                actual: bytes.len(),
            }
            .into());
        }

        self.write_memory(bytes)?;
        self.state_mut().paused = true;

        info!("installed {} byte memory snapshot", expected);

        Ok(())
    }
}
