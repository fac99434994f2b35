// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{host::ControlBlock, Instrumenter, Limits, MemoryInfo, Options};

/// A WebAssembly module with gas accounting and stack capture compiled in.
///
/// Module is serializable, so instrumentation can be done once and the result cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    wasm: Vec<u8>,
    entry: String,
    memory: MemoryInfo,
    /// Export name of a defined memory.
    memory_export: Option<String>,
    control_block: ControlBlock,
}

impl Module {
    /// Instruments `wasm` with the given options.
    pub fn new(wasm: &[u8], options: &Options) -> Result<Self> {
        Instrumenter::new(options.clone()).instrument(wasm)
    }

    pub(crate) fn from_parts(
        wasm: Vec<u8>,
        entry: String,
        memory: MemoryInfo,
        memory_export: Option<String>,
        control_block: ControlBlock,
    ) -> Self {
        Self {
            wasm,
            entry,
            memory,
            memory_export,
            control_block,
        }
    }

    /// The instrumented binary.
    pub fn wasm(&self) -> &[u8] {
        &self.wasm
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn memory(&self) -> &MemoryInfo {
        &self.memory
    }

    /// Declared initial and maximum page counts.
    pub fn limits(&self) -> Limits {
        self.memory.limits
    }

    pub fn is_shared(&self) -> bool {
        self.memory.is_shared
    }

    pub fn memory_export(&self) -> Option<&str> {
        self.memory_export.as_deref()
    }

    pub fn control_block(&self) -> ControlBlock {
        self.control_block
    }

    /// Serializes the module with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
