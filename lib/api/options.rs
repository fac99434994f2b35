// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use serde::{Deserialize, Serialize};

use crate::{host::ControlBlock, CostTable};

/// The different options for configuring instrumentation and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Name of the exported function each tick calls.
    pub entry: String,
    /// Ceiling on linear memory, in pages.
    pub memory_max_pages: u64,
    /// Layout of the unwind/rewind control block.
    pub control_block: ControlBlock,
    /// Gas charged per operator.
    pub costs: CostTable,
    /// Binaryen optimize level, 0 to 4.
    pub optimize_level: u8,
    /// Binaryen shrink level, 0 to 2.
    pub shrink_level: u8,
    /// Whether to run binaryen's default optimization passes before asyncify.
    pub default_passes: bool,
    /// Maximum native stack, in bytes, a tick may use.
    pub max_wasm_stack: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            entry: "entry".into(),
            memory_max_pages: 256,
            control_block: ControlBlock::default(),
            costs: CostTable::default(),
            optimize_level: 3,
            shrink_level: 0,
            default_passes: false,
            max_wasm_stack: 512 * 1024,
        }
    }
}
