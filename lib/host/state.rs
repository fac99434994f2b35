// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use wasmtime::{StoreLimits, StoreLimitsBuilder};

use super::{ControlBlock, Controls, LinearMemory};
use crate::{
    errors::InstantiationError,
    types::{MAX_PAGES, PAGE_SIZE},
};

/// Data every store of the sandbox carries.
///
/// The gas hook and the executor share it through the store, so the hook sees the same counter and
/// flag the executor reads after each tick.
pub struct HostState {
    /// Remaining gas. Goes negative once a tick overspends.
    pub gas: i64,
    /// Whether the instance is unwound and waiting to be rewound.
    pub paused: bool,
    pub control_block: ControlBlock,
    /// Set once the instance exists.
    pub controls: Option<Controls>,
    /// Set once the memory exists.
    pub memory: Option<LinearMemory>,
    pub limits: StoreLimits,
}

impl HostState {
    pub fn new(control_block: ControlBlock, memory_max_pages: u64) -> Self {
        let bytes = memory_max_pages
            .min(MAX_PAGES)
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .unwrap_or(usize::MAX);

        let limits = StoreLimitsBuilder::new()
            .memory_size(bytes)
            .memories(1)
            .build();

        Self {
            gas: 0,
            paused: false,
            control_block,
            controls: None,
            memory: None,
            limits,
        }
    }

    pub fn controls(&self) -> Result<Controls> {
        self.controls
            .clone()
            .ok_or_else(|| InstantiationError::MissingExport("asyncify_*".into()).into())
    }

    pub fn memory(&self) -> Result<LinearMemory> {
        self.memory
            .clone()
            .ok_or_else(|| InstantiationError::MissingExport("memory".into()).into())
    }
}
