// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use std::ops::Range;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use wasmtime::{AsContextMut, Instance, TypedFunc};

use crate::errors::InstantiationError;

pub const START_UNWIND: &str = "asyncify_start_unwind";
pub const STOP_UNWIND: &str = "asyncify_stop_unwind";
pub const START_REWIND: &str = "asyncify_start_rewind";
pub const STOP_REWIND: &str = "asyncify_stop_rewind";

/// Exports every instrumented module carries for suspending and resuming itself.
pub const CONTROL_EXPORTS: [&str; 4] = [START_UNWIND, STOP_UNWIND, START_REWIND, STOP_REWIND];

/// Where in linear memory the unwind/rewind control block lives.
///
/// The block holds two little-endian `i32` fields: the current position in the stack region and
/// the end of the stack region. The stack region starts right after the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlBlock {
    /// Address of the block.
    pub address: u32,
    /// Exclusive end of the stack region.
    pub stack_end: u32,
}

/// The stack-capture control functions of an instance.
#[derive(Clone)]
pub struct Controls {
    pub start_unwind: TypedFunc<i32, ()>,
    pub stop_unwind: TypedFunc<(), ()>,
    pub start_rewind: TypedFunc<i32, ()>,
    pub stop_rewind: TypedFunc<(), ()>,
}

impl ControlBlock {
    /// Size of the block itself.
    pub const SIZE: u32 = 8;

    pub fn new(address: u32, stack_end: u32) -> Self {
        Self { address, stack_end }
    }

    pub fn stack_start(&self) -> u32 {
        self.address + Self::SIZE
    }

    /// Addresses the module's own data must stay out of.
    pub fn reserved_range(&self) -> Range<u64> {
        self.address as u64..self.required_memory() as u64
    }

    /// Bytes of linear memory needed to hold the block and its stack region.
    pub fn required_memory(&self) -> usize {
        self.stack_end.max(self.stack_start()) as usize
    }

    /// The block as written before unwinding.
    pub fn encode(&self) -> [u8; 8] {
        let mut bytes = [0; 8];
        bytes[..4].copy_from_slice(&self.stack_start().to_le_bytes());
        bytes[4..].copy_from_slice(&self.stack_end.to_le_bytes());
        bytes
    }

    /// Reads the current stack position out of `memory`.
    pub fn position(&self, memory: &[u8]) -> Option<u32> {
        let start = self.address as usize;
        let bytes = memory.get(start..start + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self {
            address: 16,
            stack_end: 1024,
        }
    }
}

impl Controls {
    pub fn new(instance: &Instance, mut store: impl AsContextMut) -> Result<Self> {
        let mut get = |name: &str| {
            instance
                .get_func(&mut store, name)
                .ok_or_else(|| InstantiationError::MissingExport(name.to_string()))
        };

        let start_unwind = get(START_UNWIND)?;
        let stop_unwind = get(STOP_UNWIND)?;
        let start_rewind = get(START_REWIND)?;
        let stop_rewind = get(STOP_REWIND)?;

        Ok(Self {
            start_unwind: start_unwind.typed(&store)?,
            stop_unwind: stop_unwind.typed(&store)?,
            start_rewind: start_rewind.typed(&store)?,
            stop_rewind: stop_rewind.typed(&store)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let block = ControlBlock::default();

        assert_eq!(block.stack_start(), 24);
        assert_eq!(block.reserved_range(), 16..1024);
        assert_eq!(block.required_memory(), 1024);
        assert_eq!(block.encode(), [24, 0, 0, 0, 0, 4, 0, 0]);
    }

    #[test]
    fn test_position_is_read_back() {
        let block = ControlBlock::new(4, 64);
        let mut memory = vec![0u8; 64];
        memory[4..8].copy_from_slice(&40u32.to_le_bytes());

        assert_eq!(block.position(&memory), Some(40));
        assert_eq!(block.position(&memory[..6]), None);
    }

    #[test]
    fn test_degenerate_stack_region() {
        let block = ControlBlock::new(100, 50);

        assert_eq!(block.required_memory(), 108);
        assert_eq!(block.reserved_range(), 100..108);
    }
}
