// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use std::{cell::UnsafeCell, ptr, slice};

use anyhow::Result;
use wasmtime::{AsContext, AsContextMut, Memory, SharedMemory, Store};

use super::HostState;
use crate::errors::ExecutionError;

/// The linear memory of a sandbox, either owned by its store or shared.
#[derive(Clone)]
pub enum LinearMemory {
    Owned(Memory),
    Shared(SharedMemory),
}

impl LinearMemory {
    /// Current size in bytes.
    pub fn data_size(&self, store: impl AsContext) -> usize {
        match self {
            Self::Owned(memory) => memory.data_size(store),
            Self::Shared(memory) => memory.data_size(),
        }
    }

    /// A read-only view of the whole memory.
    pub fn data<'a>(&'a self, store: &'a Store<HostState>) -> &'a [u8] {
        match self {
            Self::Owned(memory) => memory.data(store),
            Self::Shared(memory) => {
                let cells = memory.data();
                // SAFETY: the memory is never handed to another thread, and no wasm runs while the
                // view is borrowed.
                unsafe { slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
            }
        }
    }

    /// Copies `bytes` into memory at `offset`.
    pub fn write(&self, store: impl AsContextMut, offset: usize, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Owned(memory) => memory.write(store, offset, bytes)?,
            Self::Shared(memory) => {
                let out_of_bounds = || ExecutionError::MemoryAccess {
                    offset,
                    len: bytes.len(),
                };

                let cells = memory.data();
                let end = offset.checked_add(bytes.len()).ok_or_else(out_of_bounds)?;
                let target = cells.get(offset..end).ok_or_else(out_of_bounds)?;

                // SAFETY: `target` is in bounds and nothing else touches the memory during a copy.
                unsafe {
                    ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        UnsafeCell::raw_get(target.as_ptr()),
                        bytes.len(),
                    )
                };
            }
        }

        Ok(())
    }
}
