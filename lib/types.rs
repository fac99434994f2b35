// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use serde::{Deserialize, Serialize};

/// WebAssembly memory page size.
/// 64KiB.
pub const PAGE_SIZE: u64 = 65536;

/// Most pages a 32-bit linear memory can have.
pub const MAX_PAGES: u64 = 65536;

/// WebAssembly memory limits, in pages.
///
/// 64-bit types are used for page counts so that they can be compared against any configured
/// ceiling without casts.
///
/// https://webassembly.github.io/spec/core/syntax/types.html#syntax-limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Limits {
    /// Intial page count.
    pub min: u64,
    /// Maximum page count.
    pub max: Option<u64>,
}

/// The linear memory a module declares, either by importing it or by defining it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MemoryInfo {
    pub limits: Limits,
    pub is_shared: bool,
    /// Whether the memory is imported as `env.memory` rather than defined by the module.
    pub is_imported: bool,
}

impl Limits {
    pub fn new(min: u64, max: Option<u64>) -> Self {
        Self { min, max }
    }

    /// Returns the maximum page count once capped by `ceiling` and by [`MAX_PAGES`].
    pub fn capped(&self, ceiling: u64) -> u64 {
        let ceiling = ceiling.min(MAX_PAGES);
        self.max.map_or(ceiling, |max| max.min(ceiling))
    }

    pub fn min_bytes(&self) -> u64 {
        self.min * PAGE_SIZE
    }
}
