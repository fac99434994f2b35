// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use std::fmt::Display;

/// Errors raised while instrumenting a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    Parse(String),
    MissingEntry(String),
    EntrySignature(String),
    NoMemory,
    MultipleMemories,
    Memory64,
    MemoryLimit { initial: u64, maximum: u64 },
    ReservedImport { module: String, name: String },
    ReservedRangeOverlap { offset: u32, len: u32 },
    StartFunction,
    Validation(String),
    UnsupportedSection(String),
    StackCapture(String),
}

/// Errors raised while instantiating an instrumented module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstantiationError {
    MissingImport { module: String, name: String },
    IncompatibleImport { module: String, name: String },
    MissingExport(String),
    MemoryLimit { initial: u64, maximum: u64 },
    MemoryTooSmall { size: usize, required: usize },
    SharedMemoryLimit { maximum: u64, ceiling: u64 },
    Link(String),
}

/// Errors raised when installing a memory snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    MemorySizeMismatch { expected: usize, actual: usize },
}

/// Errors raised while running an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    Faulted,
    StackOverflow { position: u32, end: u32 },
    MemoryAccess { offset: usize, len: usize },
}

impl std::error::Error for ModuleError {}

impl std::error::Error for InstantiationError {}

impl std::error::Error for SnapshotError {}

impl std::error::Error for ExecutionError {}

impl Display for ModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "module could not be parsed: {msg}"),
            Self::MissingEntry(name) => write!(f, "module does not export entry function `{name}`"),
            Self::EntrySignature(name) => {
                write!(f, "entry function `{name}` must take no parameters and return nothing")
            }
            Self::NoMemory => write!(f, "module declares no linear memory"),
            Self::MultipleMemories => write!(f, "module declares more than one linear memory"),
            Self::Memory64 => write!(f, "64-bit linear memories are not supported"),
            Self::MemoryLimit { initial, maximum } => write!(
                f,
                "initial memory of {initial} pages exceeds the limit of {maximum} pages"
            ),
            Self::ReservedImport { module, name } => {
                write!(f, "module imports the reserved function `{module}.{name}`")
            }
            Self::ReservedRangeOverlap { offset, len } => write!(
                f,
                "data segment at {offset} ({len} bytes) overlaps the reserved control block range"
            ),
            Self::StartFunction => write!(f, "modules with a start function cannot be metered"),
            Self::Validation(msg) => {
                write!(f, "module is invalid or uses an unsupported feature: {msg}")
            }
            t => write!(f, "{:?}", t),
        }
    }
}

impl Display for InstantiationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingImport { module, name } => {
                write!(f, "no host definition for import `{module}.{name}`")
            }
            Self::IncompatibleImport { module, name } => {
                write!(f, "host definition for `{module}.{name}` has an incompatible type")
            }
            Self::MissingExport(name) => write!(f, "instrumented module does not export `{name}`"),
            Self::MemoryLimit { initial, maximum } => write!(
                f,
                "initial memory of {initial} pages exceeds the limit of {maximum} pages"
            ),
            Self::MemoryTooSmall { size, required } => write!(
                f,
                "linear memory of {size} bytes cannot hold the control block ({required} bytes)"
            ),
            Self::SharedMemoryLimit { maximum, ceiling } => write!(
                f,
                "shared memory may grow to {maximum} pages, past the limit of {ceiling} pages"
            ),
            t => write!(f, "{:?}", t),
        }
    }
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemorySizeMismatch { expected, actual } => write!(
                f,
                "memory size mismatch: expected {expected} bytes, got {actual}"
            ),
        }
    }
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Faulted => write!(f, "executor trapped earlier and can no longer run"),
            Self::StackOverflow { position, end } => write!(
                f,
                "captured stack reached {position}, past the end of the stack region at {end}"
            ),
            Self::MemoryAccess { offset, len } => {
                write!(f, "{len} byte access at {offset} is out of bounds")
            }
        }
    }
}
