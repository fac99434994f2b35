// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

//! A metered, suspendable and serializable WebAssembly sandbox.
//!
//! A raw module is instrumented once with gas accounting and stack capture support, then driven
//! tick by tick by an [`Executor`]. When a tick runs out of gas the executor pauses mid-flight,
//! and its linear memory can be moved into another executor which picks up where it left off.

mod api;
mod errors;
mod host;
mod instrument;
mod types;

pub use api::*;
pub use errors::*;
pub use host::ControlBlock;
pub use instrument::{ConstantCost, CostTable, Instrumenter, Rules, GAS_FUNCTION, GAS_MODULE};
pub use types::*;
