// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

mod asyncify;
mod info;
mod instrumenter;
mod metering;
mod rules;

pub use instrumenter::*;
pub use rules::*;

/// Import module of the gas hook.
pub const GAS_MODULE: &str = "metering";

/// Import name of the gas hook.
pub const GAS_FUNCTION: &str = "usegas";
