// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

mod executor;
mod imports;
mod module;
mod options;
mod snapshot;

pub use executor::*;
pub use imports::*;
pub use module::*;
pub use options::*;
