// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

mod control;
mod gas;
mod link;
mod memory;
mod state;

pub use control::*;
pub use link::*;
pub use memory::*;
pub use state::*;
