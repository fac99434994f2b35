// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use log::{info, trace};
use wasmtime::Caller;

use super::HostState;

/// The gas hook, imported by instrumented modules as `metering.usegas`.
///
/// While running it charges `cost` and, once the counter goes negative, writes the control block
/// and starts unwinding. While paused it is being reached again by a rewind, so it stops the
/// rewind instead. The checkpoint was already paid for on the way out.
pub fn use_gas(mut caller: Caller<'_, HostState>, cost: i32) -> Result<()> {
    if caller.data().paused {
        trace!("usegas({}) reached by rewind", cost);

        let controls = caller.data().controls()?;
        controls.stop_rewind.call(&mut caller, ())?;
        caller.data_mut().paused = false;

        info!("resumed with {} gas", caller.data().gas);
        return Ok(());
    }

    let state = caller.data_mut();
    state.gas -= i64::from(cost);

    trace!("usegas({}) -> {}", cost, state.gas);

    if state.gas >= 0 {
        return Ok(());
    }

    let block = state.control_block;
    let memory = state.memory()?;
    let controls = state.controls()?;

    memory.write(&mut caller, block.address as usize, &block.encode())?;
    controls.start_unwind.call(&mut caller, block.address as i32)?;
    caller.data_mut().paused = true;

    info!("out of gas ({}), unwinding", caller.data().gas);

    Ok(())
}
