// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use log::{debug, info};
use wasmtime::{Config, Engine, OptLevel};

use crate::{
    errors::ExecutionError,
    host::{HostState, Sandbox},
    Imports, Module, Options,
};

/// Owns the engine every executor compiles against.
///
/// Executors made by the same runtime can exchange memory snapshots.
#[derive(Clone)]
pub struct Runtime {
    engine: Engine,
    options: Options,
}

/// Drives one instance of an instrumented module, tick by tick.
///
/// Each call to [`Executor::run`] tops up the gas counter and calls the entry function. When the
/// counter goes negative at a checkpoint the instance unwinds to the host and the executor is
/// paused. The next `run` rewinds it and carries on from that checkpoint.
pub struct Executor {
    sandbox: Sandbox,
    faulted: bool,
}

impl Runtime {
    pub fn new(options: Options) -> Result<Self> {
        let mut config = Config::new();
        config
            .max_wasm_stack(options.max_wasm_stack)
            .wasm_threads(true)
            .shared_memory(true)
            .cranelift_opt_level(OptLevel::Speed);

        let engine = Engine::new(&config)?;

        Ok(Self { engine, options })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Instruments `wasm` with this runtime's options.
    pub fn instrument(&self, wasm: &[u8]) -> Result<Module> {
        Module::new(wasm, &self.options)
    }

    /// Creates an executor capped at this runtime's `memory_max_pages`.
    pub fn executor(&self, module: &Module, imports: &Imports) -> Result<Executor> {
        Executor::new(self, module, self.options.memory_max_pages, imports)
    }
}

impl Executor {
    /// Instantiates `module` with a fresh linear memory and zero gas.
    pub fn new(
        runtime: &Runtime,
        module: &Module,
        memory_max_pages: u64,
        imports: &Imports,
    ) -> Result<Self> {
        let sandbox = Sandbox::new(runtime.engine(), module, imports, memory_max_pages)?;

        info!(
            "created executor for `{}` ({} pages max)",
            module.entry(),
            memory_max_pages
        );

        Ok(Self {
            sandbox,
            faulted: false,
        })
    }

    /// Adds `budget` to the gas counter and runs one tick.
    ///
    /// Returns `true` if the entry function returned and `false` if the executor paused or had no
    /// gas to start with. Any trap faults the executor for good.
    pub fn run(&mut self, budget: i64) -> Result<bool> {
        if self.faulted {
            return Err(ExecutionError::Faulted.into());
        }

        let result = self.tick(budget);
        if result.is_err() {
            self.faulted = true;
        }

        result
    }

    /// Remaining gas. Negative once a tick has overspent.
    pub fn gas(&self) -> i64 {
        self.state().gas
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Whether a trap stopped the executor.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// A read-only view of linear memory.
    pub fn memory(&self) -> &[u8] {
        self.sandbox.memory.data(&self.sandbox.store)
    }

    /// Current size of linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.sandbox.memory.data_size(&self.sandbox.store)
    }
}

impl Executor {
    fn tick(&mut self, budget: i64) -> Result<bool> {
        let Sandbox {
            store,
            memory,
            entry,
            ..
        } = &mut self.sandbox;

        let state = store.data_mut();
        state.gas = state.gas.saturating_add(budget);

        if state.gas <= 0 {
            debug!("no gas to run with ({})", state.gas);
            return Ok(false);
        }

        let block = state.control_block;
        let controls = state.controls()?;

        if state.paused {
            debug!("rewinding from control block at {}", block.address);
            controls
                .start_rewind
                .call(&mut *store, block.address as i32)?;
        }

        entry.call(&mut *store, ())?;

        if !store.data().paused {
            debug!("tick finished with {} gas", store.data().gas);
            return Ok(true);
        }

        // Checked before `asyncify_stop_unwind`, which would trap on the same condition.
        let position = block
            .position(memory.data(&*store))
            .unwrap_or(u32::MAX);

        if position > block.stack_end {
            return Err(ExecutionError::StackOverflow {
                position,
                end: block.stack_end,
            }
            .into());
        }

        controls.stop_unwind.call(&mut *store, ())?;

        debug!(
            "paused with {} bytes of captured stack",
            position.saturating_sub(block.stack_start())
        );

        Ok(false)
    }

    fn state(&self) -> &HostState {
        self.sandbox.store.data()
    }

    pub(crate) fn state_mut(&mut self) -> &mut HostState {
        self.sandbox.store.data_mut()
    }

    /// Overwrites linear memory from offset 0.
    pub(crate) fn write_memory(&mut self, bytes: &[u8]) -> Result<()> {
        let Sandbox { store, memory, .. } = &mut self.sandbox;
        memory.write(store, 0, bytes)
    }
}
