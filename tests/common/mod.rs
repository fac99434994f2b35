// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use wasmo_sandbox::{Executor, Imports, Instrumenter, Module, Options, Rules, Runtime};
use wasmparser::Operator;
use wasmtime::Val;

pub const COUNTER: &str = include_str!("../samples/counter.wat");
pub const RECURSION: &str = include_str!("../samples/recursion.wat");
pub const PRIVATE_MEMORY: &str = include_str!("../samples/private_memory.wat");
pub const GROW: &str = include_str!("../samples/grow.wat");
pub const TRAP: &str = include_str!("../samples/trap.wat");
pub const HOST_CALL: &str = include_str!("../samples/host_call.wat");
pub const SHARED_COUNTER: &str = include_str!("../samples/shared_counter.wat");

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Charges one unit per call, so a loop that prints once costs one unit per iteration.
pub fn calls_only(operator: &Operator) -> u32 {
    match operator {
        Operator::Call { .. } => 1,
        _ => 0,
    }
}

/// Collects every value passed to `env.print`.
#[derive(Clone, Default)]
pub struct Output(Arc<Mutex<Vec<i32>>>);

impl Output {
    pub fn imports(&self) -> Imports {
        let output = self.clone();
        Imports::new().with_print(move |values| {
            let mut printed = output.0.lock().unwrap();
            printed.extend(values.iter().filter_map(Val::i32));
        })
    }

    /// Returns everything printed since the last call.
    pub fn take(&self) -> Vec<i32> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

pub fn instrument(source: &str, options: &Options, rules: impl Rules + 'static) -> Module {
    init();
    let wasm = wat::parse_str(source).unwrap();
    Instrumenter::new(options.clone())
        .with_rules(rules)
        .instrument(&wasm)
        .unwrap()
}

/// A runtime, an instrumented module and an output sink to create executors from.
pub struct Fixture {
    pub runtime: Runtime,
    pub module: Module,
    pub output: Output,
}

impl Fixture {
    pub fn new(source: &str, rules: impl Rules + 'static) -> Self {
        Self::with_options(source, Options::default(), rules)
    }

    pub fn with_options(source: &str, options: Options, rules: impl Rules + 'static) -> Self {
        let module = instrument(source, &options, rules);
        let runtime = Runtime::new(options).unwrap();

        Self {
            runtime,
            module,
            output: Output::default(),
        }
    }

    pub fn executor(&self) -> Executor {
        self.runtime
            .executor(&self.module, &self.output.imports())
            .unwrap()
    }

    /// Total cost of one tick that runs to completion.
    pub fn cost(&self) -> i64 {
        let budget = 1 << 40;
        let mut executor = self.executor();

        assert!(executor.run(budget).unwrap());
        self.output.take();

        budget - executor.gas()
    }
}
