// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use std::{fmt, sync::Arc};

use anyhow::Result;
use hashbrown::HashMap;
use wasmtime::{Val, ValType};

type PrintFn = dyn Fn(&[Val]) + Send + Sync;
type HostFn = dyn Fn(&[Val], &mut [Val]) -> Result<()> + Send + Sync;

/// `Imports` is a set of user-supplied functions that are exposed to a WebAssembly `Instance`.
///
/// It does not need to resolve every import an instance needs. `env.memory` and the gas hook are
/// always provided by the executor, and a module that does not import `env.print` links fine
/// without one. Cloning is cheap, so one set can be shared by several executors.
#[derive(Clone, Default)]
pub struct Imports {
    print: Option<Arc<PrintFn>>,
    functions: HashMap<(String, String), HostFunction>,
}

/// A named host function with the type it is declared with.
#[derive(Clone)]
pub struct HostFunction {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
    pub func: Arc<HostFn>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the function `env.print` calls with its arguments.
    pub fn with_print(mut self, print: impl Fn(&[Val]) + Send + Sync + 'static) -> Self {
        self.print = Some(Arc::new(print));
        self
    }

    /// Adds a function imported as `module.name`.
    pub fn with_function(
        mut self,
        module: &str,
        name: &str,
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
        func: impl Fn(&[Val], &mut [Val]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(
            (module.to_string(), name.to_string()),
            HostFunction {
                params: params.into_iter().collect(),
                results: results.into_iter().collect(),
                func: Arc::new(func),
            },
        );
        self
    }

    pub fn print(&self) -> Option<&Arc<PrintFn>> {
        self.print.as_ref()
    }

    pub fn function(&self, module: &str, name: &str) -> Option<&HostFunction> {
        self.functions.get(&(module.to_string(), name.to_string()))
    }
}

impl fmt::Debug for Imports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Imports")
            .field("print", &self.print.is_some())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}
