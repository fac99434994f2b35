// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use hashbrown::HashSet;
use log::debug;
use wasmtime::{
    Engine, ExternType, FuncType, Linker, Memory, MemoryType, SharedMemory, Store, TypedFunc,
    ValType,
};

use super::{gas::use_gas, Controls, HostState, LinearMemory};
use crate::{
    errors::InstantiationError, types::MAX_PAGES, Imports, Module, GAS_FUNCTION, GAS_MODULE,
};

/// Module and name of the imported print capability.
pub const PRINT_IMPORT: (&str, &str) = ("env", "print");

/// Module and name of the imported linear memory.
pub const MEMORY_IMPORT: (&str, &str) = ("env", "memory");

/// A live instance of an instrumented module and everything needed to drive it.
pub struct Sandbox {
    pub store: Store<HostState>,
    pub memory: LinearMemory,
    pub entry: TypedFunc<(), ()>,
}

impl Sandbox {
    /// Instantiates `module` against the host environment and `imports`.
    pub fn new(
        engine: &Engine,
        module: &Module,
        imports: &Imports,
        memory_max_pages: u64,
    ) -> Result<Self> {
        let info = module.memory();
        let maximum = info.limits.capped(memory_max_pages);
        let limit_error = || InstantiationError::MemoryLimit {
            initial: info.limits.min,
            maximum,
        };

        if info.limits.min > maximum {
            return Err(limit_error().into());
        }

        // A defined shared memory is created by wasmtime with its declared maximum.
        let declared = info.limits.max.unwrap_or(MAX_PAGES);
        if info.is_shared && !info.is_imported && declared > maximum {
            return Err(InstantiationError::SharedMemoryLimit {
                maximum: declared,
                ceiling: maximum,
            }
            .into());
        }

        let compiled = wasmtime::Module::new(engine, module.wasm())
            .map_err(|e| InstantiationError::Link(e.to_string()))?;

        let block = module.control_block();
        let mut store = Store::new(engine, HostState::new(block, memory_max_pages));
        store.limiter(|state| &mut state.limits);

        let mut linker = Linker::new(engine);
        linker.func_wrap(GAS_MODULE, GAS_FUNCTION, use_gas)?;

        let imported_memory = if info.is_imported {
            let min = u32::try_from(info.limits.min).map_err(|_| limit_error())?;
            let max = u32::try_from(maximum).map_err(|_| limit_error())?;

            let memory = if info.is_shared {
                let memory = SharedMemory::new(engine, MemoryType::shared(min, max))?;
                linker.define(&store, MEMORY_IMPORT.0, MEMORY_IMPORT.1, memory.clone())?;
                LinearMemory::Shared(memory)
            } else {
                let memory = Memory::new(&mut store, MemoryType::new(min, Some(max)))?;
                linker.define(&store, MEMORY_IMPORT.0, MEMORY_IMPORT.1, memory)?;
                LinearMemory::Owned(memory)
            };

            Some(memory)
        } else {
            None
        };

        define_imports(&mut linker, &compiled, imports)?;

        let instance = linker
            .instantiate(&mut store, &compiled)
            .map_err(|e| InstantiationError::Link(e.to_string()))?;

        let memory = match (imported_memory, module.memory_export()) {
            (Some(memory), _) => memory,
            (None, Some(name)) => {
                let missing = || InstantiationError::MissingExport(name.to_string());
                if info.is_shared {
                    let memory = instance.get_shared_memory(&mut store, name);
                    LinearMemory::Shared(memory.ok_or_else(missing)?)
                } else {
                    let memory = instance.get_memory(&mut store, name);
                    LinearMemory::Owned(memory.ok_or_else(missing)?)
                }
            }
            (None, None) => return Err(InstantiationError::MissingExport("memory".into()).into()),
        };

        let size = memory.data_size(&store);
        let required = block.required_memory();
        if size < required {
            return Err(InstantiationError::MemoryTooSmall { size, required }.into());
        }

        let controls = Controls::new(&instance, &mut store)?;
        let entry = instance
            .get_func(&mut store, module.entry())
            .ok_or_else(|| InstantiationError::MissingExport(module.entry().to_string()))?
            .typed::<(), ()>(&store)?;

        let state = store.data_mut();
        state.controls = Some(controls);
        state.memory = Some(memory.clone());

        debug!("instantiated with {} bytes of linear memory", size);

        Ok(Self {
            store,
            memory,
            entry,
        })
    }
}

/// Defines every function `compiled` imports, failing on the first one nobody provides.
fn define_imports(
    linker: &mut Linker<HostState>,
    compiled: &wasmtime::Module,
    imports: &Imports,
) -> Result<()> {
    let mut defined = HashSet::new();

    for import in compiled.imports() {
        let key = (import.module(), import.name());
        if key == (GAS_MODULE, GAS_FUNCTION) || key == MEMORY_IMPORT || !defined.insert(key) {
            continue;
        }

        let missing = || InstantiationError::MissingImport {
            module: key.0.to_string(),
            name: key.1.to_string(),
        };
        let incompatible = || InstantiationError::IncompatibleImport {
            module: key.0.to_string(),
            name: key.1.to_string(),
        };

        let ty = match import.ty() {
            ExternType::Func(ty) => ty,
            _ => return Err(missing().into()),
        };

        if key == PRINT_IMPORT {
            let print = imports.print().ok_or_else(missing)?.clone();
            if ty.results().len() > 0 {
                return Err(incompatible().into());
            }

            linker.func_new(key.0, key.1, ty, move |_, params, _| {
                print(params);
                Ok(())
            })?;
        } else {
            let function = imports.function(key.0, key.1).ok_or_else(missing)?;
            if !signature_matches(&ty, &function.params, &function.results) {
                return Err(incompatible().into());
            }

            let func = function.func.clone();
            linker.func_new(key.0, key.1, ty, move |_, params, results| {
                func(params, results)
            })?;
        }

        debug!("linked import {}.{}", key.0, key.1);
    }

    Ok(())
}

fn signature_matches(ty: &FuncType, params: &[ValType], results: &[ValType]) -> bool {
    ty.params().len() == params.len()
        && ty.results().len() == results.len()
        && ty.params().zip(params).all(|(a, b)| ValType::eq(&a, b))
        && ty.results().zip(results).all(|(a, b)| ValType::eq(&a, b))
}
