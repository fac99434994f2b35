// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use log::{debug, info};
use wasmparser::ExternalKind;

use super::{
    asyncify::{capture_stack, check_features},
    info::ModuleInfo,
    metering::GasInjector,
    Rules, GAS_FUNCTION, GAS_MODULE,
};
use crate::{errors::ModuleError, host::CONTROL_EXPORTS, MemoryInfo, Module, Options};

/// Turns raw modules into instrumented ones.
///
/// The metering pass charges gas at the start of every metered segment and the stack-capture pass
/// makes every function able to unwind to the host and rewind back later.
#[derive(Clone)]
pub struct Instrumenter {
    options: Options,
    rules: Box<dyn Rules>,
}

impl Instrumenter {
    /// Creates an instrumenter that costs operators with `options.costs`.
    pub fn new(options: Options) -> Self {
        let rules = Box::new(options.costs.clone());
        Self { options, rules }
    }

    /// Replaces the cost rules.
    pub fn with_rules(mut self, rules: impl Rules + 'static) -> Self {
        self.rules = Box::new(rules);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Instruments `wasm`, which may be in binary or text format.
    pub fn instrument(&self, wasm: &[u8]) -> Result<Module> {
        let wasm = wat::parse_bytes(wasm).map_err(|e| ModuleError::Parse(e.to_string()))?;

        let info = ModuleInfo::scan(&wasm)?;
        let memory = self.check(&info)?;
        check_features(&wasm)?;
        let memory_export = memory_export_name(&info, &memory);

        let mut injector = GasInjector::new(&info, self.rules.as_ref());
        if let (false, Some(name)) = (has_memory_export(&info), memory_export.as_deref()) {
            injector = injector.export_memory(name);
        }

        let metered = injector.inject(&wasm)?;
        let instrumented = capture_stack(&metered, &self.options)?;

        self.check_exports(&instrumented)?;

        info!(
            "instrumented module: {} bytes in, {} bytes out",
            wasm.len(),
            instrumented.len()
        );

        Ok(Module::from_parts(
            instrumented,
            self.options.entry.clone(),
            memory,
            memory_export,
            self.options.control_block,
        ))
    }
}

impl Instrumenter {
    /// Rejects modules the executor cannot drive.
    fn check(&self, info: &ModuleInfo) -> Result<MemoryInfo> {
        let entry = &self.options.entry;

        match info.exports.get(entry) {
            Some((ExternalKind::Func, index)) => {
                let ty = info
                    .function_type(*index)
                    .ok_or_else(|| ModuleError::MissingEntry(entry.clone()))?;

                if !ty.params().is_empty() || !ty.results().is_empty() {
                    return Err(ModuleError::EntrySignature(entry.clone()).into());
                }
            }
            _ => return Err(ModuleError::MissingEntry(entry.clone()).into()),
        }

        // Start functions run during instantiation, before there is a tick to pause.
        if info.start.is_some() {
            return Err(ModuleError::StartFunction.into());
        }

        let memory = match info.memories[..] {
            [] => return Err(ModuleError::NoMemory.into()),
            [memory] => memory,
            _ => return Err(ModuleError::MultipleMemories.into()),
        };

        // TODO(appcypher): Support memory64 once the control block layout can hold 64-bit pointers.
        if info.memory64 {
            return Err(ModuleError::Memory64.into());
        }

        let limits = memory.limits;
        let ceiling = limits.capped(self.options.memory_max_pages);
        if limits.min > ceiling {
            return Err(ModuleError::MemoryLimit {
                initial: limits.min,
                maximum: ceiling,
            }
            .into());
        }

        if let Some(import) = info
            .function_imports
            .iter()
            .find(|import| import.module == GAS_MODULE && import.name == GAS_FUNCTION)
        {
            return Err(ModuleError::ReservedImport {
                module: import.module.clone(),
                name: import.name.clone(),
            }
            .into());
        }

        let reserved = self.options.control_block.reserved_range();
        for segment in info.data.iter() {
            let start = segment.offset as u64;
            let end = start + segment.len as u64;

            if start < reserved.end && end > reserved.start {
                return Err(ModuleError::ReservedRangeOverlap {
                    offset: segment.offset,
                    len: segment.len,
                }
                .into());
            }
        }

        debug!("memory: {:?}", memory);

        Ok(memory)
    }

    /// Makes sure the stack-capture pass left every export the executor calls.
    fn check_exports(&self, instrumented: &[u8]) -> Result<()> {
        let info = ModuleInfo::scan(instrumented)?;

        let names = CONTROL_EXPORTS
            .iter()
            .copied()
            .chain(std::iter::once(self.options.entry.as_str()));

        for name in names {
            if !matches!(info.exports.get(name), Some((ExternalKind::Func, _))) {
                return Err(ModuleError::StackCapture(format!("missing export `{name}`")).into());
            }
        }

        Ok(())
    }
}

fn has_memory_export(info: &ModuleInfo) -> bool {
    info.exports
        .values()
        .any(|(kind, _)| *kind == ExternalKind::Memory)
}

/// Returns the name a defined memory is reachable under, picking a free one if it is not exported.
fn memory_export_name(info: &ModuleInfo, memory: &MemoryInfo) -> Option<String> {
    if memory.is_imported {
        return None;
    }

    let exported = info
        .exports
        .iter()
        .find(|(_, (kind, _))| *kind == ExternalKind::Memory)
        .map(|(name, _)| name.clone());

    exported.or_else(|| {
        let mut name = String::from("memory");
        while info.exports.contains_key(&name) {
            name.push('_');
        }
        Some(name)
    })
}
