// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use log::debug;
use wasm_opt::{Feature, OptimizationOptions, OptimizeLevel, Pass, ShrinkLevel};
use wasmparser::{Validator, WasmFeatures};

use super::{GAS_FUNCTION, GAS_MODULE};
use crate::{errors::ModuleError, Options};

/// The features binaryen is told to accept.
const FEATURES: [Feature; 8] = [
    Feature::MutableGlobals,
    Feature::SignExt,
    Feature::TruncSat,
    Feature::BulkMemory,
    Feature::Multivalue,
    Feature::Atomics,
    Feature::Simd,
    Feature::ReferenceTypes,
];

/// Proposals the stack-capture pass cannot handle, or that binaryen is not told about.
fn unsupported_features() -> WasmFeatures {
    WasmFeatures::TAIL_CALL
        | WasmFeatures::EXCEPTIONS
        | WasmFeatures::LEGACY_EXCEPTIONS
        | WasmFeatures::GC
        | WasmFeatures::FUNCTION_REFERENCES
        | WasmFeatures::MEMORY64
        | WasmFeatures::MULTI_MEMORY
        | WasmFeatures::RELAXED_SIMD
        | WasmFeatures::EXTENDED_CONST
        | WasmFeatures::COMPONENT_MODEL
}

/// Validates `wasm` against the features the stack-capture pass is run with.
///
/// Catches modules binaryen would otherwise refuse with a less helpful message.
pub fn check_features(wasm: &[u8]) -> Result<()> {
    let mut features = WasmFeatures::default();
    features.remove(unsupported_features());

    Validator::new_with_features(features)
        .validate_all(wasm)
        .map_err(|e| ModuleError::Validation(e.message().to_string()))?;

    Ok(())
}

/// Runs binaryen's asyncify pass over a metered module.
///
/// Only calls to the gas hook become suspension points. The output exports `asyncify_start_unwind`,
/// `asyncify_stop_unwind`, `asyncify_start_rewind` and `asyncify_stop_rewind`.
pub fn capture_stack(wasm: &[u8], options: &Options) -> Result<Vec<u8>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("metered.wasm");
    let output = dir.path().join("instrumented.wasm");

    std::fs::write(&input, wasm)?;

    let mut opts = OptimizationOptions::new_opt_level_0();
    opts.optimize_level(optimize_level(options.optimize_level))
        .shrink_level(shrink_level(options.shrink_level))
        .add_default_passes(options.default_passes)
        .add_pass(Pass::Asyncify)
        .set_pass_arg("asyncify-imports", &format!("{GAS_MODULE}.{GAS_FUNCTION}"));

    for feature in FEATURES {
        opts.enable_feature(feature);
    }

    debug!(
        "running asyncify (optimize level {}, shrink level {}, default passes {})",
        options.optimize_level, options.shrink_level, options.default_passes
    );

    opts.run(&input, &output)
        .map_err(|e| ModuleError::StackCapture(e.to_string()))?;

    Ok(std::fs::read(&output)?)
}

fn optimize_level(level: u8) -> OptimizeLevel {
    match level {
        0 => OptimizeLevel::Level0,
        1 => OptimizeLevel::Level1,
        2 => OptimizeLevel::Level2,
        3 => OptimizeLevel::Level3,
        _ => OptimizeLevel::Level4,
    }
}

fn shrink_level(level: u8) -> ShrinkLevel {
    match level {
        0 => ShrinkLevel::Level0,
        1 => ShrinkLevel::Level1,
        _ => ShrinkLevel::Level2,
    }
}
