// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.
use std::{fs, path::PathBuf};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use wasmo_sandbox::{Executor, Imports, Module, Options, Runtime};
use wasmtime::Val;

#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    #[clap(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs a module tick by tick until its entry function returns.
    Run {
        /// A `.wasm` or `.wat` module, or an instrumented artifact with `--artifact`.
        file: PathBuf,
        /// Gas added before each tick.
        #[clap(long, default_value_t = 10000)]
        gas: i64,
        /// Ceiling on linear memory, in pages.
        #[clap(long, default_value_t = 256)]
        memory_max_pages: u64,
        /// Name of the exported entry function.
        #[clap(long, default_value = "entry")]
        entry: String,
        /// Treat `file` as the output of `instrument`.
        #[clap(long)]
        artifact: bool,
        /// Move the paused state into a fresh executor after this many ticks.
        #[clap(long)]
        migrate_after: Option<usize>,
        /// Stop after this many ticks.
        #[clap(long)]
        max_ticks: Option<usize>,
        /// Where to write linear memory if the run stops while paused.
        #[clap(long)]
        snapshot: Option<PathBuf>,
        /// Start from a memory snapshot written by an earlier run.
        #[clap(long)]
        resume: Option<PathBuf>,
    },
    /// Instruments a module and writes the result as an artifact.
    Instrument {
        /// A `.wasm` or `.wat` module.
        file: PathBuf,
        /// Where to write the artifact.
        #[clap(short, long)]
        output: PathBuf,
        /// Name of the exported entry function.
        #[clap(long, default_value = "entry")]
        entry: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    match Args::parse().commands {
        Commands::Run {
            file,
            gas,
            memory_max_pages,
            entry,
            artifact,
            migrate_after,
            max_ticks,
            snapshot,
            resume,
        } => {
            let options = Options {
                entry,
                memory_max_pages,
                ..Default::default()
            };

            let runtime = Runtime::new(options)?;
            let bytes = fs::read(&file)?;
            let module = if artifact {
                Module::from_bytes(&bytes)?
            } else {
                runtime.instrument(&bytes)?
            };

            let imports = Imports::new().with_print(|values| {
                let line = values.iter().map(format_val).collect::<Vec<_>>();
                println!("{}", line.join(" "));
            });

            let mut executor = runtime.executor(&module, &imports)?;
            if let Some(path) = resume {
                executor.deserialize_memory(&fs::read(&path)?)?;
                println!("Resuming from {}", path.display());
            }

            let mut ticks = 0;
            loop {
                ticks += 1;

                if executor.run(gas)? {
                    println!("Finished execution after {} ticks", ticks);
                    break;
                }

                println!("Paused after tick {} ({} gas)", ticks, executor.gas());

                if migrate_after == Some(ticks) {
                    executor = migrate(&runtime, &module, &imports, &executor)?;
                }

                if max_ticks == Some(ticks) {
                    if let Some(path) = snapshot {
                        let memory = executor
                            .serialize_memory()
                            .ok_or_else(|| anyhow!("executor is not paused"))?;
                        fs::write(&path, &memory)?;
                        println!("Wrote {} bytes of memory to {}", memory.len(), path.display());
                    }
                    break;
                }
            }
        }
        Commands::Instrument {
            file,
            output,
            entry,
        } => {
            let options = Options {
                entry,
                ..Default::default()
            };

            let module = Module::new(&fs::read(&file)?, &options)?;
            fs::write(&output, module.to_bytes()?)?;

            info!("wrote {} to {}", file.display(), output.display());
        }
    }

    Ok(())
}

/// Moves a paused executor's memory into a new executor of the same module.
fn migrate(
    runtime: &Runtime,
    module: &Module,
    imports: &Imports,
    executor: &Executor,
) -> Result<Executor> {
    let memory = executor
        .serialize_memory()
        .ok_or_else(|| anyhow!("executor is not paused"))?;

    let mut next = runtime.executor(module, imports)?;
    next.deserialize_memory(&memory)?;

    println!("Migrated {} bytes of memory into a new executor", memory.len());

    Ok(next)
}

fn format_val(value: &Val) -> String {
    match value {
        Val::I32(v) => v.to_string(),
        Val::I64(v) => v.to_string(),
        Val::F32(bits) => f32::from_bits(*bits).to_string(),
        Val::F64(bits) => f64::from_bits(*bits).to_string(),
        v => format!("{:?}", v),
    }
}
