// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use anyhow::Result;
use hashbrown::HashMap;
use log::debug;
use wasmparser::{
    DataKind, DataSectionReader, ExportSectionReader, ExternalKind, FuncType,
    FunctionSectionReader, ImportSectionReader, MemorySectionReader, MemoryType, Operator, Parser,
    Payload, TypeRef, TypeSectionReader,
};

use crate::{errors::ModuleError, types::Limits, MemoryInfo};

/// A function imported by the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionImport {
    pub module: String,
    pub name: String,
    pub type_index: u32,
}

/// An active data segment whose offset is a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSegment {
    pub offset: u32,
    pub len: u32,
}

/// What the instrumenter needs to know about a module before rewriting it.
#[derive(Debug, Default)]
pub struct ModuleInfo {
    /// An ordered list of types from the type section.
    pub types: Vec<FuncType>,
    /// Imported functions. These occupy the first indices of the function index space.
    pub function_imports: Vec<FunctionImport>,
    /// Type index of every function, imported ones included.
    pub functions: Vec<u32>,
    /// Exports by name.
    pub exports: HashMap<String, (ExternalKind, u32)>,
    /// Every memory, imported or defined.
    pub memories: Vec<MemoryInfo>,
    /// Whether any memory uses 64-bit indices.
    pub memory64: bool,
    /// Active data segments with constant offsets.
    pub data: Vec<DataSegment>,
    /// The start function.
    pub start: Option<u32>,
}

impl ModuleInfo {
    /// Walks every section of `wasm`.
    pub fn scan(wasm: &[u8]) -> Result<Self> {
        let mut info = Self::default();

        for payload in Parser::new(0).parse_all(wasm) {
            match payload.map_err(parse_error)? {
                Payload::Version { .. } => (),
                Payload::TypeSection(reader) => {
                    debug!("======= TypeSection =======");
                    info.scan_types(reader)?;
                }
                Payload::ImportSection(reader) => {
                    debug!("======= ImportSection =======");
                    info.scan_imports(reader)?;
                }
                Payload::FunctionSection(reader) => {
                    debug!("======= FunctionSection =======");
                    info.scan_functions(reader)?;
                }
                Payload::MemorySection(reader) => {
                    debug!("======= MemorySection =======");
                    info.scan_memories(reader)?;
                }
                Payload::ExportSection(reader) => {
                    debug!("======= ExportSection =======");
                    info.scan_exports(reader)?;
                }
                Payload::DataSection(reader) => {
                    debug!("======= DataSection =======");
                    info.scan_data(reader)?;
                }
                Payload::StartSection { func, .. } => {
                    debug!("======= StartSection =======");
                    debug!("start function: {}", func);
                    info.start = Some(func);
                }
                Payload::CustomSection(reader) => {
                    debug!("======= CustomSection =======");
                    debug!("custom section name: {:?}", reader.name());
                }
                Payload::CodeSectionStart { count, .. } => {
                    debug!("======= CodeSectionStart =======");
                    debug!("function bodies: {}", count);
                }
                Payload::CodeSectionEntry(_) => (),
                Payload::TableSection(_)
                | Payload::GlobalSection(_)
                | Payload::ElementSection(_)
                | Payload::DataCountSection { .. }
                | Payload::TagSection(_) => (),
                Payload::End(_) => {
                    debug!("======= End =======");
                }
                t => {
                    return Err(ModuleError::UnsupportedSection(format!("{:?}", t)).into());
                }
            }
        }

        Ok(info)
    }

    /// The number of imported functions.
    pub fn imported_function_count(&self) -> u32 {
        self.function_imports.len() as u32
    }

    /// Returns the type of the function at `index` in the function index space.
    pub fn function_type(&self, index: u32) -> Option<&FuncType> {
        let type_index = *self.functions.get(index as usize)?;
        self.types.get(type_index as usize)
    }
}

impl ModuleInfo {
    fn scan_types(&mut self, reader: TypeSectionReader) -> Result<()> {
        for result in reader.into_iter_err_on_gc_types() {
            let ty = result.map_err(parse_error)?;

            debug!("type: {:?}", ty);

            self.types.push(ty);
        }

        Ok(())
    }

    fn scan_imports(&mut self, reader: ImportSectionReader) -> Result<()> {
        for result in reader.into_iter() {
            let import = result.map_err(parse_error)?;

            debug!("import: {:?}", import);

            match import.ty {
                TypeRef::Func(type_index) | TypeRef::FuncExact(type_index) => {
                    self.function_imports.push(FunctionImport {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        type_index,
                    });
                    self.functions.push(type_index);
                }
                TypeRef::Memory(ty) => self.push_memory(ty, true),
                _ => (),
            }
        }

        Ok(())
    }

    fn scan_functions(&mut self, reader: FunctionSectionReader) -> Result<()> {
        for result in reader.into_iter() {
            let type_index = result.map_err(parse_error)?;
            self.functions.push(type_index);
        }

        Ok(())
    }

    fn scan_memories(&mut self, reader: MemorySectionReader) -> Result<()> {
        for result in reader.into_iter() {
            let ty = result.map_err(parse_error)?;

            debug!("memory: {:?}", ty);

            self.push_memory(ty, false);
        }

        Ok(())
    }

    fn scan_exports(&mut self, reader: ExportSectionReader) -> Result<()> {
        for result in reader.into_iter() {
            let export = result.map_err(parse_error)?;

            debug!("export: {:?}", export);

            self.exports
                .insert(export.name.to_string(), (export.kind, export.index));
        }

        Ok(())
    }

    fn scan_data(&mut self, reader: DataSectionReader) -> Result<()> {
        for result in reader.into_iter() {
            let data = result.map_err(parse_error)?;

            if let DataKind::Active { offset_expr, .. } = data.kind {
                let mut operators = offset_expr.get_operators_reader();

                // Offsets computed from imported globals cannot be checked ahead of time.
                if let Ok(Operator::I32Const { value }) = operators.read() {
                    let segment = DataSegment {
                        offset: value as u32,
                        len: data.data.len() as u32,
                    };

                    debug!("data segment: {:?}", segment);

                    self.data.push(segment);
                }
            }
        }

        Ok(())
    }

    fn push_memory(&mut self, ty: MemoryType, is_imported: bool) {
        self.memory64 |= ty.memory64;
        self.memories.push(MemoryInfo {
            limits: Limits::new(ty.initial, ty.maximum),
            is_shared: ty.shared,
            is_imported,
        });
    }
}

fn parse_error(err: wasmparser::BinaryReaderError) -> ModuleError {
    ModuleError::Parse(err.to_string())
}
