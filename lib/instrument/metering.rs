// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use std::convert::Infallible;

use anyhow::Result;
use log::debug;
use wasm_encoder::{
    reencode::{Error, Reencode},
    CodeSection, EntityType, ExportKind, ExportSection, Function, ImportSection, Instruction,
    NameSection, SectionId, TypeSection, ValType,
};
use wasmparser::{
    ExportSectionReader, FunctionBody, ImportSectionReader, Name, Operator, Parser,
    TypeSectionReader,
};

use super::{info::ModuleInfo, Rules, GAS_FUNCTION, GAS_MODULE};
use crate::errors::ModuleError;

/// Rewrites a module so that every metered segment charges its cost to the gas hook before it runs.
///
/// The hook is added as the last function import, so every defined function moves up one index.
/// A defined memory the module keeps private can be exported on the way.
pub struct GasInjector<'a> {
    rules: &'a dyn Rules,
    /// Name to export the defined memory under.
    memory_export: Option<&'a str>,
    /// Index of the `(i32) -> ()` type appended to the type section.
    hook_type: u32,
    /// Function index of the hook import.
    hook_function: u32,
    types_emitted: bool,
    imports_emitted: bool,
    functions_metered: u32,
}

/// A run of instructions that is always entered at the top.
#[derive(Default)]
struct Segment<'a> {
    cost: u32,
    instructions: Vec<Instruction<'a>>,
}

impl<'a> GasInjector<'a> {
    pub fn new(info: &ModuleInfo, rules: &'a dyn Rules) -> Self {
        Self {
            rules,
            memory_export: None,
            hook_type: info.types.len() as u32,
            hook_function: info.imported_function_count(),
            types_emitted: false,
            imports_emitted: false,
            functions_metered: 0,
        }
    }

    /// Exports memory 0 as `name`.
    pub fn export_memory(mut self, name: &'a str) -> Self {
        self.memory_export = Some(name);
        self
    }

    /// Returns the metered module.
    pub fn inject(mut self, wasm: &[u8]) -> Result<Vec<u8>> {
        let mut module = wasm_encoder::Module::new();

        self.parse_core_module(&mut module, Parser::new(0), wasm)
            .map_err(|e| ModuleError::Parse(e.to_string()))?;

        debug!(
            "metered {} functions, hook at function index {}",
            self.functions_metered, self.hook_function
        );

        Ok(module.finish())
    }

    fn push_hook_type(&mut self, types: &mut TypeSection) {
        types.ty().function([ValType::I32], []);
        self.types_emitted = true;
    }

    fn push_hook_import(&mut self, imports: &mut ImportSection) {
        imports.import(GAS_MODULE, GAS_FUNCTION, EntityType::Function(self.hook_type));
        self.imports_emitted = true;
    }

    fn push_memory_export(&mut self, exports: &mut ExportSection) {
        if let Some(name) = self.memory_export.take() {
            exports.export(name, ExportKind::Memory, 0);
        }
    }

    /// Writes out `segment` preceded by its charge.
    fn flush(&self, function: &mut Function, segment: &mut Segment) {
        if segment.cost > 0 {
            let cost = i32::try_from(segment.cost).unwrap_or(i32::MAX);
            function.instruction(&Instruction::I32Const(cost));
            function.instruction(&Instruction::Call(self.hook_function));
        }

        for instruction in segment.instructions.drain(..) {
            function.instruction(&instruction);
        }

        segment.cost = 0;
    }
}

impl Reencode for GasInjector<'_> {
    type Error = Infallible;

    fn function_index(&mut self, func: u32) -> Result<u32, Error<Self::Error>> {
        Ok(if func >= self.hook_function {
            func + 1
        } else {
            func
        })
    }

    fn parse_type_section(
        &mut self,
        types: &mut TypeSection,
        section: TypeSectionReader<'_>,
    ) -> Result<(), Error<Self::Error>> {
        wasm_encoder::reencode::utils::parse_type_section(self, types, section)?;
        self.push_hook_type(types);
        Ok(())
    }

    fn parse_import_section(
        &mut self,
        imports: &mut ImportSection,
        section: ImportSectionReader<'_>,
    ) -> Result<(), Error<Self::Error>> {
        wasm_encoder::reencode::utils::parse_import_section(self, imports, section)?;
        self.push_hook_import(imports);
        Ok(())
    }

    fn parse_export_section(
        &mut self,
        exports: &mut ExportSection,
        section: ExportSectionReader<'_>,
    ) -> Result<(), Error<Self::Error>> {
        wasm_encoder::reencode::utils::parse_export_section(self, exports, section)?;
        self.push_memory_export(exports);
        Ok(())
    }

    fn intersperse_section_hook(
        &mut self,
        module: &mut wasm_encoder::Module,
        _after: Option<SectionId>,
        before: Option<SectionId>,
    ) -> Result<(), Error<Self::Error>> {
        // Modules without a type or import section still need the hook declared.
        if !self.types_emitted && before != Some(SectionId::Type) {
            let mut types = TypeSection::new();
            self.push_hook_type(&mut types);
            module.section(&types);
        }

        if !self.imports_emitted
            && !matches!(before, Some(SectionId::Type) | Some(SectionId::Import))
        {
            let mut imports = ImportSection::new();
            self.push_hook_import(&mut imports);
            module.section(&imports);
        }

        let past_exports = matches!(
            before,
            None | Some(SectionId::Start)
                | Some(SectionId::Element)
                | Some(SectionId::DataCount)
                | Some(SectionId::Code)
                | Some(SectionId::Data)
        );

        if self.memory_export.is_some() && past_exports {
            let mut exports = ExportSection::new();
            self.push_memory_export(&mut exports);
            module.section(&exports);
        }

        Ok(())
    }

    /// Keeps only the name subsections binaryen reads. It warns on stderr about the rest.
    fn parse_custom_name_subsection(
        &mut self,
        names: &mut NameSection,
        section: Name<'_>,
    ) -> Result<(), Error<Self::Error>> {
        match section {
            Name::Label(_) | Name::Tag(_) | Name::Unknown { .. } => Ok(()),
            section => wasm_encoder::reencode::utils::parse_custom_name_subsection(
                self, names, section,
            ),
        }
    }

    fn parse_function_body(
        &mut self,
        code: &mut CodeSection,
        func: FunctionBody<'_>,
    ) -> Result<(), Error<Self::Error>> {
        let mut function = self.new_function_with_parsed_locals(&func)?;
        let mut reader = func.get_operators_reader()?;
        let mut segment = Segment::default();

        while !reader.eof() {
            let operator = reader.read()?;
            let ends_segment = ends_segment(&operator);

            segment.cost = segment.cost.saturating_add(self.rules.cost(&operator));
            segment.instructions.push(self.instruction(operator)?);

            if ends_segment {
                self.flush(&mut function, &mut segment);
            }
        }

        self.flush(&mut function, &mut segment);
        code.function(&function);
        self.functions_metered += 1;

        Ok(())
    }
}

/// Whether control can leave or enter straight after `operator`.
fn ends_segment(operator: &Operator) -> bool {
    use Operator::*;

    matches!(
        operator,
        Block { .. }
            | Loop { .. }
            | If { .. }
            | Else
            | End
            | Br { .. }
            | BrIf { .. }
            | BrTable { .. }
            | BrOnNull { .. }
            | BrOnNonNull { .. }
            | BrOnCast { .. }
            | BrOnCastFail { .. }
            | Return
            | ReturnCall { .. }
            | ReturnCallIndirect { .. }
            | ReturnCallRef { .. }
            | MemoryGrow { .. }
            | Unreachable
            | Try { .. }
            | TryTable { .. }
            | Catch { .. }
            | CatchAll
            | Delegate { .. }
            | Throw { .. }
            | ThrowRef
            | Rethrow { .. }
    )
}
