// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.

use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use wasmparser::Operator;

/// Decides how much gas an operator costs.
///
/// DynClone helps us clone a &dyn Rules as Box<dyn Rules>.
pub trait Rules: DynClone + Send + Sync {
    /// Returns the cost of executing `operator` once.
    fn cost(&self, operator: &Operator) -> u32;
}

dyn_clone::clone_trait_object!(Rules);

/// Every operator costs the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantCost(pub u32);

/// Costs assigned per class of operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTable {
    /// Structured control and branches.
    pub control: u32,
    /// Direct, indirect and tail calls.
    pub call: u32,
    /// Loads and stores.
    pub memory_access: u32,
    /// `memory.grow`.
    pub memory_grow: u32,
    /// Everything else.
    pub default: u32,
}

impl Default for ConstantCost {
    fn default() -> Self {
        Self(1)
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            control: 1,
            call: 2,
            memory_access: 2,
            memory_grow: 1024,
            default: 1,
        }
    }
}

impl Rules for ConstantCost {
    fn cost(&self, _: &Operator) -> u32 {
        self.0
    }
}

impl Rules for CostTable {
    fn cost(&self, operator: &Operator) -> u32 {
        use Operator::*;

        match operator {
            Block { .. } | Loop { .. } | If { .. } | Else | End | Br { .. } | BrIf { .. }
            | BrTable { .. } | Return | Unreachable | Nop => self.control,
            Call { .. }
            | CallIndirect { .. }
            | CallRef { .. }
            | ReturnCall { .. }
            | ReturnCallIndirect { .. }
            | ReturnCallRef { .. } => self.call,
            MemoryGrow { .. } => self.memory_grow,
            I32Load { .. }
            | I64Load { .. }
            | F32Load { .. }
            | F64Load { .. }
            | I32Load8S { .. }
            | I32Load8U { .. }
            | I32Load16S { .. }
            | I32Load16U { .. }
            | I64Load8S { .. }
            | I64Load8U { .. }
            | I64Load16S { .. }
            | I64Load16U { .. }
            | I64Load32S { .. }
            | I64Load32U { .. }
            | I32Store { .. }
            | I64Store { .. }
            | F32Store { .. }
            | F64Store { .. }
            | I32Store8 { .. }
            | I32Store16 { .. }
            | I64Store8 { .. }
            | I64Store16 { .. }
            | I64Store32 { .. }
            | MemoryCopy { .. }
            | MemoryFill { .. }
            | MemoryInit { .. } => self.memory_access,
            _ => self.default,
        }
    }
}

impl<F> Rules for F
where
    F: Fn(&Operator) -> u32 + Clone + Send + Sync,
{
    fn cost(&self, operator: &Operator) -> u32 {
        self(operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_table_classes() {
        let table = CostTable::default();

        assert_eq!(table.cost(&Operator::Loop { blockty: wasmparser::BlockType::Empty }), 1);
        assert_eq!(table.cost(&Operator::Call { function_index: 0 }), 2);
        assert_eq!(table.cost(&Operator::MemoryGrow { mem: 0 }), 1024);
        assert_eq!(table.cost(&Operator::I32Add), 1);
    }

    fn calls_only(operator: &Operator) -> u32 {
        match operator {
            Operator::Call { .. } => 7,
            _ => 0,
        }
    }

    #[test]
    fn test_rules_as_trait_objects() {
        let rules: Vec<Box<dyn Rules>> = vec![Box::new(ConstantCost(3)), Box::new(calls_only)];

        let cloned = rules.clone();
        let call = Operator::Call { function_index: 1 };

        assert_eq!(cloned[0].cost(&call), 3);
        assert_eq!(cloned[1].cost(&call), 7);
        assert_eq!(cloned[1].cost(&Operator::Nop), 0);
    }
}
