// Copyright 2022 the Gigamono authors. All rights reserved. GPL-3.0 License.
mod common;

use common::*;
use wasmo_sandbox::{
    ConstantCost, ControlBlock, ExecutionError, Executor, Imports, InstantiationError, Options,
};
use wasmtime::{Val, ValType};

#[test]
fn test_counter_pauses_every_five_prints() {
    let fixture = Fixture::new(COUNTER, calls_only);
    let mut executor = fixture.executor();

    assert!(!executor.run(5).unwrap());
    assert_eq!(fixture.output.take(), vec![0, 1, 2, 3, 4]);
    assert!(executor.is_paused());

    assert!(!executor.run(5).unwrap());
    assert_eq!(fixture.output.take(), vec![5, 6, 7, 8, 9]);

    assert!(!executor.run(5).unwrap());
    assert_eq!(fixture.output.take(), vec![10, 11, 12, 13, 14]);

    assert!(executor.run(5).unwrap());
    assert_eq!(fixture.output.take(), vec![15]);
    assert!(!executor.is_paused());
}

#[test]
fn test_exact_budget_finishes_with_zero_gas() {
    let fixture = Fixture::new(COUNTER, calls_only);
    assert_eq!(fixture.cost(), 16);

    let mut executor = fixture.executor();
    assert!(executor.run(16).unwrap());
    assert_eq!(executor.gas(), 0);
    assert_eq!(fixture.output.take(), (0..16).collect::<Vec<_>>());

    let fixture = Fixture::new(RECURSION, ConstantCost(1));
    let cost = fixture.cost();

    let mut executor = fixture.executor();
    assert!(executor.run(cost).unwrap());
    assert_eq!(executor.gas(), 0);

    let mut executor = fixture.executor();
    assert!(!executor.run(cost - 1).unwrap());
    assert!(executor.is_paused());
}

#[test]
fn test_split_run_matches_single_run() {
    let fixture = Fixture::new(RECURSION, ConstantCost(1));
    let cost = fixture.cost();

    let mut executor = fixture.executor();
    assert!(executor.run(cost).unwrap());
    let expected = fixture.output.take();

    // 12 down to 1, then the running sums back up.
    assert_eq!(expected.len(), 24);
    assert_eq!(expected[..3], [12, 11, 10]);
    assert_eq!(expected[23], 78);

    let half = cost / 2;
    let mut executor = fixture.executor();
    assert!(!executor.run(half).unwrap());
    assert!(executor.run(cost - half).unwrap());
    assert_eq!(executor.gas(), 0);
    assert_eq!(fixture.output.take(), expected);

    for budget in [1, 3, 7, 40] {
        let mut executor = fixture.executor();
        let mut ticks = 0;
        while !executor.run(budget).unwrap() {
            ticks += 1;
        }

        assert!(ticks > 0);
        assert_eq!(fixture.output.take(), expected, "budget {}", budget);
    }
}

#[test]
fn test_no_gas_does_not_enter_the_module() {
    let fixture = Fixture::new(COUNTER, calls_only);
    let mut executor = fixture.executor();

    assert!(!executor.run(0).unwrap());
    assert!(!executor.run(-3).unwrap());
    assert!(!executor.is_paused());
    assert_eq!(executor.gas(), -3);
    assert!(fixture.output.take().is_empty());
}

#[test]
fn test_overspent_gas_is_carried_into_the_next_tick() {
    let fixture = Fixture::new(COUNTER, calls_only);
    let mut executor = fixture.executor();

    assert!(!executor.run(5).unwrap());
    assert_eq!(executor.gas(), -1);
    fixture.output.take();

    // Pays off the debt without running.
    assert!(!executor.run(1).unwrap());
    assert_eq!(executor.gas(), 0);
    assert!(executor.is_paused());
    assert!(fixture.output.take().is_empty());

    // The checkpoint that paused was already charged, so five units print six values.
    assert!(!executor.run(5).unwrap());
    assert_eq!(fixture.output.take(), vec![5, 6, 7, 8, 9, 10]);
}

#[test]
fn test_finished_executor_runs_entry_again() {
    let fixture = Fixture::new(COUNTER, calls_only);
    let mut executor = fixture.executor();

    assert!(executor.run(20).unwrap());
    assert_eq!(executor.gas(), 4);
    assert!(executor.run(12).unwrap());
    assert_eq!(executor.gas(), 0);
    assert_eq!(fixture.output.take().len(), 32);
}

#[test]
fn test_host_functions_are_linked_by_declared_type() {
    let fixture = Fixture::new(HOST_CALL, calls_only);
    let double = |params: &[Val], results: &mut [Val]| -> anyhow::Result<()> {
        results[0] = Val::I32(params[0].unwrap_i32() * 2);
        Ok(())
    };

    let imports = fixture.output.imports().with_function(
        "host",
        "double",
        [ValType::I32],
        [ValType::I32],
        double,
    );

    let mut executor = fixture.runtime.executor(&fixture.module, &imports).unwrap();
    let mut ticks = 1;
    while !executor.run(3).unwrap() {
        ticks += 1;
    }

    assert_eq!(ticks, 4);
    assert_eq!(fixture.output.take(), vec![0, 2, 4, 6, 8]);

    let err = fixture
        .runtime
        .executor(&fixture.module, &fixture.output.imports())
        .err()
        .unwrap();

    assert_eq!(
        err.downcast_ref::<InstantiationError>(),
        Some(&InstantiationError::MissingImport {
            module: "host".into(),
            name: "double".into()
        })
    );

    let imports = fixture.output.imports().with_function(
        "host",
        "double",
        [ValType::I64],
        [ValType::I64],
        double,
    );

    let err = fixture
        .runtime
        .executor(&fixture.module, &imports)
        .err()
        .unwrap();

    assert_eq!(
        err.downcast_ref::<InstantiationError>(),
        Some(&InstantiationError::IncompatibleImport {
            module: "host".into(),
            name: "double".into()
        })
    );
}

#[test]
fn test_print_is_only_required_when_imported() {
    let silent = r#"
        (module
            (import "env" "memory" (memory 1))
            (func (export "entry") (local i32)
                (loop
                    (local.set 0 (i32.add (local.get 0) (i32.const 1)))
                    (br_if 0 (i32.lt_u (local.get 0) (i32.const 100))))))
    "#;

    let fixture = Fixture::new(silent, ConstantCost(1));
    let mut executor = fixture
        .runtime
        .executor(&fixture.module, &Imports::new())
        .unwrap();

    while !executor.run(50).unwrap() {}

    let fixture = Fixture::new(COUNTER, calls_only);
    let err = fixture
        .runtime
        .executor(&fixture.module, &Imports::new())
        .err()
        .unwrap();

    assert_eq!(
        err.downcast_ref::<InstantiationError>(),
        Some(&InstantiationError::MissingImport {
            module: "env".into(),
            name: "print".into()
        })
    );
}

#[test]
fn test_trap_faults_the_executor() {
    let fixture = Fixture::new(TRAP, ConstantCost(1));
    let mut executor = fixture.executor();

    let err = executor.run(100).unwrap_err();
    assert!(err.downcast_ref::<wasmtime::Trap>().is_some());
    assert!(executor.is_faulted());
    assert_eq!(fixture.output.take(), vec![1, 2]);

    let err = executor.run(100).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ExecutionError>(),
        Some(&ExecutionError::Faulted)
    );
    assert_eq!(executor.serialize_memory(), None);
    assert!(executor.deserialize_memory(&vec![0u8; 65536]).is_err());
}

#[test]
fn test_module_defined_memory_is_used() {
    let fixture = Fixture::new(PRIVATE_MEMORY, ConstantCost(1));
    let mut executor = fixture.executor();

    assert_eq!(&executor.memory()[4096..4107], b"snapshot me");

    while !executor.run(25).unwrap() {}

    let squares = (0..10).map(|i| i * i).collect::<Vec<_>>();
    assert_eq!(fixture.output.take(), squares);
    assert_eq!(executor.memory()[2048 + 4 * 9], 81);
}

#[test]
fn test_memory_growth_is_capped() {
    let options = Options {
        memory_max_pages: 4,
        ..Default::default()
    };

    let fixture = Fixture::with_options(GROW, options, ConstantCost(1));
    let mut executor = fixture.executor();

    assert!(executor.run(1000).unwrap());
    assert_eq!(fixture.output.take(), vec![1, -1, 2]);
    assert_eq!(executor.memory_size(), 2 * 65536);
}

#[test]
fn test_memory_over_the_ceiling_is_rejected() {
    let fixture = Fixture::new(COUNTER, calls_only);
    let imports = fixture.output.imports();
    let err = Executor::new(&fixture.runtime, &fixture.module, 0, &imports)
        .err()
        .unwrap();

    assert_eq!(
        err.downcast_ref::<InstantiationError>(),
        Some(&InstantiationError::MemoryLimit {
            initial: 1,
            maximum: 0
        })
    );
}

#[test]
fn test_stack_region_overflow_is_detected() {
    let options = Options {
        control_block: ControlBlock::new(16, 40),
        ..Default::default()
    };

    let fixture = Fixture::with_options(RECURSION, options, ConstantCost(1));
    let mut executor = fixture.executor();

    let err = executor.run(60).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExecutionError>(),
        Some(ExecutionError::StackOverflow { end: 40, .. })
    ));
    assert!(executor.is_faulted());
}

#[test]
fn test_huge_memory_ceiling_is_clamped() {
    let fixture = Fixture::new(GROW, ConstantCost(1));
    let imports = fixture.output.imports();

    for ceiling in [(1 << 32) + 1, u64::MAX] {
        let mut executor =
            Executor::new(&fixture.runtime, &fixture.module, ceiling, &imports).unwrap();

        assert!(executor.run(10_000).unwrap());
        assert_eq!(fixture.output.take(), vec![1, 2, 10]);
        assert_eq!(executor.memory_size(), 10 * 65536);
    }
}

#[test]
fn test_defined_shared_memory_must_fit_the_ceiling() {
    let source = r#"
        (module
            (memory 1 8 shared)
            (func (export "entry")))
    "#;

    let options = Options {
        memory_max_pages: 4,
        ..Default::default()
    };

    let fixture = Fixture::with_options(source, options, ConstantCost(1));
    let err = fixture
        .runtime
        .executor(&fixture.module, &Imports::new())
        .err()
        .unwrap();

    assert_eq!(
        err.downcast_ref::<InstantiationError>(),
        Some(&InstantiationError::SharedMemoryLimit {
            maximum: 8,
            ceiling: 4
        })
    );
}
