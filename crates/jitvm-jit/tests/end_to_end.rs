//! End-to-end scenarios: bytecode in, native machine code out, executed
//! through the call bridge and checked against the expected arithmetic
//! result (and, where useful, against the reference IR interpreter).

use jitvm_abi::{Value, REQUIRED_HELPERS};
use jitvm_jit::bytecode::{BytecodeFunction, Module, Opcode};
use jitvm_jit::config::OptLevel;
use jitvm_jit::driver::Driver;
use jitvm_jit::ir;
use jitvm_jit::runtime::call_bridge;
use jitvm_jit::runtime::helpers::HelperRegistry;
use jitvm_jit::JitConfig;

use proptest::prelude::*;

fn full_helpers() -> HelperRegistry {
    let mut helpers = HelperRegistry::new();
    for (i, name) in REQUIRED_HELPERS.iter().enumerate() {
        helpers.register(name, 0x5000 + i);
    }
    helpers
}

fn driver_at(level: OptLevel, module: Module) -> Driver {
    let mut config = JitConfig::default();
    config.worker_threads = 1;
    config.optimization_level = level;
    Driver::new(config, module, full_helpers())
}

fn call(driver: &Driver, func_index: u32, args: &[i64]) -> i64 {
    driver.compile(func_index).unwrap();
    let entry = driver.function_table().address_of(func_index).unwrap();
    unsafe { call_bridge::call_bridge(entry, args) }.unwrap()
}

fn push_const(code: &mut Vec<u8>, index: u16) {
    code.push(Opcode::PushConst as u8);
    code.extend_from_slice(&index.to_le_bytes());
}

fn load_local(code: &mut Vec<u8>, slot: u16) {
    code.push(Opcode::LoadLocal as u8);
    code.extend_from_slice(&slot.to_le_bytes());
}

fn store_local(code: &mut Vec<u8>, slot: u16) {
    code.push(Opcode::StoreLocal as u8);
    code.extend_from_slice(&slot.to_le_bytes());
}

// Scenario 1: a function that only ever returns a pooled constant.
#[test]
fn constant_return() {
    let mut code = Vec::new();
    push_const(&mut code, 0);
    code.push(Opcode::Return as u8);

    let mut module = Module::new();
    module.push(BytecodeFunction::new("answer", 0, 0, code).with_constants(vec![Value::int(42)]));

    let driver = driver_at(OptLevel::O2, module);
    assert_eq!(call(&driver, 0, &[]), 42);
}

// Scenario 2: addition of two arguments, 0-indexed parameter locals.
#[test]
fn integer_addition_of_arguments() {
    let mut code = Vec::new();
    load_local(&mut code, 0);
    load_local(&mut code, 1);
    code.push(Opcode::Add as u8);
    code.push(Opcode::Return as u8);

    let mut module = Module::new();
    module.push(BytecodeFunction::new("add", 2, 2, code));

    let driver = driver_at(OptLevel::O1, module);
    assert_eq!(call(&driver, 0, &[10, 20]), 30);
    assert_eq!(call(&driver, 0, &[-5, 5]), 0);
}

// Scenario 3: a chain of constant additions collapses to a single
// constant by the time it reaches the optimizer's fixed point.
#[test]
fn constant_folding_collapses_an_addition_chain() {
    let mut code = Vec::new();
    push_const(&mut code, 0); // 1
    push_const(&mut code, 1); // 2
    code.push(Opcode::Add as u8);
    push_const(&mut code, 2); // 3
    code.push(Opcode::Add as u8);
    push_const(&mut code, 3); // 4
    code.push(Opcode::Add as u8);
    push_const(&mut code, 4); // 5
    code.push(Opcode::Add as u8);
    code.push(Opcode::Return as u8);

    let mut module = Module::new();
    module.push(
        BytecodeFunction::new("sum_of_constants", 0, 0, code).with_constants(vec![
            Value::int(1),
            Value::int(2),
            Value::int(3),
            Value::int(4),
            Value::int(5),
        ]),
    );

    let driver = driver_at(OptLevel::O1, module);
    assert_eq!(call(&driver, 0, &[]), 15);
}

// Scenario 4: a hand-derived loop summing 1..=N, exercising
// `JumpIfFalse`'s loop-exit polarity and `Loop`'s backward edge.
//
// Layout (offsets in bytes):
//   0  PushConst 0        sum = 0
//   3  StoreLocal 1
//   6  PushConst 1        i = 1
//   9  StoreLocal 2
//  12  LoadLocal 2         <- loop header
//  15  LoadLocal 0
//  18  Le                  i <= n
//  19  JumpIfFalse +23     -> 45 (end)
//  22  LoadLocal 1
//  25  LoadLocal 2
//  28  Add
//  29  StoreLocal 1        sum += i
//  32  LoadLocal 2
//  35  PushConst 1
//  38  Add
//  39  StoreLocal 2        i += 1
//  42  Loop -33            -> 12 (header)
//  45  LoadLocal 1         <- end
//  48  Return
fn loop_sum_module() -> Module {
    let mut code = Vec::new();
    push_const(&mut code, 0);
    store_local(&mut code, 1);
    push_const(&mut code, 1);
    store_local(&mut code, 2);
    load_local(&mut code, 2);
    load_local(&mut code, 0);
    code.push(Opcode::Le as u8);
    code.push(Opcode::JumpIfFalse as u8);
    code.extend_from_slice(&23i16.to_le_bytes());
    load_local(&mut code, 1);
    load_local(&mut code, 2);
    code.push(Opcode::Add as u8);
    store_local(&mut code, 1);
    load_local(&mut code, 2);
    push_const(&mut code, 1);
    code.push(Opcode::Add as u8);
    store_local(&mut code, 2);
    code.push(Opcode::Loop as u8);
    code.extend_from_slice(&(-33i16).to_le_bytes());
    load_local(&mut code, 1);
    code.push(Opcode::Return as u8);

    let mut module = Module::new();
    module.push(
        BytecodeFunction::new("sum_1_to_n", 1, 3, code)
            .with_constants(vec![Value::int(0), Value::int(1)]),
    );
    module
}

#[test]
fn loop_summation() {
    let driver = driver_at(OptLevel::O1, loop_sum_module());
    assert_eq!(call(&driver, 0, &[10]), 55);
    assert_eq!(call(&driver, 0, &[100]), 5050);
}

// Scenario 5: multiplying by a power of two strength-reduces to a shift
// at O2 and above; the native result must still match plain multiplication.
#[test]
fn strength_reduction_preserves_the_result() {
    let mut code = Vec::new();
    load_local(&mut code, 0);
    push_const(&mut code, 0);
    code.push(Opcode::Mul as u8);
    code.push(Opcode::Return as u8);

    let mut module = Module::new();
    module.push(
        BytecodeFunction::new("times_eight", 1, 1, code).with_constants(vec![Value::int(8)]),
    );

    let driver = driver_at(OptLevel::O2, module);
    assert_eq!(call(&driver, 0, &[7]), 56);
}

// Scenario 6: enough calls through the profiler trip Cold -> Warm -> Hot
// and enqueue a background compile, without the caller ever calling
// `Driver::compile` directly.
#[test]
fn hot_compile_trigger_publishes_a_function_table_entry() {
    let mut code = Vec::new();
    push_const(&mut code, 0);
    code.push(Opcode::Return as u8);

    let mut module = Module::new();
    module.push(BytecodeFunction::new("hot", 0, 0, code).with_constants(vec![Value::int(7)]));

    let mut config = JitConfig::default();
    config.worker_threads = 1;
    config.hotspot_threshold = 1000;
    let driver = Driver::new(config, module, full_helpers());

    for _ in 0..1000 {
        driver.record_call(0);
    }

    for _ in 0..200 {
        if driver.function_table().is_resolved(0) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    assert!(driver.function_table().is_resolved(0));
    assert!(driver.function_table().address_of(0).unwrap() != 0);
    assert!(driver.stats().hotspot_compiles >= 1);
}

// Property: every supported binary integer operator, run through the
// full pipeline at O2, agrees with the reference IR interpreter across
// a broad range of operand pairs.
proptest! {
    #[test]
    fn compiled_binary_ops_match_the_reference_interpreter(
        a in -2_000_000_000i64..2_000_000_000i64,
        b in 1_000_000i64..2_000_000_000i64,
    ) {
        let ops: &[(Opcode, u8)] = &[
            (Opcode::Add, 0),
            (Opcode::Sub, 1),
            (Opcode::Mul, 2),
            (Opcode::Div, 3),
            (Opcode::Mod, 4),
            (Opcode::BitAnd, 5),
            (Opcode::BitOr, 6),
            (Opcode::BitXor, 7),
        ];

        for &(op, tag) in ops {
            let mut code = Vec::new();
            load_local(&mut code, 0);
            load_local(&mut code, 1);
            code.push(op as u8);
            code.push(Opcode::Return as u8);

            let mut module = Module::new();
            let bc = BytecodeFunction::new(format!("binop_{tag}"), 2, 2, code);
            module.push(bc.clone());

            let lowered = jitvm_jit::lower::lower(&bc).unwrap();
            let interp_result = ir::interp::run(&lowered, &[a, b]).unwrap();
            let Some(ir::interp::InterpValue::Int(expected)) = interp_result else {
                panic!("binary integer op produced a non-int result");
            };

            let driver = driver_at(OptLevel::O2, module);
            driver.compile(0).unwrap();
            let entry = driver.function_table().address_of(0).unwrap();
            let got = unsafe { call_bridge::call_bridge(entry, &[a, b]) }.unwrap();
            prop_assert_eq!(got, expected);
        }
    }
}

// Property: running the pass pipeline a second time over an already
// fully-optimized function is a no-op beyond the fixed point — observed
// indirectly by re-running the whole compile for the same bytecode and
// checking the native result is unchanged.
proptest! {
    #[test]
    fn reoptimizing_a_stable_function_does_not_change_its_result(
        a in -1000i64..1000i64,
        b in -1000i64..1000i64,
    ) {
        let mut code = Vec::new();
        load_local(&mut code, 0);
        load_local(&mut code, 1);
        code.push(Opcode::Add as u8);
        push_const(&mut code, 0);
        code.push(Opcode::Mul as u8);
        code.push(Opcode::Return as u8);

        let mut module = Module::new();
        module.push(
            BytecodeFunction::new("affine", 2, 2, code).with_constants(vec![Value::int(3)]),
        );

        let driver = driver_at(OptLevel::O3, module);
        let first = call(&driver, 0, &[a, b]);
        let second = call(&driver, 0, &[a, b]);
        prop_assert_eq!(first, second);
        prop_assert_eq!(first, (a.wrapping_add(b)).wrapping_mul(3));
    }
}

// Property: inlining a direct call and then running the optimizer again
// produces a function whose observable behavior equals calling the
// non-inlined original through the interpreter.
proptest! {
    #[test]
    fn inlining_preserves_behavior_against_the_interpreter(x in -10_000i64..10_000i64) {
        let mut callee_code = Vec::new();
        load_local(&mut callee_code, 0);
        push_const(&mut callee_code, 0);
        callee_code.push(Opcode::Mul as u8);
        push_const(&mut callee_code, 1);
        callee_code.push(Opcode::Add as u8);
        callee_code.push(Opcode::Return as u8);
        let callee = BytecodeFunction::new("affine_one", 1, 1, callee_code)
            .with_constants(vec![Value::int(2), Value::int(1)]);

        let mut caller_code = Vec::new();
        load_local(&mut caller_code, 0);
        caller_code.push(Opcode::Call as u8);
        caller_code.extend_from_slice(&1u32.to_le_bytes());
        caller_code.push(1u8);
        push_const(&mut caller_code, 0);
        caller_code.push(Opcode::Add as u8);
        caller_code.push(Opcode::Return as u8);
        let caller = BytecodeFunction::new("caller", 1, 1, caller_code)
            .with_constants(vec![Value::int(5)]);

        let mut module = Module::new();
        module.push(caller);
        module.push(callee);

        let driver = driver_at(OptLevel::O3, module);
        let got = call(&driver, 0, &[x]);
        let expected = (x.wrapping_mul(2).wrapping_add(1)).wrapping_add(5);
        prop_assert_eq!(got, expected);
    }
}
