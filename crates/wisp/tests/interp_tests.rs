//! End-to-end engine scenarios driven through the public API, with
//! modules assembled from text.

use wisp::{
    Environment, Features, LinkOptions, ReadOptions, Runtime, Thread, Trap, Type, TypedValue,
    Value,
};

fn options() -> ReadOptions {
    ReadOptions { features: Features::all(), ..Default::default() }
}

fn instantiate(wat: &str) -> (std::sync::Arc<Runtime>, Thread) {
    instantiate_with_stacks(wat, Thread::DEFAULT_VALUE_STACK_SIZE, Thread::DEFAULT_CALL_STACK_SIZE)
}

fn instantiate_with_stacks(
    wat: &str,
    value_stack: u32,
    call_stack: u32,
) -> (std::sync::Arc<Runtime>, Thread) {
    let bytes = wat::parse_str(wat).expect("fixture assembles");
    let mut env = Environment::new();
    env.set_error_callback(|_, _| {});
    env.load_module("main", &bytes, &options()).expect("fixture decodes");
    let runtime = Runtime::new(&env, LinkOptions::default()).expect("fixture links");
    let thread = Thread::with_stack_sizes(&runtime, 0, value_stack, call_stack);
    (runtime, thread)
}

fn call(thread: &mut Thread, name: &str, args: &[TypedValue]) -> Result<Vec<TypedValue>, Trap> {
    thread.call_safe("main", name, args)
}

#[test]
fn integer_division_traps() {
    let (_rt, mut thread) = instantiate(
        r#"(module (func (export "div") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.div_s))"#,
    );
    let overflow = call(&mut thread, "div", &[TypedValue::i32(i32::MIN), TypedValue::i32(-1)]);
    assert_eq!(overflow, Err(Trap::IntegerOverflow));
    let by_zero = call(&mut thread, "div", &[TypedValue::i32(10), TypedValue::i32(0)]);
    assert_eq!(by_zero, Err(Trap::IntegerDivideByZero));
    let ok = call(&mut thread, "div", &[TypedValue::i32(-10), TypedValue::i32(3)]).unwrap();
    assert_eq!(ok[0].value.i32(), -3);
}

#[test]
fn value_stack_depth_is_restored_after_traps() {
    let (_rt, mut thread) = instantiate(
        r#"(module (func (export "boom") (param i32) (result i32)
            i32.const 1
            i32.const 2
            drop
            local.get 0
            i32.const 0
            i32.div_u))"#,
    );
    assert_eq!(thread.value_depth(), 0);
    let r = call(&mut thread, "boom", &[TypedValue::i32(9)]);
    assert_eq!(r, Err(Trap::IntegerDivideByZero));
    assert_eq!(thread.value_depth(), 0);
    // And a normal call leaves exactly the results.
    let r = call(&mut thread, "boom", &[TypedValue::i32(0)]);
    assert_eq!(r, Err(Trap::IntegerDivideByZero));
    assert_eq!(thread.value_depth(), 0);
}

#[test]
fn float_to_int_conversions() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (func (export "trunc") (param f32) (result i32)
                local.get 0
                i32.trunc_f32_s)
            (func (export "trunc_sat") (param f32) (result i32)
                local.get 0
                i32.trunc_sat_f32_s))"#,
    );
    let nan = call(&mut thread, "trunc", &[TypedValue::f32(f32::NAN)]);
    assert_eq!(nan, Err(Trap::InvalidConversionToInteger));
    let over = call(&mut thread, "trunc", &[TypedValue::f32(2147483648.0)]);
    assert_eq!(over, Err(Trap::IntegerOverflow));
    let ok = call(&mut thread, "trunc", &[TypedValue::f32(-1.9)]).unwrap();
    assert_eq!(ok[0].value.i32(), -1);

    let sat_nan = call(&mut thread, "trunc_sat", &[TypedValue::f32(f32::NAN)]).unwrap();
    assert_eq!(sat_nan[0].value.i32(), 0);
    let sat_inf = call(&mut thread, "trunc_sat", &[TypedValue::f32(f32::INFINITY)]).unwrap();
    assert_eq!(sat_inf[0].value.i32(), i32::MAX);
    let sat_neg = call(&mut thread, "trunc_sat", &[TypedValue::f32(f32::NEG_INFINITY)]).unwrap();
    assert_eq!(sat_neg[0].value.i32(), i32::MIN);
}

#[test]
fn memory_bounds_and_grow() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (memory 1 4)
            (func (export "poke") (param i32 i32)
                local.get 0
                local.get 1
                i32.store)
            (func (export "peek") (param i32) (result i32)
                local.get 0
                i32.load)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow))"#,
    );
    let args = |addr: i32| [TypedValue::i32(addr), TypedValue::i32(0x1234_5678)];
    assert_eq!(call(&mut thread, "poke", &args(65533)), Err(Trap::MemoryAccessOutOfBounds));
    call(&mut thread, "poke", &args(65532)).unwrap();

    let old = call(&mut thread, "grow", &[TypedValue::i32(1)]).unwrap();
    assert_eq!(old[0].value.i32(), 1);
    call(&mut thread, "poke", &args(65533)).unwrap();

    // Bytes below the old size survive the grow; the new page reads zero
    // until written.
    let read = call(&mut thread, "peek", &[TypedValue::i32(65533)]).unwrap();
    assert_eq!(read[0].value.i32(), 0x1234_5678);
    let zeroed = call(&mut thread, "peek", &[TypedValue::i32(70000)]).unwrap();
    assert_eq!(zeroed[0].value.i32(), 0);

    // Past the max.
    let failed = call(&mut thread, "grow", &[TypedValue::i32(100)]).unwrap();
    assert_eq!(failed[0].value.i32(), -1);
}

#[test]
fn grow_preserves_previous_bytes() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (memory 1)
            (func (export "fill") (param i32 i32)
                local.get 0
                local.get 1
                i32.store8)
            (func (export "read") (param i32) (result i32)
                local.get 0
                i32.load8_u)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow))"#,
    );
    for i in 0..64 {
        call(&mut thread, "fill", &[TypedValue::i32(i * 7), TypedValue::i32(i & 0xff)]).unwrap();
    }
    assert_eq!(call(&mut thread, "grow", &[TypedValue::i32(3)]).unwrap()[0].value.i32(), 1);
    for i in 0..64 {
        let got = call(&mut thread, "read", &[TypedValue::i32(i * 7)]).unwrap();
        assert_eq!(got[0].value.i32(), i & 0xff);
    }
}

#[test]
fn indirect_calls() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (type $ii (func (param i32) (result i32)))
            (type $ll (func (param i64) (result i64)))
            (table 1 1 funcref)
            (func $inc (type $ii) local.get 0 i32.const 1 i32.add)
            (elem (i32.const 0) $inc)
            (func (export "call_ii") (param i32 i32) (result i32)
                local.get 1
                local.get 0
                call_indirect (type $ii))
            (func (export "call_ll") (param i32 i64) (result i64)
                local.get 1
                local.get 0
                call_indirect (type $ll)))"#,
    );
    let ok = call(&mut thread, "call_ii", &[TypedValue::i32(0), TypedValue::i32(41)]).unwrap();
    assert_eq!(ok[0].value.i32(), 42);

    let wrong_sig = call(&mut thread, "call_ll", &[TypedValue::i32(0), TypedValue::i64(41)]);
    assert_eq!(wrong_sig, Err(Trap::IndirectCallSignatureMismatch));

    let oob = call(&mut thread, "call_ii", &[TypedValue::i32(1), TypedValue::i32(41)]);
    assert_eq!(oob, Err(Trap::UndefinedTableIndex));
}

#[test]
fn uninitialized_table_slots_trap() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (type $v (func))
            (table 2 funcref)
            (func $f)
            (elem (i32.const 0) $f)
            (func (export "go") (param i32)
                local.get 0
                call_indirect (type $v)))"#,
    );
    call(&mut thread, "go", &[TypedValue::i32(0)]).unwrap();
    let uninit = call(&mut thread, "go", &[TypedValue::i32(1)]);
    assert_eq!(uninit, Err(Trap::UninitializedTableElement));
}

#[test]
fn runaway_recursion_exhausts_the_call_stack() {
    let (_rt, mut thread) = instantiate_with_stacks(
        r#"(module (func (export "f") call 0))"#,
        1024,
        256,
    );
    let r = call(&mut thread, "f", &[]);
    assert_eq!(r, Err(Trap::CallStackExhausted));
    assert_eq!(thread.value_depth(), 0);
}

#[test]
fn deep_recursion_with_values_exhausts_the_value_stack() {
    // Each frame parks a local, so the value stack fills long before 4096
    // frames are reached.
    let (_rt, mut thread) = instantiate_with_stacks(
        r#"(module (func (export "f") (param i64 i64 i64 i64)
            local.get 0
            local.get 1
            local.get 2
            local.get 3
            call 0))"#,
        1024,
        4096,
    );
    let args = [TypedValue::i64(0); 4];
    let r = call(&mut thread, "f", &args);
    assert_eq!(r, Err(Trap::ValueStackExhausted));
}

#[test]
fn unreachable_traps() {
    let (_rt, mut thread) = instantiate(r#"(module (func (export "f") unreachable))"#);
    assert_eq!(call(&mut thread, "f", &[]), Err(Trap::Unreachable));
}

#[test]
fn nan_results_carry_the_quiet_bit() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (func (export "add32") (param f32 f32) (result f32)
                local.get 0
                local.get 1
                f32.add)
            (func (export "add64") (param f64 f64) (result f64)
                local.get 0
                local.get 1
                f64.add))"#,
    );
    let nan32 = TypedValue::new(Type::F32, Value::from_u32(0x7f80_0001));
    let got = call(&mut thread, "add32", &[nan32, TypedValue::f32(1.0)]).unwrap();
    assert_eq!(got[0].value.f32_bits() & 0x7fc0_0000, 0x7fc0_0000);

    let nan64 = TypedValue::new(Type::F64, Value::from_u64(0x7ff0_0000_0000_0001));
    let got = call(&mut thread, "add64", &[nan64, TypedValue::f64(1.0)]).unwrap();
    assert_eq!(
        got[0].value.f64_bits() & 0x7ff8_0000_0000_0000,
        0x7ff8_0000_0000_0000
    );
}

#[test]
fn min_max_signed_zeros() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (func (export "min") (param f32 f32) (result f32)
                local.get 0 local.get 1 f32.min)
            (func (export "max") (param f32 f32) (result f32)
                local.get 0 local.get 1 f32.max))"#,
    );
    let pz = TypedValue::f32(0.0);
    let nz = TypedValue::f32(-0.0);
    let min = call(&mut thread, "min", &[pz, nz]).unwrap();
    assert_eq!(min[0].value.f32_bits(), (-0.0f32).to_bits());
    let max = call(&mut thread, "max", &[nz, pz]).unwrap();
    assert_eq!(max[0].value.f32_bits(), 0.0f32.to_bits());
}

#[test]
fn globals_are_shared_between_calls() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (global $g (mut i64) (i64.const 10))
            (func (export "bump") (param i64) (result i64)
                global.get $g
                local.get 0
                i64.add
                global.set $g
                global.get $g))"#,
    );
    assert_eq!(call(&mut thread, "bump", &[TypedValue::i64(5)]).unwrap()[0].value.i64(), 15);
    assert_eq!(call(&mut thread, "bump", &[TypedValue::i64(5)]).unwrap()[0].value.i64(), 20);
}

#[test]
fn start_functions_run_at_instantiation() {
    // The global is exported so the stack-pointer heuristic leaves it
    // alone.
    let (_rt, mut thread) = instantiate(
        r#"(module
            (global $g (export "state") (mut i32) (i32.const 0))
            (func $init global.get $g i32.const 41 i32.add global.set $g)
            (start $init)
            (func (export "get") (result i32) global.get $g))"#,
    );
    assert_eq!(call(&mut thread, "get", &[]).unwrap()[0].value.i32(), 41);
}

#[test]
fn trapping_start_functions_fail_instantiation() {
    let bytes = wat::parse_str(
        r#"(module (func $boom unreachable) (start $boom))"#,
    )
    .unwrap();
    let mut env = Environment::new();
    env.set_error_callback(|_, _| {});
    env.load_module("main", &bytes, &options()).unwrap();
    let err = Runtime::new(&env, LinkOptions::default());
    assert!(matches!(err, Err(wisp::LinkError::StartTrap { .. })));
}

#[test]
fn host_functions_marshal_through_the_value_buffer() {
    let bytes = wat::parse_str(
        r#"(module
            (import "env" "mul_add" (func $ma (param i32 i32 i32) (result i32)))
            (func (export "go") (param i32) (result i32)
                local.get 0
                i32.const 10
                i32.const 7
                call $ma))"#,
    )
    .unwrap();
    let mut env = Environment::new();
    env.env_module_mut().add_func(
        "mul_add",
        vec![Type::I32; 3],
        vec![Type::I32],
        |_thread, buf| {
            let (a, b, c) = (buf[0].i32(), buf[1].i32(), buf[2].i32());
            buf[0] = Value::from_i32(a * b + c);
            Ok(())
        },
    );
    env.load_module("main", &bytes, &options()).unwrap();
    let runtime = Runtime::new(&env, LinkOptions::default()).unwrap();
    let mut thread = Thread::new(&runtime, 0);
    let got = thread.call_safe("main", "go", &[TypedValue::i32(3)]).unwrap();
    assert_eq!(got[0].value.i32(), 37);
}

#[test]
fn failing_host_functions_surface_as_traps() {
    let bytes = wat::parse_str(
        r#"(module
            (import "env" "always_fails" (func $f))
            (func (export "go") call $f))"#,
    )
    .unwrap();
    let mut env = Environment::new();
    env.set_error_callback(|_, _| {});
    env.env_module_mut().add_func("always_fails", vec![], vec![], |_thread, _buf| {
        Err(wisp::HostFault)
    });
    env.load_module("main", &bytes, &options()).unwrap();
    let runtime = Runtime::new(&env, LinkOptions::default()).unwrap();
    let mut thread = Thread::new(&runtime, 0);
    assert_eq!(thread.call_safe("main", "go", &[]), Err(Trap::HostTrapped));
}

#[test]
fn imports_resolve_across_modules() {
    let lib = wat::parse_str(
        r#"(module
            (func (export "double") (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.mul))"#,
    )
    .unwrap();
    let app = wat::parse_str(
        r#"(module
            (import "lib" "double" (func $d (param i32) (result i32)))
            (func (export "quad") (param i32) (result i32)
                local.get 0
                call $d
                call $d))"#,
    )
    .unwrap();
    let mut env = Environment::new();
    env.load_module("lib", &lib, &options()).unwrap();
    env.load_module("app", &app, &options()).unwrap();
    let runtime = Runtime::new(&env, LinkOptions::default()).unwrap();
    let mut thread = Thread::new(&runtime, 0);
    let got = thread.call_safe("app", "quad", &[TypedValue::i32(3)]).unwrap();
    assert_eq!(got[0].value.i32(), 12);
}

#[test]
fn import_signature_mismatches_fail_linking() {
    let lib = wat::parse_str(
        r#"(module (func (export "f") (param i32) (result i32) local.get 0))"#,
    )
    .unwrap();
    let app = wat::parse_str(
        r#"(module (import "lib" "f" (func (param i64) (result i64))))"#,
    )
    .unwrap();
    let mut env = Environment::new();
    env.set_error_callback(|_, _| {});
    env.load_module("lib", &lib, &options()).unwrap();
    env.load_module("app", &app, &options()).unwrap();
    let err = Runtime::new(&env, LinkOptions::default());
    assert!(matches!(err, Err(wisp::LinkError::SignatureMismatch { .. })));
}

#[test]
fn unknown_exports_are_api_errors() {
    let (_rt, mut thread) = instantiate(r#"(module (func (export "f")))"#);
    assert_eq!(thread.call_safe("main", "missing", &[]), Err(Trap::UnknownExport));
    assert_eq!(thread.call_safe("nope", "f", &[]), Err(Trap::UnknownExport));
    assert_eq!(
        thread.call_safe("main", "f", &[TypedValue::i32(1)]),
        Err(Trap::ArgumentTypeMismatch)
    );
}

#[test]
fn atomic_rmw_and_cmpxchg() {
    let (_rt, mut thread) = instantiate(
        r#"(module
            (memory 1)
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.atomic.rmw.add)
            (func (export "cas") (param i32 i32 i32) (result i32)
                local.get 0
                local.get 1
                local.get 2
                i32.atomic.rmw.cmpxchg)
            (func (export "load") (param i32) (result i32)
                local.get 0
                i32.atomic.load))"#,
    );
    let old = call(&mut thread, "add", &[TypedValue::i32(16), TypedValue::i32(5)]).unwrap();
    assert_eq!(old[0].value.i32(), 0);
    let old = call(&mut thread, "add", &[TypedValue::i32(16), TypedValue::i32(3)]).unwrap();
    assert_eq!(old[0].value.i32(), 5);
    assert_eq!(call(&mut thread, "load", &[TypedValue::i32(16)]).unwrap()[0].value.i32(), 8);

    // Successful exchange, then a failed one.
    let prev =
        call(&mut thread, "cas", &[TypedValue::i32(16), TypedValue::i32(8), TypedValue::i32(100)])
            .unwrap();
    assert_eq!(prev[0].value.i32(), 8);
    let prev =
        call(&mut thread, "cas", &[TypedValue::i32(16), TypedValue::i32(8), TypedValue::i32(200)])
            .unwrap();
    assert_eq!(prev[0].value.i32(), 100);
    assert_eq!(call(&mut thread, "load", &[TypedValue::i32(16)]).unwrap()[0].value.i32(), 100);

    // Misaligned atomics trap.
    let unaligned = call(&mut thread, "add", &[TypedValue::i32(17), TypedValue::i32(1)]);
    assert_eq!(unaligned, Err(Trap::AtomicMemoryAccessUnaligned));
}

#[test]
fn br_table_dispatches() {
    let (_rt, mut thread) = instantiate(
        r#"(module (func (export "classify") (param i32) (result i32)
            (block
                (block
                    (block
                        local.get 0
                        br_table 0 1 2)
                    i32.const 100
                    return)
                i32.const 200
                return)
            i32.const 300))"#,
    );
    let go = |t: &mut Thread, v: i32| {
        t.call_safe("main", "classify", &[TypedValue::i32(v)]).unwrap()[0].value.i32()
    };
    assert_eq!(go(&mut thread, 0), 100);
    assert_eq!(go(&mut thread, 1), 200);
    assert_eq!(go(&mut thread, 2), 300);
    assert_eq!(go(&mut thread, 9), 300, "out-of-range keys take the default");
}
