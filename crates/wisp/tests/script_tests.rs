//! Script runtime scenarios: pool allocation driven from guest code via
//! the `ws_mem_pool_*` imports, with coexisting host-side access.

use std::sync::Arc;

use wisp::{
    Environment, Features, LinkOptions, ReadOptions, Runtime, Thread, TypedValue,
};

const POOL_WAT: &str = r#"(module
    (import "env" "ws_mem_pool_create" (func $create (param i32) (result i32)))
    (import "env" "ws_mem_pool_palloc" (func $palloc (param i32 i32) (result i32)))
    (import "env" "ws_mem_pool_calloc" (func $calloc (param i32 i32 i32) (result i32)))
    (import "env" "ws_mem_pool_destroy" (func $destroy (param i32)))
    (import "env" "ws_mem_pool_clear" (func $clear (param i32)))
    (import "env" "ws_mem_pool_acquire" (func $acquire (result i32)))
    (memory (export "memory") 1)
    (global $sp (mut i32) (i32.const 4096))
    (func (export "make_pool") (result i32)
        i32.const 0
        call $create)
    (func (export "alloc") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        call $palloc)
    (func (export "zalloc") (param i32 i32 i32) (result i32)
        local.get 0
        local.get 1
        local.get 2
        call $calloc)
    (func (export "drop_pool") (param i32)
        local.get 0
        call $destroy)
    (func (export "clear_pool") (param i32)
        local.get 0
        call $clear)
    (func (export "current") (result i32)
        call $acquire)
    (func (export "fill") (param i32 i32 i32)
        (local i32)
        (block
            (loop
                local.get 3
                local.get 2
                i32.ge_u
                br_if 1
                local.get 0
                local.get 3
                i32.add
                local.get 1
                i32.store8
                local.get 3
                i32.const 1
                i32.add
                local.set 3
                br 0)))
    (func (export "check") (param i32 i32 i32) (result i32)
        (local i32)
        (block
            (loop
                local.get 3
                local.get 2
                i32.ge_u
                br_if 1
                local.get 0
                local.get 3
                i32.add
                i32.load8_u
                local.get 1
                i32.ne
                (if (then i32.const 0 return))
                local.get 3
                i32.const 1
                i32.add
                local.set 3
                br 0))
        i32.const 1))"#;

fn build_runtime() -> Arc<Runtime> {
    let bytes = wat::parse_str(POOL_WAT).expect("fixture assembles");
    let mut env = Environment::new();
    wisp::script::register_host_funcs(&mut env);
    let options = ReadOptions { features: Features::all(), ..Default::default() };
    env.load_module("main", &bytes, &options).expect("fixture decodes");
    let runtime = Runtime::new(&env, LinkOptions::default()).expect("fixture links");
    wisp::script::install(&runtime);
    runtime
}

fn script_thread(runtime: &Arc<Runtime>, tag: u32) -> Thread {
    let mut thread = Thread::new(runtime, tag);
    assert!(wisp::script::init_thread(&mut thread, &wisp::script::ScriptConfig::default()));
    thread
}

fn call_i32(thread: &mut Thread, name: &str, args: &[TypedValue]) -> i32 {
    let results = thread.call_safe("main", name, args).unwrap_or_else(|t| {
        panic!("{name} trapped: {t}");
    });
    results.first().map(|v| v.value.i32()).unwrap_or(0)
}

#[test]
fn create_alloc_destroy() {
    let runtime = build_runtime();
    let mut thread = script_thread(&runtime, 0);

    let pool = call_i32(&mut thread, "make_pool", &[]);
    assert!(pool > 0);
    // The arena sits above the deduced static-data boundary.
    assert!(pool as u32 >= 4096);

    let ptr = call_i32(&mut thread, "alloc", &[TypedValue::i32(pool), TypedValue::i32(128)]);
    assert!(ptr > pool, "block payload comes from arena space above the pool record");

    // Write then read back through guest code.
    let fill = [TypedValue::i32(ptr), TypedValue::i32(0xa5), TypedValue::i32(128)];
    thread.call_safe("main", "fill", &fill).unwrap();
    let ok = call_i32(&mut thread, "check", &fill);
    assert_eq!(ok, 1);

    thread
        .call_safe("main", "drop_pool", &[TypedValue::i32(pool)])
        .unwrap();

    // The address range may or may not be recycled afterwards; another
    // create+alloc must simply succeed.
    let pool2 = call_i32(&mut thread, "make_pool", &[]);
    let ptr2 = call_i32(&mut thread, "alloc", &[TypedValue::i32(pool2), TypedValue::i32(128)]);
    assert!(ptr2 > 0);
}

#[test]
fn calloc_zeroes_reused_blocks() {
    let runtime = build_runtime();
    let mut thread = script_thread(&runtime, 0);

    let pool = call_i32(&mut thread, "make_pool", &[]);
    let ptr = call_i32(&mut thread, "alloc", &[TypedValue::i32(pool), TypedValue::i32(64)]);
    let fill = [TypedValue::i32(ptr), TypedValue::i32(0xff), TypedValue::i32(64)];
    thread.call_safe("main", "fill", &fill).unwrap();

    thread.call_safe("main", "clear_pool", &[TypedValue::i32(pool)]).unwrap();
    let again = call_i32(
        &mut thread,
        "zalloc",
        &[TypedValue::i32(pool), TypedValue::i32(16), TypedValue::i32(4)],
    );
    let check = [TypedValue::i32(again), TypedValue::i32(0), TypedValue::i32(64)];
    assert_eq!(call_i32(&mut thread, "check", &check), 1, "calloc returns zeroed bytes");
}

#[test]
fn acquire_returns_the_thread_pool() {
    let runtime = build_runtime();
    let mut thread = script_thread(&runtime, 0);
    let current = call_i32(&mut thread, "current", &[]);
    assert!(current > 0);
    // Stable across calls: nothing pushed or popped.
    assert_eq!(current, call_i32(&mut thread, "current", &[]));
}

#[test]
fn allocations_grow_memory_when_needed() {
    let runtime = build_runtime();
    let mut thread = script_thread(&runtime, 0);
    let pool = call_i32(&mut thread, "make_pool", &[]);
    // Far larger than the single initial page.
    let big = call_i32(&mut thread, "alloc", &[TypedValue::i32(pool), TypedValue::i32(200_000)]);
    assert!(big > 0);
    let probe = [TypedValue::i32(big), TypedValue::i32(0x3c), TypedValue::i32(1000)];
    thread.call_safe("main", "fill", &probe).unwrap();
    assert_eq!(call_i32(&mut thread, "check", &probe), 1);
}

#[test]
fn concurrent_allocations_never_overlap() {
    let runtime = build_runtime();
    let workers: Vec<_> = (0..2)
        .map(|tag| {
            let runtime = runtime.clone();
            std::thread::spawn(move || {
                let mut thread = script_thread(&runtime, tag);
                let pool = call_i32(&mut thread, "make_pool", &[]);
                assert!(pool > 0);
                let mut ranges = Vec::new();
                for i in 0..200u32 {
                    let size = 32 + (i % 7) * 48;
                    let ptr = call_i32(
                        &mut thread,
                        "alloc",
                        &[TypedValue::i32(pool), TypedValue::i32(size as i32)],
                    );
                    assert!(ptr > 0);
                    // Touch the block so racing bumps would corrupt it.
                    let fill = [
                        TypedValue::i32(ptr),
                        TypedValue::i32((tag as i32 + 1) * 3),
                        TypedValue::i32(size as i32),
                    ];
                    thread.call_safe("main", "fill", &fill).unwrap();
                    ranges.push((ptr as u32, size));
                }
                for (ptr, size) in &ranges {
                    let check = [
                        TypedValue::i32(*ptr as i32),
                        TypedValue::i32((tag as i32 + 1) * 3),
                        TypedValue::i32(*size as i32),
                    ];
                    assert_eq!(call_i32(&mut thread, "check", &check), 1);
                }
                ranges
            })
        })
        .collect();

    let all: Vec<Vec<(u32, u32)>> =
        workers.into_iter().map(|w| w.join().expect("worker panicked")).collect();
    for (a, b) in [(0, 1)] {
        for &(pa, sa) in &all[a] {
            for &(pb, sb) in &all[b] {
                assert!(
                    pa + sa <= pb || pb + sb <= pa,
                    "ranges {pa:#x}+{sa} and {pb:#x}+{sb} overlap"
                );
            }
        }
    }
}
