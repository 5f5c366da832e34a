//! Drives the `.wast` fixtures under `tests/spec/` through the harness.

use std::path::Path;

use wisp::harness::Harness;
use wisp::types::{Features, ReadOptions};

fn run_spec_test(name: &str) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/spec")
        .join(format!("{name}.wast"));
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));

    let options = ReadOptions { features: Features::all(), ..Default::default() };
    let mut harness = Harness::new(options);
    let stats = harness
        .run_script(&source, name)
        .unwrap_or_else(|e| panic!("{name}: {e}"));

    println!("{name}: {} passed, {} failed, {} skipped", stats.passed, stats.failed, stats.skipped);
    assert_eq!(stats.failed, 0, "{name}: {} assertions failed", stats.failed);
    assert!(stats.passed > 0, "{name}: no assertions ran");
}

#[test]
fn spec_arith() {
    run_spec_test("arith");
}

#[test]
fn spec_control() {
    run_spec_test("control");
}

#[test]
fn spec_float() {
    run_spec_test("float");
}

#[test]
fn spec_memory() {
    run_spec_test("memory");
}
