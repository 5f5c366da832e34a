//! Assertion-script runner: evaluates `assert_return`, `assert_trap`,
//! `assert_exhaustion` and bare `invoke` directives against freshly
//! instantiated modules. Used by the `wisp test` front-end and the spec
//! test suite.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use wast::core::{NanPattern, WastArgCore, WastRetCore};
use wast::parser::{self, ParseBuffer};
use wast::{QuoteWat, Wast, WastArg, WastDirective, WastExecute, WastInvoke, WastRet};

use crate::environment::Environment;
use crate::error::Trap;
use crate::runtime::{LinkOptions, LinkPolicy, MemoryData, Runtime, TableData};
use crate::script;
use crate::thread::numeric::{f32b, f64b};
use crate::thread::Thread;
use crate::types::{Limits, ReadOptions, Type, TypedValue, Value};

const MODULE_NAME: &str = "current";

#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

struct Session {
    _runtime: Arc<Runtime>,
    thread: Thread,
}

pub struct Harness {
    options: ReadOptions,
    session: Option<Session>,
}

impl Default for Harness {
    fn default() -> Harness {
        Harness::new(ReadOptions { features: crate::types::Features::all(), ..Default::default() })
    }
}

impl Harness {
    pub fn new(options: ReadOptions) -> Harness {
        Harness { options, session: None }
    }

    /// Run a `.wast`/`.assert` script. `filename` is used in messages
    /// only.
    pub fn run_script(&mut self, source: &str, filename: &str) -> Result<RunStats> {
        let buf = ParseBuffer::new(source)
            .with_context(|| format!("{filename}: lexing failed"))?;
        let wast: Wast =
            parser::parse(&buf).with_context(|| format!("{filename}: parse failed"))?;

        let mut stats = RunStats::default();
        for directive in wast.directives {
            self.run_directive(directive, filename, &mut stats);
        }
        Ok(stats)
    }

    /// Run an assertion script against a preloaded binary module (the
    /// `.wasm` + `.assert` pair layout).
    pub fn run_asserts(&mut self, module: &[u8], source: &str, filename: &str) -> Result<RunStats> {
        if let Err(e) = self.instantiate(module) {
            return Err(anyhow!("{filename}: module instantiation failed: {e}"));
        }
        self.run_script(source, filename)
    }

    fn run_directive(&mut self, directive: WastDirective, filename: &str, stats: &mut RunStats) {
        match directive {
            WastDirective::Module(mut wat) => {
                match encode(&mut wat) {
                    Ok(bytes) => match self.instantiate(&bytes) {
                        Ok(()) => {}
                        Err(e) => {
                            log::warn!(target: "wisp", "{filename}: instantiation failed: {e}");
                            self.session = None;
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "wisp", "{filename}: module encode failed: {e}");
                        self.session = None;
                    }
                }
            }
            WastDirective::AssertReturn { exec: WastExecute::Invoke(invoke), results, .. } => {
                let name = invoke.name;
                match self.invoke(invoke) {
                    None => stats.skipped += 1,
                    Some(Ok(got)) => {
                        if returns_match(&got, &results) {
                            stats.passed += 1;
                        } else {
                            stats.failed += 1;
                            log::error!(
                                target: "wisp",
                                "{filename}: FAIL {name}: got {got:?}",
                            );
                        }
                    }
                    Some(Err(trap)) => {
                        stats.failed += 1;
                        log::error!(target: "wisp", "{filename}: FAIL {name}: trapped: {trap}");
                    }
                }
            }
            WastDirective::AssertTrap { exec: WastExecute::Invoke(invoke), message, .. } => {
                let name = invoke.name;
                match self.invoke(invoke) {
                    None => stats.skipped += 1,
                    Some(Err(trap)) if trap.matches_reason(message) => stats.passed += 1,
                    Some(Err(trap)) => {
                        stats.failed += 1;
                        log::error!(
                            target: "wisp",
                            "{filename}: FAIL {name}: wrong trap {trap}, expected {message}",
                        );
                    }
                    Some(Ok(_)) => {
                        stats.failed += 1;
                        log::error!(
                            target: "wisp",
                            "{filename}: FAIL {name}: expected trap {message}",
                        );
                    }
                }
            }
            WastDirective::AssertExhaustion { call, message, .. } => {
                let name = call.name;
                match self.invoke(call) {
                    None => stats.skipped += 1,
                    Some(Err(trap)) if trap.matches_reason(message) => stats.passed += 1,
                    Some(Err(trap)) => {
                        stats.failed += 1;
                        log::error!(
                            target: "wisp",
                            "{filename}: FAIL {name}: wrong trap {trap}, expected {message}",
                        );
                    }
                    Some(Ok(_)) => {
                        stats.failed += 1;
                        log::error!(
                            target: "wisp",
                            "{filename}: FAIL {name}: expected exhaustion",
                        );
                    }
                }
            }
            WastDirective::Invoke(invoke) => {
                if self.invoke(invoke).is_none() {
                    stats.skipped += 1;
                }
            }
            // Malformedness/invalidity suites target the full reference
            // validator; they are out of scope here.
            _ => stats.skipped += 1,
        }
    }

    /// Build a fresh environment (spectest host module plus script pools)
    /// and instantiate the module under test.
    fn instantiate(&mut self, bytes: &[u8]) -> Result<()> {
        let mut env = Environment::new();
        add_spectest(&mut env);
        script::register_host_funcs(&mut env);
        env.load_module(MODULE_NAME, bytes, &self.options)
            .map_err(|e| anyhow!("decode: {e}"))?;

        // The pool layer touches guest memory, so it is wired up only
        // when the module actually imports it.
        let uses_pools = env
            .module(MODULE_NAME)
            .is_some_and(|m| m.imports.iter().any(|i| i.field.starts_with("ws_mem_pool_")));

        let options = LinkOptions { policy: spectest_policy(), ..Default::default() };
        let runtime = Runtime::new(&env, options).map_err(|e| anyhow!("link: {e}"))?;
        let mut thread = Thread::new(&runtime, 0);
        if uses_pools {
            script::install(&runtime);
            script::init_thread(&mut thread, &script::ScriptConfig::default());
        }
        self.session = Some(Session { _runtime: runtime, thread });
        Ok(())
    }

    /// `None` means "no module to run against": the directive is skipped.
    fn invoke(&mut self, invoke: WastInvoke) -> Option<Result<Vec<TypedValue>, Trap>> {
        let session = self.session.as_mut()?;
        let mut args = Vec::with_capacity(invoke.args.len());
        for arg in &invoke.args {
            args.push(arg_value(arg)?);
        }
        Some(session.thread.call_safe(MODULE_NAME, invoke.name, &args))
    }
}

fn encode(wat: &mut QuoteWat) -> Result<Vec<u8>> {
    Ok(wat.encode()?)
}

fn arg_value(arg: &WastArg) -> Option<TypedValue> {
    match arg {
        WastArg::Core(WastArgCore::I32(v)) => Some(TypedValue::i32(*v)),
        WastArg::Core(WastArgCore::I64(v)) => Some(TypedValue::i64(*v)),
        WastArg::Core(WastArgCore::F32(v)) => {
            Some(TypedValue::new(Type::F32, Value::from_u32(v.bits)))
        }
        WastArg::Core(WastArgCore::F64(v)) => {
            Some(TypedValue::new(Type::F64, Value::from_u64(v.bits)))
        }
        _ => None,
    }
}

fn returns_match(got: &[TypedValue], expected: &[WastRet]) -> bool {
    if got.len() != expected.len() {
        return false;
    }
    got.iter().zip(expected).all(|(g, e)| match e {
        WastRet::Core(WastRetCore::I32(v)) => g.ty == Type::I32 && g.value.i32() == *v,
        WastRet::Core(WastRetCore::I64(v)) => g.ty == Type::I64 && g.value.i64() == *v,
        WastRet::Core(WastRetCore::F32(pattern)) => {
            g.ty == Type::F32
                && match pattern {
                    NanPattern::Value(v) => g.value.f32_bits() == v.bits,
                    NanPattern::CanonicalNan => f32b::is_canonical_nan(g.value.f32_bits()),
                    NanPattern::ArithmeticNan => f32b::is_arithmetic_nan(g.value.f32_bits()),
                }
        }
        WastRet::Core(WastRetCore::F64(pattern)) => {
            g.ty == Type::F64
                && match pattern {
                    NanPattern::Value(v) => g.value.f64_bits() == v.bits,
                    NanPattern::CanonicalNan => f64b::is_canonical_nan(g.value.f64_bits()),
                    NanPattern::ArithmeticNan => f64b::is_arithmetic_nan(g.value.f64_bits()),
                }
        }
        _ => false,
    })
}

/// The host module the reference assertion scripts import from.
fn add_spectest(env: &mut Environment) {
    let spectest = env.host_module_mut("spectest");
    let print = |name: &str, params: Vec<Type>| (name.to_string(), params);
    let printers = [
        print("print", vec![]),
        print("print_i32", vec![Type::I32]),
        print("print_i64", vec![Type::I64]),
        print("print_f32", vec![Type::F32]),
        print("print_f64", vec![Type::F64]),
        print("print_i32_f32", vec![Type::I32, Type::F32]),
        print("print_f64_f64", vec![Type::F64, Type::F64]),
    ];
    for (name, params) in printers {
        spectest.add_func(&name, params, vec![], move |_thread, buf| {
            log::debug!(target: "wisp", "spectest print: {buf:?}");
            Ok(())
        });
    }
    spectest.add_global("global_i32", TypedValue::i32(666), false);
    spectest.add_global("global_i64", TypedValue::i64(666), false);
    spectest.add_global("global_f32", TypedValue::f32(666.6), false);
    spectest.add_global("global_f64", TypedValue::f64(666.6), false);
}

/// spectest's memory and table come through the link policy hooks, the
/// way host-owned memories and tables are supplied.
fn spectest_policy() -> LinkPolicy {
    LinkPolicy {
        on_import_memory: Some(Box::new(|import| {
            (import.module == "spectest" && import.field == "memory")
                .then(|| MemoryData::new(Limits::new(1, Some(2))))
        })),
        on_import_table: Some(Box::new(|import| {
            (import.module == "spectest" && import.field == "table")
                .then(|| TableData::new(Type::Anyfunc, Limits::new(10, Some(20))))
        })),
        ..Default::default()
    }
}
