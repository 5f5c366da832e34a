use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use wisp::harness::Harness;
use wisp::{
    Environment, Features, LinkOptions, ReadOptions, Runtime, Thread, Type, TypedValue,
};

#[derive(Parser)]
#[command(name = "wisp", about = "WebAssembly interpreter with script memory pools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single module (.wasm or .wat), optionally invoking an export.
    Run {
        file: PathBuf,
        /// Exported function to invoke after the start function.
        #[arg(long)]
        invoke: Option<String>,
        /// Arguments for --invoke, parsed against the signature.
        args: Vec<String>,
    },
    /// Run every .wasm/.assert pair and standalone .wast script in a
    /// directory.
    Test { dir: PathBuf },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run { file, invoke, args } => run(&file, invoke.as_deref(), &args),
        Command::Test { dir } => test_dir(&dir),
    }
}

fn read_options() -> ReadOptions {
    ReadOptions { features: Features::all(), read_debug_names: true, ..Default::default() }
}

fn load_bytes(file: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    if bytes.starts_with(b"\0asm") {
        Ok(bytes)
    } else {
        // Text input; assemble it first.
        wat::parse_bytes(&bytes).map(|b| b.into_owned()).map_err(Into::into)
    }
}

fn run(file: &Path, invoke: Option<&str>, args: &[String]) -> Result<()> {
    let bytes = load_bytes(file)?;
    let mut env = Environment::new();
    wisp::script::register_host_funcs(&mut env);
    env.load_module("main", &bytes, &read_options())
        .map_err(|e| anyhow!("{}: {e}", file.display()))?;

    let runtime = Runtime::new(&env, LinkOptions::default())
        .map_err(|e| anyhow!("{}: {e}", file.display()))?;
    let uses_pools = env
        .module("main")
        .is_some_and(|m| m.imports.iter().any(|i| i.field.starts_with("ws_mem_pool_")));
    let mut thread = Thread::new(&runtime, 0);
    if uses_pools {
        wisp::script::install(&runtime);
        wisp::script::init_thread(&mut thread, &wisp::script::ScriptConfig::default());
    }

    let Some(name) = invoke else { return Ok(()) };
    let module = env.module("main").expect("just loaded");
    let export = module.export(name).ok_or_else(|| anyhow!("no export named {name}"))?;
    let sig = module
        .func_signature(export.object)
        .ok_or_else(|| anyhow!("{name} is not a function"))?;
    if args.len() != sig.params.len() {
        bail!("{name} takes {} arguments, {} given", sig.params.len(), args.len());
    }
    let args = sig
        .params
        .iter()
        .zip(args)
        .map(|(&ty, text)| parse_arg(ty, text))
        .collect::<Result<Vec<_>>>()?;

    let results = thread
        .call("main", name, &args)
        .map_err(|trap| anyhow!("{name} trapped: {trap}"))?;
    for result in results {
        println!("{result}");
    }
    Ok(())
}

fn parse_arg(ty: Type, text: &str) -> Result<TypedValue> {
    let value = match ty {
        Type::I32 => TypedValue::i32(text.parse()?),
        Type::I64 => TypedValue::i64(text.parse()?),
        Type::F32 => TypedValue::f32(text.parse()?),
        Type::F64 => TypedValue::f64(text.parse()?),
        other => bail!("cannot pass an argument of type {other}"),
    };
    Ok(value)
}

fn test_dir(dir: &Path) -> Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    let mut total_passed = 0usize;
    let mut total_failed = 0usize;
    let mut total_skipped = 0usize;
    let mut files = 0usize;

    for path in entries {
        let stats = match path.extension().and_then(|e| e.to_str()) {
            Some("wast") => {
                let source = std::fs::read_to_string(&path)?;
                let mut harness = Harness::new(read_options());
                harness.run_script(&source, &path.display().to_string())?
            }
            Some("wasm") => {
                let asserts = path.with_extension("assert");
                if !asserts.exists() {
                    continue;
                }
                let module = std::fs::read(&path)?;
                let source = std::fs::read_to_string(&asserts)?;
                let mut harness = Harness::new(read_options());
                harness.run_asserts(&module, &source, &asserts.display().to_string())?
            }
            _ => continue,
        };
        files += 1;
        println!(
            "{}: {} passed, {} failed, {} skipped",
            path.display(),
            stats.passed,
            stats.failed,
            stats.skipped
        );
        total_passed += stats.passed;
        total_failed += stats.failed;
        total_skipped += stats.skipped;
    }

    println!("{files} files: {total_passed} passed, {total_failed} failed, {total_skipped} skipped");
    if total_failed > 0 {
        bail!("{total_failed} assertions failed");
    }
    Ok(())
}
