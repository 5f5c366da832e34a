//! An embeddable stack-machine interpreter for binary WebAssembly 1.0
//! modules (with the non-trapping float-to-int, threads/atomics and
//! decode-only exception extensions), plus a script runtime layer: a pool
//! allocator living inside linear memory that host programs share with
//! guest code through imported functions.
//!
//! The usual flow: create an [`Environment`], register host modules, load
//! binary modules, link everything into a [`Runtime`], create one or more
//! [`Thread`]s against it, then invoke exports.
//!
//! ```no_run
//! use wisp::{Environment, LinkOptions, ReadOptions, Runtime, Thread, TypedValue};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("module.wasm")?;
//! let mut env = Environment::new();
//! env.load_module("main", &bytes, &ReadOptions::default())?;
//! let runtime = Runtime::new(&env, LinkOptions::default())?;
//! let mut thread = Thread::new(&runtime, 0);
//! let results = thread.call("main", "add", &[TypedValue::i32(2), TypedValue::i32(40)])?;
//! println!("{}", results[0]);
//! # Ok(())
//! # }
//! ```

mod decode;
mod environment;
mod error;
mod leb128;
mod module;
mod opcode;
mod runtime;
mod thread;

pub mod harness;
pub mod script;
pub mod types;

pub use environment::{Environment, HostCallback, HostFunc, HostModule, ENV_MODULE};
pub use error::{DecodeError, HostFault, LinkError, Trap};
pub use module::{
    DataSegment, ElemSegment, Export, Func, Global, Import, ImportKind, IndexEntry, Module, OpRec,
    TableDef,
};
pub use opcode::Opcode;
pub use runtime::{
    FuncBinding, Instance, LinkOptions, LinkPolicy, Memory, MemoryAction, MemoryData, MemoryHook,
    Runtime, RuntimeGlobal, Table, TableData,
};
pub use thread::{numeric, SyncContext, Thread};
pub use types::{
    ExternalKind, Features, Index, Limits, ReadOptions, Signature, Type, TypedValue, Value,
};
