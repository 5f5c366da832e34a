//! Instantiation and linking. The `Runtime` owns central arenas of
//! memories, tables, globals and host functions; instances hold dense
//! index vectors into those arenas, so imports are plain indices rather
//! than back-pointers between instances.

mod link;
mod memory;
mod table;

pub(crate) mod global;

pub use global::RuntimeGlobal;
pub use memory::{Memory, MemoryAction, MemoryData, MemoryHook};
pub use table::{Table, TableData};

use std::collections::HashMap;
use std::sync::Arc;

use crate::environment::{Environment, ErrorCallback, HostFunc};
use crate::error::{LinkError, Trap};
use crate::module::{Global, Import, Module};
use crate::thread::{SyncContext, Thread};
use crate::types::{ExternalKind, Index, Signature, MAX_PAGES, PAGE_SIZE};

/// How a function slot of an instance is resolved. `Pending` survives
/// linking only for slots that were never bound, which linking treats as
/// an error; calling one anyway traps as a host failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncBinding {
    Pending,
    Wasm { instance: Index, func: Index },
    Host(Index),
}

/// A link-resolved module (or host module) plus its per-instance view of
/// the runtime arenas.
pub struct Instance {
    pub name: String,
    pub module: Option<Arc<Module>>,
    pub(crate) funcs: Vec<FuncBinding>,
    pub(crate) globals: Vec<Index>,
    pub(crate) memories: Vec<Index>,
    pub(crate) tables: Vec<Index>,
    pub exports: HashMap<String, (Index, ExternalKind)>,
}

impl Instance {
    pub fn is_host(&self) -> bool {
        self.module.is_none()
    }

    pub(crate) fn func_binding(&self, space: Index) -> Option<FuncBinding> {
        self.funcs.get(space as usize).copied()
    }

    pub(crate) fn memory_arena(&self, index: Index) -> Option<Index> {
        self.memories.get(index as usize).copied()
    }

    pub(crate) fn table_arena(&self, index: Index) -> Option<Index> {
        self.tables.get(index as usize).copied()
    }

    pub(crate) fn global_arena(&self, index: Index) -> Option<Index> {
        self.globals.get(index as usize).copied()
    }
}

pub type ImportFuncHook = Box<dyn Fn(&Import) -> Option<HostFunc> + Send + Sync>;
pub type ImportGlobalHook = Box<dyn Fn(&Import) -> Option<Global> + Send + Sync>;
pub type ImportMemoryHook = Box<dyn Fn(&Import) -> Option<MemoryData> + Send + Sync>;
pub type ImportTableHook = Box<dyn Fn(&Import) -> Option<TableData> + Send + Sync>;

/// Hooks consulted when an import names something no module or host
/// module exports. Each may manufacture the missing object; the result
/// still has to pass the usual signature/type checks.
#[derive(Default)]
pub struct LinkPolicy {
    pub on_import_func: Option<ImportFuncHook>,
    pub on_import_global: Option<ImportGlobalHook>,
    pub on_import_memory: Option<ImportMemoryHook>,
    pub on_import_table: Option<ImportTableHook>,
    pub memory_hook: Option<Arc<dyn MemoryHook>>,
}

pub struct LinkOptions {
    pub policy: LinkPolicy,
    /// Stack sizes for the internal thread that runs start functions.
    pub value_stack_size: u32,
    pub call_stack_size: u32,
}

impl Default for LinkOptions {
    fn default() -> LinkOptions {
        LinkOptions {
            policy: LinkPolicy::default(),
            value_stack_size: Thread::DEFAULT_VALUE_STACK_SIZE,
            call_stack_size: Thread::DEFAULT_CALL_STACK_SIZE,
        }
    }
}

pub struct Runtime {
    pub(crate) instances: Vec<Instance>,
    by_name: HashMap<String, Index>,
    memories: Vec<Memory>,
    tables: Vec<Table>,
    globals: Vec<RuntimeGlobal>,
    host_funcs: Vec<HostFunc>,
    memory_hook: Option<Arc<dyn MemoryHook>>,
    sync: Arc<SyncContext>,
    error_callback: Option<ErrorCallback>,
}

impl Runtime {
    /// Link every module the environment holds against each other and the
    /// host modules, allocate memories and tables, run the initializers,
    /// then run start functions. Fails atomically.
    pub fn new(env: &Environment, options: LinkOptions) -> Result<Arc<Runtime>, LinkError> {
        let runtime = link::link(env, &options)?;
        let runtime = Arc::new(runtime);

        let mut starts: Vec<(Index, Index)> = Vec::new();
        for (id, instance) in runtime.instances.iter().enumerate() {
            if let Some(module) = &instance.module {
                if let Some(start) = module.start {
                    starts.push((id as Index, start));
                }
            }
        }
        if !starts.is_empty() {
            let mut thread = Thread::with_stack_sizes(
                &runtime,
                0,
                options.value_stack_size,
                options.call_stack_size,
            );
            for (instance, func) in starts {
                let name = runtime.instances[instance as usize].name.clone();
                thread
                    .call_index(instance, func, &[])
                    .map_err(|trap| LinkError::StartTrap { module: name, trap })?;
            }
        }
        Ok(runtime)
    }

    pub fn instance_id(&self, name: &str) -> Option<Index> {
        self.by_name.get(name).copied()
    }

    pub fn instance(&self, id: Index) -> &Instance {
        &self.instances[id as usize]
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn sync_context(&self) -> &Arc<SyncContext> {
        &self.sync
    }

    pub(crate) fn memory(&self, arena: Index) -> &Memory {
        &self.memories[arena as usize]
    }

    pub fn memories(&self) -> &[Memory] {
        &self.memories
    }

    pub(crate) fn table(&self, arena: Index) -> &Table {
        &self.tables[arena as usize]
    }

    pub(crate) fn global(&self, arena: Index) -> &RuntimeGlobal {
        &self.globals[arena as usize]
    }

    pub(crate) fn host_func(&self, index: Index) -> &HostFunc {
        &self.host_funcs[index as usize]
    }

    /// Locate an exported function: `(instance id, function-space index)`.
    pub fn export_func(&self, module: &str, field: &str) -> Result<(Index, Index), Trap> {
        let id = self.instance_id(module).ok_or(Trap::UnknownExport)?;
        let instance = self.instance(id);
        let &(slot, kind) = instance.exports.get(field).ok_or(Trap::UnknownExport)?;
        if kind != ExternalKind::Func {
            return Err(Trap::ExportKindMismatch);
        }
        Ok((id, slot))
    }

    /// An exported global, by module and field name.
    pub fn export_global(&self, module: &str, field: &str) -> Option<&RuntimeGlobal> {
        let id = self.instance_id(module)?;
        let instance = self.instance(id);
        let &(slot, kind) = instance.exports.get(field)?;
        if kind != ExternalKind::Global {
            return None;
        }
        let arena = instance.global_arena(slot)?;
        Some(self.global(arena))
    }

    pub(crate) fn binding_signature(&self, binding: FuncBinding) -> Option<&Signature> {
        match binding {
            FuncBinding::Pending => None,
            FuncBinding::Host(index) => Some(&self.host_funcs[index as usize].sig),
            FuncBinding::Wasm { instance, func } => {
                let module = self.instances[instance as usize].module.as_ref()?;
                let sig = module.funcs.get(func as usize)?.sig;
                module.signature(sig)
            }
        }
    }

    /// Structural signature equality, the import-matching rule.
    pub fn signatures_match(&self, a: &Signature, b: &Signature) -> bool {
        a == b
    }

    /// Page math and the reallocation itself; the calling thread wraps
    /// this in the stop-the-peers barrier.
    pub(crate) fn grow_memory_raw(&self, arena: Index, grow_pages: u32) -> bool {
        let memory = self.memory(arena);
        let mut data = memory.write();
        let old_pages = data.limits.initial;
        let Some(new_pages) = old_pages.checked_add(grow_pages) else {
            return false;
        };
        let max_pages = data.limits.max.unwrap_or(MAX_PAGES);
        if new_pages > max_pages {
            return false;
        }
        let new_size = new_pages as u64 * PAGE_SIZE as u64;
        if new_size > u32::MAX as u64 {
            return false;
        }
        if let Some(hook) = &self.memory_hook {
            if !hook.on_memory(&mut data, new_size as u32, MemoryAction::Realloc) {
                return false;
            }
        } else {
            data.resize(new_size as u32);
        }
        data.limits.initial = new_pages;
        true
    }

    pub(crate) fn report(&self, tag: &str, message: &str) {
        match &self.error_callback {
            Some(cb) => cb(tag, message),
            None => log::error!(target: "wisp", "{tag}: {message}"),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(hook) = &self.memory_hook {
            for memory in &self.memories {
                let mut data = memory.write();
                hook.on_memory(&mut data, 0, MemoryAction::Free);
            }
        }
    }
}
