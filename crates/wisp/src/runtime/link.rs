//! The link passes: enumerate host modules, fill per-instance vectors,
//! resolve imports along export chains with an explicit work list, then
//! allocate and run the data/element initializers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::environment::{Environment, HostFunc};
use crate::error::LinkError;
use crate::module::{Import, ImportKind};
use crate::thread::SyncContext;
use crate::types::{ExternalKind, Index, Signature, INVALID_INDEX, PAGE_SIZE};

use super::global::RuntimeGlobal;
use super::memory::{Memory, MemoryAction, MemoryData};
use super::table::{Table, TableData};
use super::{FuncBinding, Instance, LinkOptions, Runtime};

pub(super) fn link(env: &Environment, options: &LinkOptions) -> Result<Runtime, LinkError> {
    let mut linker = Linker {
        instances: Vec::new(),
        by_name: HashMap::new(),
        memories: Vec::new(),
        tables: Vec::new(),
        globals: Vec::new(),
        host_funcs: Vec::new(),
    };
    linker.add_host_instances(env);
    linker.add_module_instances(env);
    linker.resolve_imports(&options.policy)?;
    linker.allocate(options)?;
    linker.place_segments()?;
    Ok(linker.finish(env, options))
}

struct Linker {
    instances: Vec<Instance>,
    by_name: HashMap<String, Index>,
    memories: Vec<MemoryData>,
    tables: Vec<TableData>,
    globals: Vec<RuntimeGlobal>,
    host_funcs: Vec<HostFunc>,
}

impl Linker {
    fn add_instance(&mut self, instance: Instance) -> Index {
        let id = self.instances.len() as Index;
        self.by_name.insert(instance.name.clone(), id);
        self.instances.push(instance);
        id
    }

    /// Host functions and globals become arena entries up front. Mutable
    /// host globals are thereby copied once into runtime-owned storage;
    /// immutable ones get a single entry every importer aliases.
    fn add_host_instances(&mut self, env: &Environment) {
        for (name, host) in env.host_modules() {
            let mut instance = Instance {
                name: name.to_string(),
                module: None,
                funcs: Vec::new(),
                globals: Vec::new(),
                memories: Vec::new(),
                tables: Vec::new(),
                exports: HashMap::new(),
            };
            for (field, func) in &host.funcs {
                let arena = self.host_funcs.len() as Index;
                self.host_funcs.push(func.clone());
                let slot = instance.funcs.len() as Index;
                instance.funcs.push(FuncBinding::Host(arena));
                instance.exports.insert(field.clone(), (slot, ExternalKind::Func));
            }
            for (field, global) in &host.globals {
                let arena = self.globals.len() as Index;
                self.globals.push(RuntimeGlobal::new(global.init, global.mutable));
                let slot = instance.globals.len() as Index;
                instance.globals.push(arena);
                instance.exports.insert(field.clone(), (slot, ExternalKind::Global));
            }
            self.add_instance(instance);
        }
    }

    fn add_module_instances(&mut self, env: &Environment) {
        for (name, module) in env.modules() {
            let mut instance = Instance {
                name: name.to_string(),
                module: Some(module.clone()),
                funcs: Vec::new(),
                globals: Vec::new(),
                memories: Vec::new(),
                tables: Vec::new(),
                exports: HashMap::new(),
            };
            let id = self.instances.len() as Index;
            for entry in &module.func_index {
                if entry.import {
                    instance.funcs.push(FuncBinding::Pending);
                } else {
                    instance.funcs.push(FuncBinding::Wasm { instance: id, func: entry.index });
                }
            }
            for entry in &module.global_index {
                if entry.import {
                    instance.globals.push(INVALID_INDEX);
                } else {
                    let g = &module.globals[entry.index as usize];
                    let arena = self.globals.len() as Index;
                    self.globals.push(RuntimeGlobal::new(g.init, g.mutable));
                    instance.globals.push(arena);
                }
            }
            for entry in &module.memory_index {
                if entry.import {
                    instance.memories.push(INVALID_INDEX);
                } else {
                    let limits = module.memories[entry.index as usize];
                    let arena = self.memories.len() as Index;
                    self.memories.push(MemoryData::new(limits));
                    instance.memories.push(arena);
                }
            }
            for entry in &module.table_index {
                if entry.import {
                    instance.tables.push(INVALID_INDEX);
                } else {
                    let def = module.tables[entry.index as usize];
                    let arena = self.tables.len() as Index;
                    self.tables.push(TableData::new(def.ty, def.limits));
                    instance.tables.push(arena);
                }
            }
            for export in &module.exports {
                instance.exports.insert(export.name.clone(), (export.object, export.kind));
            }
            self.add_instance(instance);
        }
    }

    fn resolve_imports(&mut self, policy: &super::LinkPolicy) -> Result<(), LinkError> {
        // Snapshot the work list first; manufactured host exports append
        // to instances but never create new unresolved slots.
        let mut work: Vec<(Index, ExternalKind, Index)> = Vec::new();
        for (id, instance) in self.instances.iter().enumerate() {
            let Some(module) = &instance.module else { continue };
            for (space, entry) in module.func_index.iter().enumerate() {
                if entry.import {
                    work.push((id as Index, ExternalKind::Func, space as Index));
                }
            }
            for (space, entry) in module.global_index.iter().enumerate() {
                if entry.import {
                    work.push((id as Index, ExternalKind::Global, space as Index));
                }
            }
            for (space, entry) in module.memory_index.iter().enumerate() {
                if entry.import {
                    work.push((id as Index, ExternalKind::Memory, space as Index));
                }
            }
            for (space, entry) in module.table_index.iter().enumerate() {
                if entry.import {
                    work.push((id as Index, ExternalKind::Table, space as Index));
                }
            }
        }
        for (id, kind, space) in work {
            match kind {
                ExternalKind::Func => self.resolve_func(id, space, policy)?,
                ExternalKind::Global => self.resolve_global(id, space, policy)?,
                ExternalKind::Memory => self.resolve_memory(id, space, policy)?,
                ExternalKind::Table => self.resolve_table(id, space, policy)?,
                ExternalKind::Except => {}
            }
        }
        Ok(())
    }

    fn import_record(&self, id: Index, kind: ExternalKind, space: Index) -> Import {
        let module = self.instances[id as usize].module.as_ref().expect("importer is a module");
        let entry = match kind {
            ExternalKind::Func => module.func_index[space as usize],
            ExternalKind::Global => module.global_index[space as usize],
            ExternalKind::Memory => module.memory_index[space as usize],
            ExternalKind::Table => module.table_index[space as usize],
            ExternalKind::Except => module.except_index[space as usize],
        };
        module.imports[entry.index as usize].clone()
    }

    fn missing(&self, id: Index, import: &Import) -> LinkError {
        LinkError::MissingExport {
            importer: self.instances[id as usize].name.clone(),
            module: import.module.clone(),
            field: import.field.clone(),
        }
    }

    /// One lookup hop: the target instance and the export slot under the
    /// imported field, or `None` when the host module does not know the
    /// field yet.
    fn follow(
        &self,
        id: Index,
        kind: ExternalKind,
        import: &Import,
    ) -> Result<(Index, Option<(Index, ExternalKind)>), LinkError> {
        let target = self.by_name.get(&import.module).copied().ok_or_else(|| {
            LinkError::MissingModule {
                importer: self.instances[id as usize].name.clone(),
                module: import.module.clone(),
                field: import.field.clone(),
            }
        })?;
        let slot = self.instances[target as usize].exports.get(&import.field).copied();
        if let Some((_, found)) = slot {
            if found != kind {
                return Err(LinkError::KindMismatch {
                    importer: self.instances[id as usize].name.clone(),
                    module: import.module.clone(),
                    field: import.field.clone(),
                    expected: kind,
                    found,
                });
            }
        }
        Ok((target, slot))
    }

    fn import_func_signature(&self, id: Index, space: Index) -> Signature {
        let module = self.instances[id as usize].module.as_ref().expect("importer is a module");
        let entry = module.func_index[space as usize];
        match &module.imports[entry.index as usize].kind {
            ImportKind::Func { sig } => module.signatures[*sig as usize].clone(),
            _ => unreachable!("func space entry refers to a func import"),
        }
    }

    fn binding_signature(&self, binding: FuncBinding) -> Option<Signature> {
        match binding {
            FuncBinding::Pending => None,
            FuncBinding::Host(index) => Some(self.host_funcs[index as usize].sig.clone()),
            FuncBinding::Wasm { instance, func } => {
                let module = self.instances[instance as usize].module.as_ref()?;
                let sig = module.funcs.get(func as usize)?.sig;
                module.signature(sig).cloned()
            }
        }
    }

    fn resolve_func(
        &mut self,
        id: Index,
        space: Index,
        policy: &super::LinkPolicy,
    ) -> Result<(), LinkError> {
        if self.instances[id as usize].funcs[space as usize] != FuncBinding::Pending {
            return Ok(());
        }
        let mut chain: Vec<(Index, Index)> = vec![(id, space)];
        let binding = loop {
            let (cur, cur_space) = *chain.last().unwrap();
            let import = self.import_record(cur, ExternalKind::Func, cur_space);
            let (target, slot) = self.follow(cur, ExternalKind::Func, &import)?;
            match slot {
                Some((slot, _)) => {
                    match self.instances[target as usize].funcs.get(slot as usize).copied() {
                        Some(FuncBinding::Pending) => {
                            if chain.contains(&(target, slot)) {
                                return Err(LinkError::ImportCycle {
                                    importer: self.instances[cur as usize].name.clone(),
                                    module: import.module,
                                    field: import.field,
                                });
                            }
                            chain.push((target, slot));
                        }
                        Some(binding) => break binding,
                        None => return Err(self.missing(cur, &import)),
                    }
                }
                None => {
                    if !self.instances[target as usize].is_host() {
                        return Err(self.missing(cur, &import));
                    }
                    let manufactured =
                        policy.on_import_func.as_ref().and_then(|hook| hook(&import));
                    let Some(func) = manufactured else {
                        return Err(LinkError::PolicyRefused {
                            importer: self.instances[cur as usize].name.clone(),
                            module: import.module,
                            field: import.field,
                        });
                    };
                    let arena = self.host_funcs.len() as Index;
                    self.host_funcs.push(func);
                    let target_instance = &mut self.instances[target as usize];
                    let slot = target_instance.funcs.len() as Index;
                    target_instance.funcs.push(FuncBinding::Host(arena));
                    target_instance.exports.insert(import.field, (slot, ExternalKind::Func));
                    break FuncBinding::Host(arena);
                }
            }
        };
        let sig = self.binding_signature(binding).expect("resolved bindings have signatures");
        for (link_id, link_space) in chain {
            let import_sig = self.import_func_signature(link_id, link_space);
            if import_sig != sig {
                let import = self.import_record(link_id, ExternalKind::Func, link_space);
                return Err(LinkError::SignatureMismatch {
                    importer: self.instances[link_id as usize].name.clone(),
                    module: import.module,
                    field: import.field,
                });
            }
            self.instances[link_id as usize].funcs[link_space as usize] = binding;
        }
        Ok(())
    }

    fn resolve_global(
        &mut self,
        id: Index,
        space: Index,
        policy: &super::LinkPolicy,
    ) -> Result<(), LinkError> {
        if self.instances[id as usize].globals[space as usize] != INVALID_INDEX {
            return Ok(());
        }
        let mut chain: Vec<(Index, Index)> = vec![(id, space)];
        let arena = loop {
            let (cur, cur_space) = *chain.last().unwrap();
            let import = self.import_record(cur, ExternalKind::Global, cur_space);
            let (target, slot) = self.follow(cur, ExternalKind::Global, &import)?;
            match slot {
                Some((slot, _)) => {
                    match self.instances[target as usize].globals.get(slot as usize).copied() {
                        Some(INVALID_INDEX) => {
                            if chain.contains(&(target, slot)) {
                                return Err(LinkError::ImportCycle {
                                    importer: self.instances[cur as usize].name.clone(),
                                    module: import.module,
                                    field: import.field,
                                });
                            }
                            chain.push((target, slot));
                        }
                        Some(arena) => break arena,
                        None => return Err(self.missing(cur, &import)),
                    }
                }
                None => {
                    if !self.instances[target as usize].is_host() {
                        return Err(self.missing(cur, &import));
                    }
                    let manufactured =
                        policy.on_import_global.as_ref().and_then(|hook| hook(&import));
                    let Some(global) = manufactured else {
                        return Err(LinkError::PolicyRefused {
                            importer: self.instances[cur as usize].name.clone(),
                            module: import.module,
                            field: import.field,
                        });
                    };
                    let arena = self.globals.len() as Index;
                    self.globals.push(RuntimeGlobal::new(global.init, global.mutable));
                    let target_instance = &mut self.instances[target as usize];
                    let slot = target_instance.globals.len() as Index;
                    target_instance.globals.push(arena);
                    target_instance.exports.insert(import.field, (slot, ExternalKind::Global));
                    break arena;
                }
            }
        };
        let ty = self.globals[arena as usize].ty;
        for (link_id, link_space) in chain {
            let import = self.import_record(link_id, ExternalKind::Global, link_space);
            let expected = match &import.kind {
                ImportKind::Global { ty, .. } => *ty,
                _ => unreachable!("global space entry refers to a global import"),
            };
            if expected != ty {
                return Err(LinkError::GlobalTypeMismatch {
                    importer: self.instances[link_id as usize].name.clone(),
                    module: import.module,
                    field: import.field,
                });
            }
            self.instances[link_id as usize].globals[link_space as usize] = arena;
        }
        Ok(())
    }

    fn resolve_memory(
        &mut self,
        id: Index,
        space: Index,
        policy: &super::LinkPolicy,
    ) -> Result<(), LinkError> {
        if self.instances[id as usize].memories[space as usize] != INVALID_INDEX {
            return Ok(());
        }
        let mut chain: Vec<(Index, Index)> = vec![(id, space)];
        let arena = loop {
            let (cur, cur_space) = *chain.last().unwrap();
            let import = self.import_record(cur, ExternalKind::Memory, cur_space);
            let (target, slot) = self.follow(cur, ExternalKind::Memory, &import)?;
            match slot {
                Some((slot, _)) => {
                    match self.instances[target as usize].memories.get(slot as usize).copied() {
                        Some(INVALID_INDEX) => {
                            if chain.contains(&(target, slot)) {
                                return Err(LinkError::ImportCycle {
                                    importer: self.instances[cur as usize].name.clone(),
                                    module: import.module,
                                    field: import.field,
                                });
                            }
                            chain.push((target, slot));
                        }
                        Some(arena) => break arena,
                        None => return Err(self.missing(cur, &import)),
                    }
                }
                None => {
                    if !self.instances[target as usize].is_host() {
                        return Err(self.missing(cur, &import));
                    }
                    let manufactured =
                        policy.on_import_memory.as_ref().and_then(|hook| hook(&import));
                    let Some(data) = manufactured else {
                        return Err(LinkError::PolicyRefused {
                            importer: self.instances[cur as usize].name.clone(),
                            module: import.module,
                            field: import.field,
                        });
                    };
                    let arena = self.memories.len() as Index;
                    self.memories.push(data);
                    let target_instance = &mut self.instances[target as usize];
                    let slot = target_instance.memories.len() as Index;
                    target_instance.memories.push(arena);
                    target_instance.exports.insert(import.field, (slot, ExternalKind::Memory));
                    break arena;
                }
            }
        };
        for (link_id, link_space) in chain {
            let import = self.import_record(link_id, ExternalKind::Memory, link_space);
            if let ImportKind::Memory(limits) = &import.kind {
                // The import may widen the exporter's initial size.
                let memory = &mut self.memories[arena as usize];
                if limits.initial > memory.limits.initial {
                    memory.limits.initial = limits.initial;
                }
            }
            self.instances[link_id as usize].memories[link_space as usize] = arena;
        }
        Ok(())
    }

    fn resolve_table(
        &mut self,
        id: Index,
        space: Index,
        policy: &super::LinkPolicy,
    ) -> Result<(), LinkError> {
        if self.instances[id as usize].tables[space as usize] != INVALID_INDEX {
            return Ok(());
        }
        let mut chain: Vec<(Index, Index)> = vec![(id, space)];
        let arena = loop {
            let (cur, cur_space) = *chain.last().unwrap();
            let import = self.import_record(cur, ExternalKind::Table, cur_space);
            let (target, slot) = self.follow(cur, ExternalKind::Table, &import)?;
            match slot {
                Some((slot, _)) => {
                    match self.instances[target as usize].tables.get(slot as usize).copied() {
                        Some(INVALID_INDEX) => {
                            if chain.contains(&(target, slot)) {
                                return Err(LinkError::ImportCycle {
                                    importer: self.instances[cur as usize].name.clone(),
                                    module: import.module,
                                    field: import.field,
                                });
                            }
                            chain.push((target, slot));
                        }
                        Some(arena) => break arena,
                        None => return Err(self.missing(cur, &import)),
                    }
                }
                None => {
                    if !self.instances[target as usize].is_host() {
                        return Err(self.missing(cur, &import));
                    }
                    let manufactured =
                        policy.on_import_table.as_ref().and_then(|hook| hook(&import));
                    let Some(data) = manufactured else {
                        return Err(LinkError::PolicyRefused {
                            importer: self.instances[cur as usize].name.clone(),
                            module: import.module,
                            field: import.field,
                        });
                    };
                    let arena = self.tables.len() as Index;
                    self.tables.push(data);
                    let target_instance = &mut self.instances[target as usize];
                    let slot = target_instance.tables.len() as Index;
                    target_instance.tables.push(arena);
                    target_instance.exports.insert(import.field, (slot, ExternalKind::Table));
                    break arena;
                }
            }
        };
        for (link_id, link_space) in chain {
            let import = self.import_record(link_id, ExternalKind::Table, link_space);
            if let ImportKind::Table(def) = &import.kind {
                let table = &mut self.tables[arena as usize];
                if def.limits.initial > table.limits.initial {
                    table.limits.initial = def.limits.initial;
                }
            }
            self.instances[link_id as usize].tables[link_space as usize] = arena;
        }
        Ok(())
    }

    fn allocate(&mut self, options: &LinkOptions) -> Result<(), LinkError> {
        for memory in &mut self.memories {
            let size = memory.limits.initial as u64 * PAGE_SIZE as u64;
            if size > u32::MAX as u64 {
                return Err(LinkError::MemoryAllocFailed { pages: memory.limits.initial });
            }
            if memory.size() as u64 >= size {
                continue;
            }
            if let Some(hook) = &options.policy.memory_hook {
                if !hook.on_memory(memory, size as u32, MemoryAction::Alloc) {
                    return Err(LinkError::MemoryAllocFailed { pages: memory.limits.initial });
                }
            } else {
                memory.resize(size as u32);
            }
        }
        for table in &mut self.tables {
            table.fill_initial();
        }
        Ok(())
    }

    fn place_segments(&mut self) -> Result<(), LinkError> {
        for instance in &self.instances {
            let Some(module) = instance.module.clone() else { continue };
            for segment in &module.data {
                let arena = instance.memories[segment.memory as usize];
                let memory = &mut self.memories[arena as usize];
                let end = segment.offset as u64 + segment.data.len() as u64;
                if end > memory.size() as u64 {
                    return Err(LinkError::DataSegmentOutOfBounds {
                        module: instance.name.clone(),
                        offset: segment.offset,
                        len: segment.data.len(),
                    });
                }
                let start = segment.offset as usize;
                memory.data[start..start + segment.data.len()].copy_from_slice(&segment.data);
                let mark = (end as u32 + 15) & !15;
                if mark > memory.user_data_offset {
                    memory.user_data_offset = mark;
                }
            }
            for segment in &module.elements {
                let arena = instance.tables[segment.table as usize];
                let table = &mut self.tables[arena as usize];
                let end = segment.offset as u64 + segment.values.len() as u64;
                if end > table.values.len() as u64 {
                    return Err(LinkError::ElemSegmentOutOfBounds {
                        module: instance.name.clone(),
                        offset: segment.offset,
                        len: segment.values.len(),
                    });
                }
                let start = segment.offset as usize;
                table.values[start..start + segment.values.len()]
                    .copy_from_slice(&segment.values);
            }
        }
        Ok(())
    }

    fn finish(self, env: &Environment, options: &LinkOptions) -> Runtime {
        Runtime {
            instances: self.instances,
            by_name: self.by_name,
            memories: self.memories.into_iter().map(Memory::new).collect(),
            tables: self.tables.into_iter().map(Table::new).collect(),
            globals: self.globals,
            host_funcs: self.host_funcs,
            memory_hook: options.policy.memory_hook.clone(),
            sync: Arc::new(SyncContext::new()),
            error_callback: env.error_callback(),
        }
    }
}
