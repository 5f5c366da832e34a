//! The script runtime layer: wires the pool arena into linear memory and
//! exposes it to guest code as `ws_mem_pool_*` imports on the `env` host
//! module. Pointers crossing the boundary are linear-memory offsets.

pub(crate) mod alloc;

use std::sync::Arc;

use crate::environment::Environment;
use crate::error::HostFault;
use crate::module::Module;
use crate::opcode::Opcode;
use crate::runtime::Runtime;
use crate::thread::Thread;
use crate::types::{Index, Type, Value};

use alloc::{align_default, Arena, PoolFault, NODE_SIZE, POOL_SIZE};

/// Per-thread script state sizing.
#[derive(Debug, Clone, Copy)]
pub struct ScriptConfig {
    /// Bytes of guest shadow stack carved out of the root pool.
    pub user_stack: u32,
}

impl Default for ScriptConfig {
    fn default() -> ScriptConfig {
        ScriptConfig { user_stack: 8192 }
    }
}

/// Run a pool operation against the current frame's memory, growing and
/// retrying when the arena overruns the buffer.
fn with_arena<R>(
    thread: &mut Thread,
    mut op: impl FnMut(&mut Arena) -> Result<R, PoolFault>,
) -> Result<Option<R>, HostFault> {
    let arena_index = thread.memory_index(0).ok_or(HostFault)?;
    loop {
        let outcome = thread.with_memory_mut(arena_index, |mem| {
            if mem.ctx == 0 {
                return Err(PoolFault::Bad);
            }
            let mut arena = Arena::new(mem);
            op(&mut arena)
        });
        match outcome {
            Ok(value) => return Ok(Some(value)),
            Err(PoolFault::Grow(pages)) => {
                if !thread.grow_memory(arena_index, pages) {
                    // Allocation failure surfaces to the guest as a null
                    // offset, not a trap.
                    return Ok(None);
                }
            }
            Err(PoolFault::Bad) => return Err(HostFault),
        }
    }
}

fn guest_ptr(result: Option<u32>) -> Value {
    // The null offset crosses the boundary as 0.
    match result {
        Some(ptr) if ptr != alloc::NULL => Value::from_u32(ptr),
        _ => Value::from_u32(0),
    }
}

/// Register the `ws_mem_pool_*` host functions on the environment's `env`
/// module.
pub fn register_host_funcs(env: &mut Environment) {
    let module = env.env_module_mut();
    let i32s = |n: usize| vec![Type::I32; n];

    module.add_func("ws_mem_pool_acquire", i32s(0), i32s(1), |thread, buf| {
        let ctx = thread.user_context();
        let top = with_arena(thread, |arena| arena.ctx_top(ctx))?;
        buf[0] = guest_ptr(top);
        Ok(())
    });
    module.add_func("ws_mem_pool_push", i32s(1), i32s(0), |thread, buf| {
        let ctx = thread.user_context();
        let pool = buf[0].u32();
        with_arena(thread, |arena| arena.ctx_push(ctx, pool))?;
        Ok(())
    });
    module.add_func("ws_mem_pool_pop", i32s(0), i32s(0), |thread, _buf| {
        let ctx = thread.user_context();
        with_arena(thread, |arena| arena.ctx_pop(ctx))?;
        Ok(())
    });
    module.add_func("ws_mem_pool_create_unmanaged", i32s(0), i32s(1), |thread, buf| {
        let created = with_arena(thread, |arena| arena.pool_create(alloc::MIN_ALLOC))?;
        buf[0] = guest_ptr(created);
        Ok(())
    });
    module.add_func("ws_mem_pool_create", i32s(1), i32s(1), |thread, buf| {
        let ctx = thread.user_context();
        let parent = buf[0].u32();
        let created = with_arena(thread, |arena| {
            let parent = if parent != 0 { parent } else { arena.ctx_top(ctx)? };
            arena.pool_make_child(parent)
        })?;
        buf[0] = guest_ptr(created);
        Ok(())
    });
    module.add_func("ws_mem_pool_destroy", i32s(1), i32s(0), |thread, buf| {
        let pool = buf[0].u32();
        if pool != 0 {
            with_arena(thread, |arena| arena.pool_destroy(pool))?;
        }
        Ok(())
    });
    module.add_func("ws_mem_pool_clear", i32s(1), i32s(0), |thread, buf| {
        let pool = buf[0].u32();
        if pool != 0 {
            with_arena(thread, |arena| arena.pool_clear(pool))?;
        }
        Ok(())
    });
    module.add_func("ws_mem_pool_alloc", i32s(2), i32s(1), |thread, buf| {
        let pool = buf[0].u32();
        let size_ptr = buf[1].u32();
        if pool == 0 {
            return Ok(());
        }
        let result = with_arena(thread, |arena| {
            let bytes = arena.bytes(size_ptr, 4)?;
            let mut size = u32::from_le_bytes(bytes.try_into().unwrap());
            let ptr = arena.pool_alloc(pool, &mut size)?;
            arena.bytes_mut(size_ptr, 4)?.copy_from_slice(&size.to_le_bytes());
            Ok(ptr)
        })?;
        buf[0] = guest_ptr(result);
        Ok(())
    });
    module.add_func("ws_mem_pool_palloc", i32s(2), i32s(1), |thread, buf| {
        let pool = buf[0].u32();
        let size = buf[1].u32();
        if pool == 0 {
            return Ok(());
        }
        let result = with_arena(thread, |arena| {
            let mut size = size;
            arena.pool_alloc(pool, &mut size)
        })?;
        buf[0] = guest_ptr(result);
        Ok(())
    });
    module.add_func("ws_mem_pool_calloc", i32s(3), i32s(1), |thread, buf| {
        let pool = buf[0].u32();
        let count = buf[1].u32();
        let elt = buf[2].u32();
        if pool == 0 {
            return Ok(());
        }
        let result = with_arena(thread, |arena| {
            let mut size = count.checked_mul(elt).ok_or(PoolFault::Bad)?;
            let ptr = arena.pool_alloc(pool, &mut size)?;
            arena.bytes_mut(ptr, size)?.fill(0);
            Ok(ptr)
        })?;
        buf[0] = guest_ptr(result);
        Ok(())
    });
    module.add_func("ws_mem_pool_free", i32s(3), i32s(0), |thread, buf| {
        let pool = buf[0].u32();
        let ptr = buf[1].u32();
        let size = buf[2].u32();
        if pool != 0 {
            with_arena(thread, |arena| arena.pool_free(pool, ptr, size))?;
        }
        Ok(())
    });
}

/// Place an arena header in every linear memory of the runtime, above the
/// guest's static data and shadow stack.
pub fn install(runtime: &Arc<Runtime>) {
    for (index, memory) in runtime.memories().iter().enumerate() {
        let offset = deduce_stack_offset(runtime, index as Index);
        let mut data = memory.write();
        if data.size() == 0 {
            continue;
        }
        let base = align_default(offset.max(data.user_data_offset));
        if Arena::init(&mut data, base).is_err() {
            data.ctx = 0;
            log::warn!(target: "wisp", "script arena does not fit in memory {index}");
        }
    }
}

/// Create the thread's script state inside each installed arena: the root
/// pool, the shadow stack, and the pool-stack record.
pub fn init_thread(thread: &mut Thread, config: &ScriptConfig) -> bool {
    let runtime = thread.runtime().clone();
    for index in 0..runtime.memories().len() {
        let arena_index = index as Index;
        if runtime.memories()[index].read().ctx == 0 {
            continue;
        }
        let user_stack = config.user_stack;
        let created = loop {
            let outcome = thread.with_memory_mut(arena_index, |mem| {
                let mut arena = Arena::new(mem);
                let pool =
                    arena.pool_create(user_stack + NODE_SIZE + POOL_SIZE + 1024)?;
                let stack = arena.pool_palloc(pool, user_stack)?;
                let ctx = arena.ctx_create(pool)?;
                Ok((stack, ctx))
            });
            match outcome {
                Ok(v) => break Some(v),
                Err(PoolFault::Grow(pages)) => {
                    if !thread.grow_memory(arena_index, pages) {
                        break None;
                    }
                }
                Err(PoolFault::Bad) => break None,
            }
        };
        let Some((stack, ctx)) = created else { return false };
        thread.set_user_stack_pointer(stack + config.user_stack, stack);
        thread.set_user_context(ctx);
    }
    true
}

/// Copy a host string into the thread's current pool; returns the guest
/// offset of the NUL-terminated copy.
pub fn push_string(thread: &mut Thread, arena_index: Index, s: &str) -> Option<u32> {
    push_with(thread, arena_index, s.len() as u32 + 1, |dst| {
        dst[..s.len()].copy_from_slice(s.as_bytes());
        dst[s.len()] = 0;
    })
}

/// Copy host bytes into the thread's current pool.
pub fn push_bytes(thread: &mut Thread, arena_index: Index, bytes: &[u8]) -> Option<u32> {
    push_with(thread, arena_index, bytes.len() as u32, |dst| {
        dst.copy_from_slice(bytes);
    })
}

fn push_with(
    thread: &mut Thread,
    arena_index: Index,
    size: u32,
    fill: impl Fn(&mut [u8]),
) -> Option<u32> {
    let ctx = thread.user_context();
    loop {
        let outcome = thread.with_memory_mut(arena_index, |mem| {
            if mem.ctx == 0 {
                return Err(PoolFault::Bad);
            }
            let mut arena = Arena::new(mem);
            let pool = arena.ctx_top(ctx)?;
            let ptr = arena.pool_palloc(pool, size)?;
            fill(arena.bytes_mut(ptr, size)?);
            Ok(ptr)
        });
        match outcome {
            Ok(ptr) => return Some(ptr),
            Err(PoolFault::Grow(pages)) => {
                if !thread.grow_memory(arena_index, pages) {
                    return None;
                }
            }
            Err(PoolFault::Bad) => return None,
        }
    }
}

/// The linear-memory offset where guest static data ends, taking the
/// largest of the linking DataSize, the stack-pointer global behind the
/// `__wasm_get_stack_pointer` convention, and the private mutable i32
/// global scan.
fn deduce_stack_offset(runtime: &Runtime, arena_index: Index) -> u32 {
    let mut best = 0u32;
    for instance in runtime.instances() {
        let Some(module) = &instance.module else { continue };
        if !instance_uses_memory(instance, arena_index) {
            continue;
        }
        if let Some(size) = module.data_size {
            best = best.max(size);
            continue;
        }
        if let Some(value) = stack_pointer_from_export(module) {
            best = best.max(value);
        }
        if let Some(value) = stack_pointer_from_globals(module) {
            best = best.max(value);
        }
    }
    best
}

fn instance_uses_memory(instance: &crate::runtime::Instance, arena_index: Index) -> bool {
    let mut index = 0;
    while let Some(arena) = instance.memory_arena(index) {
        if arena == arena_index {
            return true;
        }
        index += 1;
    }
    false
}

/// Scan the conventional `__wasm_get_stack_pointer` export for the global
/// it reads and take that global's initial value.
fn stack_pointer_from_export(module: &Module) -> Option<u32> {
    if let Some(space) = module.stack_pointer_global {
        return global_initial_i32(module, space);
    }
    let export = module.export("__wasm_get_stack_pointer")?;
    if export.kind != crate::types::ExternalKind::Func {
        return None;
    }
    let func = module.func(export.object)?;
    for rec in &func.opcodes {
        if rec.opcode == Opcode::GetGlobal {
            if let Some(value) = global_initial_i32(module, rec.v1()) {
                return Some(value);
            }
        }
    }
    None
}

/// Fall back to the first private mutable i32 global.
fn stack_pointer_from_globals(module: &Module) -> Option<u32> {
    for entry in &module.global_index {
        if entry.import || entry.exported {
            continue;
        }
        let g = &module.globals[entry.index as usize];
        if g.ty == Type::I32 && g.mutable {
            return Some(g.init.value.u32());
        }
    }
    None
}

fn global_initial_i32(module: &Module, space: Index) -> Option<u32> {
    let entry = module.global_index.get(space as usize)?;
    if entry.import {
        return None;
    }
    let g = module.globals.get(entry.index as usize)?;
    (g.ty == Type::I32 && g.mutable).then(|| g.init.value.u32())
}
