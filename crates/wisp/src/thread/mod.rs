//! The execution engine: per-thread value and call stacks, the call
//! protocol, host-call marshaling, and guest memory access. The opcode
//! dispatch loop itself lives in `run`.

mod run;
mod sync;

pub mod numeric;

pub use sync::SyncContext;

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::Trap;
use crate::module::{Module, OpRec};
use crate::opcode::RmwKind;
use crate::runtime::{FuncBinding, Runtime};
use crate::types::{Index, TypedValue, Value, INVALID_INDEX};

/// A call frame. `locals` is the value-stack position of the first
/// parameter; params and declared locals share one contiguous region and
/// operands are pushed above it.
pub(crate) struct Frame {
    pub instance: Index,
    pub module: Arc<Module>,
    /// Index into the module's local function list.
    pub func: Index,
    pub locals: usize,
    pub pc: usize,
}

/// What `push_call` did: entered a bytecode frame, or completed a host
/// call in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Entered,
    Completed,
}

pub struct Thread {
    runtime: Arc<Runtime>,
    value_stack: Vec<Value>,
    value_top: usize,
    call_stack: Vec<Frame>,
    call_stack_size: usize,
    user_stack_pointer: u32,
    user_stack_guard: u32,
    user_context: u32,
    sync: Option<Arc<SyncContext>>,
    tag: Index,
}

impl Thread {
    pub const DEFAULT_VALUE_STACK_SIZE: u32 = 1024;
    pub const DEFAULT_CALL_STACK_SIZE: u32 = 256;

    pub fn new(runtime: &Arc<Runtime>, tag: Index) -> Thread {
        Thread::with_stack_sizes(
            runtime,
            tag,
            Thread::DEFAULT_VALUE_STACK_SIZE,
            Thread::DEFAULT_CALL_STACK_SIZE,
        )
    }

    pub fn with_stack_sizes(
        runtime: &Arc<Runtime>,
        tag: Index,
        value_stack_size: u32,
        call_stack_size: u32,
    ) -> Thread {
        Thread {
            runtime: runtime.clone(),
            value_stack: vec![Value::ZERO; value_stack_size as usize],
            value_top: 0,
            call_stack: Vec::with_capacity(call_stack_size as usize),
            call_stack_size: call_stack_size as usize,
            user_stack_pointer: 0,
            user_stack_guard: 0,
            user_context: 0,
            sync: Some(runtime.sync_context().clone()),
            tag,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn tag(&self) -> Index {
        self.tag
    }

    pub fn set_sync_context(&mut self, sync: Option<Arc<SyncContext>>) {
        self.sync = sync;
    }

    pub fn set_user_stack_pointer(&mut self, pointer: u32, guard: u32) {
        self.user_stack_pointer = pointer;
        self.user_stack_guard = guard;
    }

    pub fn user_stack_pointer(&self) -> u32 {
        self.user_stack_pointer
    }

    pub fn user_stack_guard(&self) -> u32 {
        self.user_stack_guard
    }

    pub fn set_user_context(&mut self, context: u32) {
        self.user_context = context;
    }

    pub fn user_context(&self) -> u32 {
        self.user_context
    }

    /// Bump-allocate on the guest shadow stack (it grows downward).
    pub fn alloc_stack(&mut self, size: u32) -> Result<u32, Trap> {
        if self.user_stack_guard + size > self.user_stack_pointer {
            return Err(Trap::UserStackExhausted);
        }
        self.user_stack_pointer -= size;
        Ok(self.user_stack_pointer)
    }

    pub fn free_stack(&mut self, size: u32) {
        self.user_stack_pointer += size;
    }

    pub fn reset(&mut self) {
        self.value_top = 0;
        self.call_stack.clear();
    }

    pub fn value_depth(&self) -> usize {
        self.value_top
    }

    /// Call an exported function by module and export name. Arguments are
    /// checked against the signature; results come back typed.
    pub fn call(
        &mut self,
        module: &str,
        field: &str,
        args: &[TypedValue],
    ) -> Result<Vec<TypedValue>, Trap> {
        let (instance, space) = self.runtime.export_func(module, field)?;
        self.call_inner(instance, space, args, false)
    }

    /// Like `call`, but traps are returned without being reported through
    /// the error callback.
    pub fn call_safe(
        &mut self,
        module: &str,
        field: &str,
        args: &[TypedValue],
    ) -> Result<Vec<TypedValue>, Trap> {
        let (instance, space) = self.runtime.export_func(module, field)?;
        self.call_inner(instance, space, args, true)
    }

    /// Call by instance id and function-space index.
    pub fn call_index(
        &mut self,
        instance: Index,
        func: Index,
        args: &[TypedValue],
    ) -> Result<Vec<TypedValue>, Trap> {
        self.call_inner(instance, func, args, false)
    }

    fn call_inner(
        &mut self,
        instance: Index,
        space: Index,
        args: &[TypedValue],
        silent: bool,
    ) -> Result<Vec<TypedValue>, Trap> {
        let binding = self
            .runtime
            .instance(instance)
            .func_binding(space)
            .ok_or(Trap::UnknownExport)?;
        let sig = self.runtime.binding_signature(binding).ok_or(Trap::HostTrapped)?.clone();
        if args.len() != sig.params.len()
            || args.iter().zip(&sig.params).any(|(a, p)| a.ty != *p)
        {
            return Err(Trap::ArgumentTypeMismatch);
        }

        let orig_top = self.value_top;
        let orig_calls = self.call_stack.len();
        if self.value_top + args.len() > self.value_stack.len() {
            return Err(Trap::ValueStackExhausted);
        }
        for arg in args {
            self.value_stack[self.value_top] = arg.value;
            self.value_top += 1;
        }

        let outcome = self.enter(binding, orig_calls);
        match outcome {
            Ok(()) => {
                let mut results = Vec::with_capacity(sig.results.len());
                for (i, &ty) in sig.results.iter().enumerate() {
                    results.push(TypedValue::new(ty, self.value_stack[orig_top + i]));
                }
                self.value_top = orig_top;
                Ok(results)
            }
            Err(trap) => {
                if !silent {
                    self.runtime.report("Thread", &self.render_stack_trace(trap));
                }
                self.value_top = orig_top;
                self.call_stack.truncate(orig_calls);
                Err(trap)
            }
        }
    }

    fn enter(&mut self, binding: FuncBinding, stack_min: usize) -> Result<(), Trap> {
        match self.push_call_binding(binding)? {
            Disposition::Entered => self.run(stack_min),
            Disposition::Completed => Ok(()),
        }
    }

    pub(crate) fn push_call_space(
        &mut self,
        instance: Index,
        space: Index,
    ) -> Result<Disposition, Trap> {
        let binding = self
            .runtime
            .instance(instance)
            .func_binding(space)
            .ok_or(Trap::HostTrapped)?;
        self.push_call_binding(binding)
    }

    /// The call protocol: reserve `max(locals - params, results)` zeroed
    /// slots above the pushed params, then either push a frame or run a
    /// host callback in place.
    pub(crate) fn push_call_binding(&mut self, binding: FuncBinding) -> Result<Disposition, Trap> {
        self.try_sync();
        match binding {
            FuncBinding::Pending => Err(Trap::HostTrapped),
            FuncBinding::Host(index) => self.call_host(index),
            FuncBinding::Wasm { instance, func } => {
                let module =
                    self.runtime.instance(instance).module.clone().ok_or(Trap::HostTrapped)?;
                let f = &module.funcs[func as usize];
                let sig = &module.signatures[f.sig as usize];
                let nparams = sig.params.len();
                let nlocals = f.locals.len();
                let nresults = sig.results.len();
                let extra = (nlocals - nparams).max(nresults);
                if self.value_top + extra > self.value_stack.len() {
                    return Err(Trap::ValueStackExhausted);
                }
                if self.call_stack.len() >= self.call_stack_size {
                    return Err(Trap::CallStackExhausted);
                }
                for slot in &mut self.value_stack[self.value_top..self.value_top + extra] {
                    *slot = Value::ZERO;
                }
                let locals = self.value_top - nparams;
                self.value_top += nlocals - nparams;
                self.call_stack.push(Frame { instance, module: module.clone(), func, locals, pc: 0 });
                Ok(Disposition::Entered)
            }
        }
    }

    /// Marshal params through a single buffer, invoke the callback, write
    /// the leading result slots back. The function behaves as if it
    /// returned normally.
    fn call_host(&mut self, index: Index) -> Result<Disposition, Trap> {
        let host = self.runtime.host_func(index).clone();
        let nparams = host.sig.params.len();
        let nresults = host.sig.results.len();
        let base = self.value_top - nparams;
        let new_top = base + nresults;
        if new_top > self.value_stack.len() {
            return Err(Trap::ValueStackExhausted);
        }
        let mut buffer = vec![Value::ZERO; nparams.max(nresults)];
        buffer[..nparams].copy_from_slice(&self.value_stack[base..base + nparams]);
        (host.callback)(self, &mut buffer).map_err(|_| Trap::HostTrapped)?;
        self.value_stack[base..base + nresults].copy_from_slice(&buffer[..nresults]);
        self.value_top = new_top;
        Ok(Disposition::Completed)
    }

    /// Normal return: memmove the result slots down over the frame.
    pub(crate) fn pop_call(&mut self, results: usize) {
        let frame = self.call_stack.pop().expect("pop_call with an active frame");
        let src = self.value_top - results;
        if results > 0 && src != frame.locals {
            self.value_stack.copy_within(src..src + results, frame.locals);
        }
        self.value_top = frame.locals + results;
    }

    /// `end`: drop the operand stack to the recorded depth, preserving
    /// the top `results` slots.
    pub(crate) fn store_result(&mut self, operand_base: usize, stack: u32, results: u32) {
        let stack = stack as usize;
        let results = results as usize;
        let src = self.value_top - results;
        let dst = operand_base + stack;
        if results > 0 && src != dst {
            self.value_stack.copy_within(src..src + results, dst);
        }
        self.value_top = dst + results;
    }

    pub(crate) fn push(&mut self, value: Value) -> Result<(), Trap> {
        if self.value_top >= self.value_stack.len() {
            return Err(Trap::ValueStackExhausted);
        }
        self.value_stack[self.value_top] = value;
        self.value_top += 1;
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.value_top -= 1;
        self.value_stack[self.value_top]
    }

    pub(crate) fn top(&self) -> Value {
        self.value_stack[self.value_top - 1]
    }

    pub(crate) fn local(&self, frame_locals: usize, index: u32) -> Value {
        self.value_stack[frame_locals + index as usize]
    }

    pub(crate) fn set_local(&mut self, frame_locals: usize, index: u32, value: Value) {
        self.value_stack[frame_locals + index as usize] = value;
    }

    pub(crate) fn try_sync(&self) {
        if let Some(sync) = &self.sync {
            sync.wait_if_stopped();
        }
    }

    /// Grow under the stop-the-peers barrier: no thread reads or writes
    /// the buffer while its backing store may move.
    pub fn grow_memory(&self, arena: Index, pages: u32) -> bool {
        match &self.sync {
            Some(sync) => sync.with_stopped_peers(|| self.runtime.grow_memory_raw(arena, pages)),
            None => self.runtime.grow_memory_raw(arena, pages),
        }
    }

    /// Arena index of a memory of the current frame's instance. Host
    /// callbacks use index 0, like the guest they were called from.
    pub fn memory_index(&self, index: u32) -> Option<Index> {
        let frame = self.call_stack.last()?;
        let arena = self.runtime.instance(frame.instance).memory_arena(index)?;
        (arena != INVALID_INDEX).then_some(arena)
    }

    /// Read access to a memory's bytes for host code.
    pub fn with_memory<R>(
        &self,
        arena: Index,
        f: impl FnOnce(&crate::runtime::MemoryData) -> R,
    ) -> R {
        let guard = self.runtime.memory(arena).read();
        f(&guard)
    }

    pub fn with_memory_mut<R>(
        &self,
        arena: Index,
        f: impl FnOnce(&mut crate::runtime::MemoryData) -> R,
    ) -> R {
        let mut guard = self.runtime.memory(arena).write();
        f(&mut guard)
    }

    fn frame_memory(&self, instance: Index, index: u32) -> Result<Index, Trap> {
        let arena = self
            .runtime
            .instance(instance)
            .memory_arena(index)
            .ok_or(Trap::MemoryAccessOutOfBounds)?;
        if arena == INVALID_INDEX {
            return Err(Trap::MemoryAccessOutOfBounds);
        }
        Ok(arena)
    }

    pub(crate) fn frame_global(&self, instance: Index, index: u32) -> Result<Index, Trap> {
        let arena = self
            .runtime
            .instance(instance)
            .global_arena(index)
            .ok_or(Trap::Unreachable)?;
        if arena == INVALID_INDEX {
            return Err(Trap::Unreachable);
        }
        Ok(arena)
    }

    pub(crate) fn frame_table(&self, instance: Index, index: u32) -> Result<Index, Trap> {
        let arena = self
            .runtime
            .instance(instance)
            .table_arena(index)
            .ok_or(Trap::UndefinedTableIndex)?;
        if arena == INVALID_INDEX {
            return Err(Trap::UndefinedTableIndex);
        }
        Ok(arena)
    }

    /// Effective address: `u32(pop) + offset`, bounds-checked against the
    /// current memory size.
    pub(crate) fn mem_load<const N: usize>(
        &mut self,
        instance: Index,
        rec: OpRec,
    ) -> Result<[u8; N], Trap> {
        let addr = self.pop().u32() as u64 + rec.v1() as u64;
        let arena = self.frame_memory(instance, rec.v2())?;
        let guard = self.runtime.memory(arena).read();
        if addr + N as u64 > guard.data.len() as u64 {
            return Err(Trap::MemoryAccessOutOfBounds);
        }
        let at = addr as usize;
        let mut out = [0u8; N];
        out.copy_from_slice(&guard.data[at..at + N]);
        Ok(out)
    }

    pub(crate) fn mem_store<const N: usize>(
        &mut self,
        instance: Index,
        rec: OpRec,
        bytes: [u8; N],
    ) -> Result<(), Trap> {
        let addr = self.pop().u32() as u64 + rec.v1() as u64;
        let arena = self.frame_memory(instance, rec.v2())?;
        let mut guard = self.runtime.memory(arena).write();
        if addr + N as u64 > guard.data.len() as u64 {
            return Err(Trap::MemoryAccessOutOfBounds);
        }
        let at = addr as usize;
        guard.data[at..at + N].copy_from_slice(&bytes);
        Ok(())
    }

    pub(crate) fn atomic_load<const N: usize>(
        &mut self,
        instance: Index,
        rec: OpRec,
    ) -> Result<[u8; N], Trap> {
        let addr = self.pop().u32() as u64 + rec.v1() as u64;
        let arena = self.frame_memory(instance, rec.v2())?;
        let guard = self.runtime.memory(arena).read();
        if addr + N as u64 > guard.data.len() as u64 {
            return Err(Trap::MemoryAccessOutOfBounds);
        }
        if addr & (N as u64 - 1) != 0 {
            return Err(Trap::AtomicMemoryAccessUnaligned);
        }
        let at = addr as usize;
        let mut out = [0u8; N];
        out.copy_from_slice(&guard.data[at..at + N]);
        Ok(out)
    }

    pub(crate) fn atomic_store<const N: usize>(
        &mut self,
        instance: Index,
        rec: OpRec,
        bytes: [u8; N],
    ) -> Result<(), Trap> {
        let addr = self.pop().u32() as u64 + rec.v1() as u64;
        let arena = self.frame_memory(instance, rec.v2())?;
        let mut guard = self.runtime.memory(arena).write();
        if addr + N as u64 > guard.data.len() as u64 {
            return Err(Trap::MemoryAccessOutOfBounds);
        }
        if addr & (N as u64 - 1) != 0 {
            return Err(Trap::AtomicMemoryAccessUnaligned);
        }
        let at = addr as usize;
        guard.data[at..at + N].copy_from_slice(&bytes);
        Ok(())
    }

    /// `(read, write op(read, arg))`, pushing the prior value. Runs under
    /// the memory write guard, so RMWs are sequentially consistent.
    pub(crate) fn atomic_rmw(&mut self, instance: Index, rec: OpRec) -> Result<(), Trap> {
        let op = rec.opcode;
        let width = op.atomic_rmw_width().expect("atomic rmw opcode");
        let kind = op.atomic_rmw_kind().expect("atomic rmw opcode");
        let wide = op.atomic_is_64();
        let arg = if wide { self.pop().u64() } else { self.pop().u32() as u64 };
        let old = self.atomic_update(instance, rec, width, |old| {
            let mask = width_mask(width);
            match kind {
                RmwKind::Add => old.wrapping_add(arg) & mask,
                RmwKind::Sub => old.wrapping_sub(arg) & mask,
                RmwKind::And => old & arg & mask,
                RmwKind::Or => (old | arg) & mask,
                RmwKind::Xor => (old ^ arg) & mask,
                RmwKind::Xchg => arg & mask,
            }
        })?;
        if wide {
            self.push(Value::from_u64(old))
        } else {
            self.push(Value::from_u32(old as u32))
        }
    }

    /// `(expected, replacement)`: conditionally write, push the prior
    /// value either way.
    pub(crate) fn atomic_cmpxchg(&mut self, instance: Index, rec: OpRec) -> Result<(), Trap> {
        let op = rec.opcode;
        let width = op.atomic_cmpxchg_width().expect("atomic cmpxchg opcode");
        let wide = op.atomic_is_64();
        let mask = width_mask(width);
        let (replace, expect) = if wide {
            let replace = self.pop().u64();
            let expect = self.pop().u64();
            (replace & mask, expect & mask)
        } else {
            let replace = self.pop().u32() as u64;
            let expect = self.pop().u32() as u64;
            (replace & mask, expect & mask)
        };
        let old = self.atomic_update(instance, rec, width, |old| {
            if old == expect {
                replace
            } else {
                old
            }
        })?;
        if wide {
            self.push(Value::from_u64(old))
        } else {
            self.push(Value::from_u32(old as u32))
        }
    }

    fn atomic_update(
        &mut self,
        instance: Index,
        rec: OpRec,
        width: u32,
        f: impl FnOnce(u64) -> u64,
    ) -> Result<u64, Trap> {
        let addr = self.pop().u32() as u64 + rec.v1() as u64;
        let arena = self.frame_memory(instance, rec.v2())?;
        let mut guard = self.runtime.memory(arena).write();
        if addr + width as u64 > guard.data.len() as u64 {
            return Err(Trap::MemoryAccessOutOfBounds);
        }
        if addr & (width as u64 - 1) != 0 {
            return Err(Trap::AtomicMemoryAccessUnaligned);
        }
        let at = addr as usize;
        let mut bytes = [0u8; 8];
        bytes[..width as usize].copy_from_slice(&guard.data[at..at + width as usize]);
        let old = u64::from_le_bytes(bytes);
        let new = f(old);
        guard.data[at..at + width as usize]
            .copy_from_slice(&new.to_le_bytes()[..width as usize]);
        Ok(old)
    }

    /// Human-readable unwind of the call stack, newest frame first.
    pub fn render_stack_trace(&self, trap: Trap) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "trap: {trap}");
        let _ = writeln!(out, "stack unwind ({} frames):", self.call_stack.len());
        for (depth, frame) in self.call_stack.iter().rev().enumerate() {
            let module = &frame.module;
            let func = &module.funcs[frame.func as usize];
            let name = func.name.as_deref().unwrap_or("<anonymous>");
            let _ = writeln!(
                out,
                "  ({depth}) {}::{name} [func {}] pc {}",
                module.name, frame.func, frame.pc
            );
            let sig = &module.signatures[func.sig as usize];
            for (i, ty) in func.locals.iter().enumerate() {
                let role = if i < sig.params.len() { "param" } else { "local" };
                let value = self.value_stack[frame.locals + i];
                let _ = writeln!(out, "      {role} l{i}: {} = {:#x}", ty.name(), value.raw());
            }
            let window = 4usize;
            let from = frame.pc.saturating_sub(window);
            for at in from..=frame.pc.min(func.opcodes.len().saturating_sub(1)) {
                let _ = writeln!(out, "      ({at}) {:?}", func.opcodes[at]);
            }
        }
        out
    }
}

fn width_mask(width: u32) -> u64 {
    if width == 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}
