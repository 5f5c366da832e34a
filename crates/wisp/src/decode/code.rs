//! Function-body decoding: synthesizes the flat opcode stream, resolving
//! every branch target while the operand types are checked.
//!
//! `block`/`loop` emit no records. A branch to a `block`/`if` label lands
//! on the label's `end` record, whose annotation restores the operand
//! stack; a branch to a `loop` lands on the loop body head.

use crate::decode::reader::Reader;
use crate::decode::typecheck::{LabelKind, TypeChecker};
use crate::error::DecodeError;
use crate::module::{ImportKind, Module, OpRec};
use crate::opcode::{Opcode, ATOMIC_PREFIX, MISC_PREFIX};
use crate::types::{Features, Index, Signature, Type};

fn ck<T>(result: Result<T, String>, at: usize) -> Result<T, DecodeError> {
    result.map_err(|m| DecodeError::new(m, at))
}

struct Label {
    kind: LabelKind,
    /// Opcode-stream index of the loop head; unused for other kinds.
    position: usize,
    /// Record indices whose `v2` still needs this label's end offset.
    fixups: Vec<usize>,
    /// The `if` record awaiting its false-branch target.
    if_record: Option<usize>,
}

pub(crate) struct FuncAssembler<'m> {
    module: &'m Module,
    sig: &'m Signature,
    locals: &'m [Type],
    features: Features,
    sp_global: Option<Index>,
    ops: Vec<OpRec>,
    labels: Vec<Label>,
    check: TypeChecker,
}

impl<'m> FuncAssembler<'m> {
    pub fn new(
        module: &'m Module,
        sig: &'m Signature,
        locals: &'m [Type],
        features: Features,
        sp_global: Option<Index>,
    ) -> FuncAssembler<'m> {
        FuncAssembler {
            module,
            sig,
            locals,
            features,
            sp_global,
            ops: Vec::new(),
            labels: Vec::new(),
            check: TypeChecker::new(),
        }
    }

    pub fn run(mut self, r: &mut Reader) -> Result<Vec<OpRec>, DecodeError> {
        self.check.push_label(LabelKind::Func, self.sig.results.first().copied());
        self.labels.push(Label { kind: LabelKind::Func, position: 0, fixups: Vec::new(), if_record: None });

        while !self.labels.is_empty() {
            if r.is_done() {
                return Err(DecodeError::new("END opcode expected", r.pos()));
            }
            self.step(r)?;
        }
        if !r.is_done() {
            return Err(DecodeError::new("junk after function body", r.pos()));
        }
        Ok(self.ops)
    }

    fn fail(&self, message: impl Into<String>, at: usize) -> DecodeError {
        DecodeError::new(message, at)
    }

    fn emit(&mut self, rec: OpRec) {
        self.ops.push(rec);
    }

    /// Emit a branch-shaped record for label `depth`, either resolved (to
    /// a loop head) or recorded as a fixup on the label.
    fn emit_branch(&mut self, opcode: Opcode, v1: u32, depth: u32) {
        let idx = self.labels.len() - 1 - depth as usize;
        let at = self.ops.len();
        if self.labels[idx].kind == LabelKind::Loop {
            let target = self.labels[idx].position as u32;
            self.emit(OpRec::with_pair(opcode, v1, target));
        } else {
            self.emit(OpRec::with_pair(opcode, v1, 0));
            self.labels[idx].fixups.push(at);
        }
    }

    fn block_result(&self, r: &mut Reader) -> Result<Option<Type>, DecodeError> {
        let at = r.pos();
        let code = r.leb_i32()?;
        match Type::from_code(code) {
            Some(Type::Void) => Ok(None),
            Some(ty) if ty.is_value() => Ok(Some(ty)),
            _ => Err(self.fail("invalid block result type", at)),
        }
    }

    fn local_type(&self, index: u32, at: usize) -> Result<Type, DecodeError> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.fail("unknown local", at))
    }

    fn global_type(&self, index: u32, at: usize) -> Result<(Type, bool), DecodeError> {
        let entry = self
            .module
            .global_index
            .get(index as usize)
            .ok_or_else(|| self.fail("unknown global", at))?;
        if entry.import {
            match &self.module.imports[entry.index as usize].kind {
                ImportKind::Global { ty, mutable } => Ok((*ty, *mutable)),
                _ => Err(self.fail("unknown global", at)),
            }
        } else {
            let g = &self.module.globals[entry.index as usize];
            Ok((g.ty, g.mutable))
        }
    }

    /// A load/store immediate: alignment hint then offset. The hint must
    /// not exceed (for atomics: must equal) the natural alignment.
    fn mem_immediate(
        &self,
        r: &mut Reader,
        natural: u32,
        exact: bool,
    ) -> Result<(u32, u32), DecodeError> {
        let at = r.pos();
        let align = r.leb_u32()?;
        let offset = r.leb_u32()?;
        let natural_log2 = natural.trailing_zeros();
        if align > natural_log2 {
            return Err(self.fail("alignment must not be larger than natural", at));
        }
        if exact && align != natural_log2 {
            return Err(self.fail("atomic alignment must be natural", at));
        }
        if self.module.memory_index.is_empty() {
            return Err(self.fail("unknown memory", at));
        }
        Ok((offset, 0))
    }

    fn step(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let at = r.pos();
        let byte = r.u8()?;
        let opcode = match byte {
            MISC_PREFIX => {
                let sub = r.u8()?;
                Opcode::from_misc(sub).ok_or_else(|| self.fail("illegal opcode", at))?
            }
            ATOMIC_PREFIX => {
                let sub = r.u8()?;
                Opcode::from_atomic(sub).ok_or_else(|| self.fail("illegal opcode", at))?
            }
            b => Opcode::from_byte(b).ok_or_else(|| self.fail("illegal opcode", at))?,
        };
        if !opcode.enabled(&self.features) {
            return Err(self.fail(format!("opcode {} not enabled by features", opcode.name()), at));
        }

        match opcode {
            Opcode::Unreachable => {
                self.emit(OpRec::new(Opcode::Unreachable));
                self.check.mark_unreachable();
            }
            Opcode::Nop => self.emit(OpRec::new(Opcode::Nop)),

            Opcode::Block => {
                let result = self.block_result(r)?;
                self.check.push_label(LabelKind::Block, result);
                self.labels.push(Label {
                    kind: LabelKind::Block,
                    position: self.ops.len(),
                    fixups: Vec::new(),
                    if_record: None,
                });
            }
            Opcode::Loop => {
                let result = self.block_result(r)?;
                self.check.push_label(LabelKind::Loop, result);
                self.labels.push(Label {
                    kind: LabelKind::Loop,
                    position: self.ops.len(),
                    fixups: Vec::new(),
                    if_record: None,
                });
            }
            Opcode::If => {
                let result = self.block_result(r)?;
                ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                let if_record = self.ops.len();
                self.emit(OpRec::with_pair(Opcode::If, 0, 0));
                self.check.push_label(LabelKind::If, result);
                self.labels.push(Label {
                    kind: LabelKind::If,
                    position: self.ops.len(),
                    fixups: Vec::new(),
                    if_record: Some(if_record),
                });
            }
            Opcode::Else => {
                ck(self.check.on_else(), at)?;
                if self.labels.last().map(|l| l.kind) != Some(LabelKind::If) {
                    return Err(self.fail("else must close an if", at));
                }
                // The true arm jumps over the false arm, to the end record.
                let else_record = self.ops.len();
                self.emit(OpRec::with_pair(Opcode::Else, 0, 0));
                let false_target = self.ops.len() as u32;
                let label = self.labels.last_mut().unwrap();
                label.kind = LabelKind::Else;
                label.fixups.push(else_record);
                let if_record = label.if_record.take().expect("if record is set for if labels");
                self.ops[if_record].set_v2(false_target);
            }
            Opcode::Try => {
                let result = self.block_result(r)?;
                self.check.push_label(LabelKind::Try, result);
                self.labels.push(Label {
                    kind: LabelKind::Try,
                    position: self.ops.len(),
                    fixups: Vec::new(),
                    if_record: None,
                });
            }
            Opcode::Catch | Opcode::CatchAll => {
                ck(self.check.on_catch(), at)?;
                let rec = self.ops.len();
                self.emit(OpRec::new(opcode));
                let label = self.labels.last_mut().unwrap();
                label.kind = LabelKind::Catch;
                label.fixups.push(rec);
            }
            Opcode::Throw => {
                let except = r.leb_u32()?;
                self.emit(OpRec::with_pair(Opcode::Throw, except, 0));
                self.check.mark_unreachable();
            }
            Opcode::Rethrow => {
                let depth = r.leb_u32()?;
                self.emit(OpRec::with_pair(Opcode::Rethrow, depth, 0));
                self.check.mark_unreachable();
            }
            Opcode::End => {
                let closed = ck(self.check.on_end(), at)?;
                let end_record = self.ops.len() as u32;
                let label = self.labels.pop().unwrap();
                if let Some(if_record) = label.if_record {
                    // if without else: the false branch falls to the end.
                    self.ops[if_record].set_v2(end_record);
                }
                for fixup in label.fixups {
                    self.ops[fixup].set_v2(end_record);
                }
                let results = closed.result.map_or(0, |_| 1) as u32;
                self.emit(OpRec::with_pair(Opcode::End, closed.limit as u32, results));
            }
            Opcode::Br => {
                let depth = r.leb_u32()?;
                ck(self.check.on_br(depth), at)?;
                self.emit_branch(Opcode::Br, 0, depth);
            }
            Opcode::BrIf => {
                let depth = r.leb_u32()?;
                ck(self.check.on_br_if(depth), at)?;
                self.emit_branch(Opcode::BrIf, 0, depth);
            }
            Opcode::BrTable => {
                let count = r.leb_u32()?;
                let mut targets = Vec::with_capacity(count.min(4096) as usize);
                for _ in 0..count {
                    targets.push(r.leb_u32()?);
                }
                let default = r.leb_u32()?;
                ck(self.check.on_br_table(&targets, default), at)?;
                self.emit(OpRec::with_pair(Opcode::BrTable, count, 0));
                for depth in targets.into_iter().chain(std::iter::once(default)) {
                    // Target records are reached only through the head's
                    // computed jump, never dispatched directly.
                    self.emit_branch(Opcode::Br, 0, depth);
                }
            }
            Opcode::Return => {
                let depth = self.labels.len() as u32 - 1;
                ck(self.check.on_br(depth), at)?;
                let results = self.sig.results.len() as u32;
                self.emit(OpRec::with_pair(Opcode::Return, results, 0));
            }
            Opcode::Call => {
                let index = r.leb_u32()?;
                let entry = *self
                    .module
                    .func_index
                    .get(index as usize)
                    .ok_or_else(|| self.fail("unknown function", at))?;
                let sig = self
                    .module
                    .func_signature(index)
                    .ok_or_else(|| self.fail("unknown function", at))?
                    .clone();
                ck(self.check.on_call(&sig.params, &sig.results), at)?;
                self.emit(OpRec::with_pair(Opcode::Call, index, entry.import as u32));
            }
            Opcode::CallIndirect => {
                let sig_index = r.leb_u32()?;
                let table_index = r.leb_u32()?;
                let sig = self
                    .module
                    .signature(sig_index)
                    .ok_or_else(|| self.fail("unknown type", at))?
                    .clone();
                if self.module.table_index.get(table_index as usize).is_none() {
                    return Err(self.fail("unknown table", at));
                }
                ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                ck(self.check.on_call(&sig.params, &sig.results), at)?;
                self.emit(OpRec::with_pair(Opcode::CallIndirect, sig_index, table_index));
            }

            Opcode::Drop => {
                ck(self.check.pop_any().map(|_| ()), at)?;
                self.emit(OpRec::new(Opcode::Drop));
            }
            Opcode::Select => {
                ck(self.check.on_select(), at)?;
                self.emit(OpRec::new(Opcode::Select));
            }

            Opcode::GetLocal => {
                let index = r.leb_u32()?;
                let ty = self.local_type(index, at)?;
                self.check.push(ty);
                self.emit(OpRec::with_pair(Opcode::GetLocal, index, 0));
            }
            Opcode::SetLocal => {
                let index = r.leb_u32()?;
                let ty = self.local_type(index, at)?;
                ck(self.check.pop_expect(ty).map(|_| ()), at)?;
                self.emit(OpRec::with_pair(Opcode::SetLocal, index, 0));
            }
            Opcode::TeeLocal => {
                let index = r.leb_u32()?;
                let ty = self.local_type(index, at)?;
                ck(self.check.pop_expect(ty).map(|_| ()), at)?;
                self.check.push(ty);
                self.emit(OpRec::with_pair(Opcode::TeeLocal, index, 0));
            }
            Opcode::GetGlobal => {
                let index = r.leb_u32()?;
                let (ty, _) = self.global_type(index, at)?;
                self.check.push(ty);
                if self.features.stack_pointer && self.sp_global == Some(index) {
                    self.emit(OpRec::new(Opcode::InterpGetStack));
                } else {
                    self.emit(OpRec::with_pair(Opcode::GetGlobal, index, 0));
                }
            }
            Opcode::SetGlobal => {
                let index = r.leb_u32()?;
                let (ty, mutable) = self.global_type(index, at)?;
                if !mutable {
                    return Err(self.fail("global is immutable", at));
                }
                ck(self.check.pop_expect(ty).map(|_| ()), at)?;
                if self.features.stack_pointer && self.sp_global == Some(index) {
                    self.emit(OpRec::new(Opcode::InterpSetStack));
                } else {
                    self.emit(OpRec::with_pair(Opcode::SetGlobal, index, 0));
                }
            }

            Opcode::I32Const => {
                let value = r.leb_i32()?;
                self.check.push(Type::I32);
                self.emit(OpRec::with_pair(Opcode::I32Const, value as u32, 0));
            }
            Opcode::I64Const => {
                let value = r.leb_i64()?;
                self.check.push(Type::I64);
                self.emit(OpRec::with_u64(Opcode::I64Const, value as u64));
            }
            Opcode::F32Const => {
                let bits = r.f32_bits()?;
                self.check.push(Type::F32);
                self.emit(OpRec::with_pair(Opcode::F32Const, bits, 0));
            }
            Opcode::F64Const => {
                let bits = r.f64_bits()?;
                self.check.push(Type::F64);
                self.emit(OpRec::with_u64(Opcode::F64Const, bits));
            }

            Opcode::CurrentMemory | Opcode::GrowMemory => {
                let mem = r.leb_u32()?;
                if self.module.memory_index.get(mem as usize).is_none() {
                    return Err(self.fail("unknown memory", at));
                }
                if opcode == Opcode::GrowMemory {
                    ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                }
                self.check.push(Type::I32);
                self.emit(OpRec::with_pair(opcode, mem, 0));
            }

            _ => {
                if let Some((_, result_ty, natural, store)) = memory_access(opcode) {
                    let exact = opcode.is_atomic();
                    let (offset, mem) = self.mem_immediate(r, natural, exact)?;
                    if store {
                        ck(self.check.pop_expect(result_ty).map(|_| ()), at)?;
                        ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                    } else {
                        ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                        self.check.push(result_ty);
                    }
                    self.emit(OpRec::with_pair(opcode, offset, mem));
                } else if let Some(width) = opcode.atomic_rmw_width() {
                    let value_ty = atomic_value_type(opcode);
                    let (offset, mem) = self.mem_immediate(r, width, true)?;
                    ck(self.check.pop_expect(value_ty).map(|_| ()), at)?;
                    ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                    self.check.push(value_ty);
                    self.emit(OpRec::with_pair(opcode, offset, mem));
                } else if let Some(width) = opcode.atomic_cmpxchg_width() {
                    let value_ty = atomic_value_type(opcode);
                    let (offset, mem) = self.mem_immediate(r, width, true)?;
                    ck(self.check.pop_expect(value_ty).map(|_| ()), at)?;
                    ck(self.check.pop_expect(value_ty).map(|_| ()), at)?;
                    ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                    self.check.push(value_ty);
                    self.emit(OpRec::with_pair(opcode, offset, mem));
                } else if matches!(opcode, Opcode::I32AtomicWait | Opcode::I64AtomicWait) {
                    let value_ty =
                        if opcode == Opcode::I32AtomicWait { Type::I32 } else { Type::I64 };
                    let natural = if value_ty == Type::I32 { 4 } else { 8 };
                    let (offset, mem) = self.mem_immediate(r, natural, true)?;
                    ck(self.check.pop_expect(Type::I64).map(|_| ()), at)?;
                    ck(self.check.pop_expect(value_ty).map(|_| ()), at)?;
                    ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                    self.check.push(Type::I32);
                    self.emit(OpRec::with_pair(opcode, offset, mem));
                } else if opcode == Opcode::AtomicWake {
                    let (offset, mem) = self.mem_immediate(r, 4, true)?;
                    ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                    ck(self.check.pop_expect(Type::I32).map(|_| ()), at)?;
                    self.check.push(Type::I32);
                    self.emit(OpRec::with_pair(opcode, offset, mem));
                } else if let Some((params, result)) = simple_signature(opcode) {
                    for &p in params.iter().rev() {
                        ck(self.check.pop_expect(p).map(|_| ()), at)?;
                    }
                    self.check.push(result);
                    self.emit(OpRec::new(opcode));
                } else {
                    return Err(self.fail("illegal opcode", at));
                }
            }
        }
        Ok(())
    }
}

/// `(memory type, stack type, natural alignment, is store)` for plain and
/// atomic loads/stores.
fn memory_access(op: Opcode) -> Option<(Type, Type, u32, bool)> {
    use Opcode::*;
    Some(match op {
        I32Load => (Type::I32, Type::I32, 4, false),
        I64Load => (Type::I64, Type::I64, 8, false),
        F32Load => (Type::F32, Type::F32, 4, false),
        F64Load => (Type::F64, Type::F64, 8, false),
        I32Load8S | I32Load8U => (Type::I32, Type::I32, 1, false),
        I32Load16S | I32Load16U => (Type::I32, Type::I32, 2, false),
        I64Load8S | I64Load8U => (Type::I64, Type::I64, 1, false),
        I64Load16S | I64Load16U => (Type::I64, Type::I64, 2, false),
        I64Load32S | I64Load32U => (Type::I64, Type::I64, 4, false),
        I32Store => (Type::I32, Type::I32, 4, true),
        I64Store => (Type::I64, Type::I64, 8, true),
        F32Store => (Type::F32, Type::F32, 4, true),
        F64Store => (Type::F64, Type::F64, 8, true),
        I32Store8 => (Type::I32, Type::I32, 1, true),
        I32Store16 => (Type::I32, Type::I32, 2, true),
        I64Store8 => (Type::I64, Type::I64, 1, true),
        I64Store16 => (Type::I64, Type::I64, 2, true),
        I64Store32 => (Type::I64, Type::I64, 4, true),
        I32AtomicLoad => (Type::I32, Type::I32, 4, false),
        I64AtomicLoad => (Type::I64, Type::I64, 8, false),
        I32AtomicLoad8U => (Type::I32, Type::I32, 1, false),
        I32AtomicLoad16U => (Type::I32, Type::I32, 2, false),
        I64AtomicLoad8U => (Type::I64, Type::I64, 1, false),
        I64AtomicLoad16U => (Type::I64, Type::I64, 2, false),
        I64AtomicLoad32U => (Type::I64, Type::I64, 4, false),
        I32AtomicStore => (Type::I32, Type::I32, 4, true),
        I64AtomicStore => (Type::I64, Type::I64, 8, true),
        I32AtomicStore8 => (Type::I32, Type::I32, 1, true),
        I32AtomicStore16 => (Type::I32, Type::I32, 2, true),
        I64AtomicStore8 => (Type::I64, Type::I64, 1, true),
        I64AtomicStore16 => (Type::I64, Type::I64, 2, true),
        I64AtomicStore32 => (Type::I64, Type::I64, 4, true),
        _ => return None,
    })
}

fn atomic_value_type(op: Opcode) -> Type {
    if op.name().starts_with("i64") {
        Type::I64
    } else {
        Type::I32
    }
}

/// Typing for opcodes with no immediates: parameters and the single result.
fn simple_signature(op: Opcode) -> Option<(&'static [Type], Type)> {
    use Opcode::*;
    use Type::{F32, F64, I32, I64};
    const I32_1: &[Type] = &[I32];
    const I32_2: &[Type] = &[I32, I32];
    const I64_1: &[Type] = &[I64];
    const I64_2: &[Type] = &[I64, I64];
    const F32_1: &[Type] = &[F32];
    const F32_2: &[Type] = &[F32, F32];
    const F64_1: &[Type] = &[F64];
    const F64_2: &[Type] = &[F64, F64];

    Some(match op {
        I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
        | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr => (I32_2, I32),
        I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU => {
            (I32_2, I32)
        }
        I32Eqz | I32Clz | I32Ctz | I32Popcnt | I32Extend8S | I32Extend16S => (I32_1, I32),

        I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
        | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr => (I64_2, I64),
        I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU => {
            (I64_2, I32)
        }
        I64Eqz => (I64_1, I32),
        I64Clz | I64Ctz | I64Popcnt | I64Extend8S | I64Extend16S | I64Extend32S => (I64_1, I64),

        F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => (F32_2, F32),
        F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => (F32_2, I32),
        F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => (F32_1, F32),

        F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => (F64_2, F64),
        F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => (F64_2, I32),
        F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => (F64_1, F64),

        I32WrapI64 => (I64_1, I32),
        I32TruncSF32 | I32TruncUF32 | I32TruncSSatF32 | I32TruncUSatF32 => (F32_1, I32),
        I32TruncSF64 | I32TruncUF64 | I32TruncSSatF64 | I32TruncUSatF64 => (F64_1, I32),
        I64ExtendSI32 | I64ExtendUI32 => (I32_1, I64),
        I64TruncSF32 | I64TruncUF32 | I64TruncSSatF32 | I64TruncUSatF32 => (F32_1, I64),
        I64TruncSF64 | I64TruncUF64 | I64TruncSSatF64 | I64TruncUSatF64 => (F64_1, I64),
        F32ConvertSI32 | F32ConvertUI32 => (I32_1, F32),
        F32ConvertSI64 | F32ConvertUI64 => (I64_1, F32),
        F32DemoteF64 => (F64_1, F32),
        F64ConvertSI32 | F64ConvertUI32 => (I32_1, F64),
        F64ConvertSI64 | F64ConvertUI64 => (I64_1, F64),
        F64PromoteF32 => (F32_1, F64),
        I32ReinterpretF32 => (F32_1, I32),
        I64ReinterpretF64 => (F64_1, I64),
        F32ReinterpretI32 => (I32_1, F32),
        F64ReinterpretI64 => (I64_1, F64),

        _ => return None,
    })
}
