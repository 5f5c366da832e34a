//! The opcode dispatch loop. One tight loop per frame: read the record at
//! `pc`, switch on the opcode, branch by assigning the pre-resolved
//! target. Frames push and pop around it in `Thread::push_call_binding`
//! and `Thread::pop_call`.

use crate::error::Trap;
use crate::opcode::Opcode;
use crate::thread::numeric::{self, f32b, f64b};
use crate::thread::{Disposition, Thread};
use crate::types::{Value, INVALID_INDEX};

impl Thread {
    pub(crate) fn run(&mut self, stack_min: usize) -> Result<(), Trap> {
        while self.call_stack.len() > stack_min {
            self.try_sync();
            let frame = self.call_stack.last().expect("frame above stack_min");
            let instance = frame.instance;
            let module = frame.module.clone();
            let locals = frame.locals;
            let mut pc = frame.pc;
            let func = &module.funcs[frame.func as usize];
            let ops = &func.opcodes;
            let operand_base = locals + func.locals.len();
            let func_results = module.signatures[func.sig as usize].results.len();

            // Propagate a trap, recording the faulting pc for the trace.
            macro_rules! t {
                ($e:expr) => {
                    match $e {
                        Ok(v) => v,
                        Err(trap) => {
                            self.call_stack.last_mut().unwrap().pc = pc;
                            return Err(trap);
                        }
                    }
                };
            }
            macro_rules! tr {
                ($trap:ident) => {{
                    self.call_stack.last_mut().unwrap().pc = pc;
                    return Err(Trap::$trap);
                }};
            }
            macro_rules! bin {
                ($pop:ident, $push:ident, $f:expr) => {{
                    let r = self.pop().$pop();
                    let l = self.pop().$pop();
                    let f = $f;
                    t!(self.push(Value::$push(f(l, r))));
                }};
            }
            macro_rules! cmp {
                ($pop:ident, $f:expr) => {{
                    let r = self.pop().$pop();
                    let l = self.pop().$pop();
                    let f = $f;
                    t!(self.push(Value::from_u32(f(l, r) as u32)));
                }};
            }
            macro_rules! un {
                ($pop:ident, $push:ident, $f:expr) => {{
                    let v = self.pop().$pop();
                    let f = $f;
                    t!(self.push(Value::$push(f(v))));
                }};
            }
            // Float arithmetic on the raw representation, quieting NaNs.
            macro_rules! fbin32 {
                ($f:expr) => {
                    bin!(f32_bits, from_u32, |l: u32, r: u32| {
                        let f = $f;
                        f32b::quieten(f(f32::from_bits(l), f32::from_bits(r)).to_bits())
                    })
                };
            }
            macro_rules! fbin64 {
                ($f:expr) => {
                    bin!(f64_bits, from_u64, |l: u64, r: u64| {
                        let f = $f;
                        f64b::quieten(f(f64::from_bits(l), f64::from_bits(r)).to_bits())
                    })
                };
            }
            macro_rules! fun32 {
                ($f:expr) => {
                    un!(f32_bits, from_u32, |v: u32| {
                        let f = $f;
                        f32b::quieten(f(f32::from_bits(v)).to_bits())
                    })
                };
            }
            macro_rules! fun64 {
                ($f:expr) => {
                    un!(f64_bits, from_u64, |v: u64| {
                        let f = $f;
                        f64b::quieten(f(f64::from_bits(v)).to_bits())
                    })
                };
            }

            'dispatch: loop {
                if pc >= ops.len() {
                    self.pop_call(func_results);
                    break 'dispatch;
                }
                let rec = ops[pc];
                match rec.opcode {
                    Opcode::Nop => {}
                    Opcode::Unreachable => tr!(Unreachable),

                    // A completed try body jumps over its catch arm the
                    // same way a true arm jumps over its else arm.
                    Opcode::Br | Opcode::Else | Opcode::Catch | Opcode::CatchAll => {
                        pc = rec.v2() as usize;
                        continue 'dispatch;
                    }
                    Opcode::BrIf => {
                        if self.pop().u32() != 0 {
                            pc = rec.v2() as usize;
                            continue 'dispatch;
                        }
                    }
                    Opcode::BrTable => {
                        let num_targets = rec.v1();
                        let key = self.pop().u32().min(num_targets);
                        let target = ops[pc + 1 + key as usize];
                        pc = target.v2() as usize;
                        continue 'dispatch;
                    }
                    Opcode::If => {
                        if self.pop().u32() == 0 {
                            pc = rec.v2() as usize;
                            continue 'dispatch;
                        }
                    }
                    Opcode::End => {
                        self.store_result(operand_base, rec.v1(), rec.v2());
                    }
                    Opcode::Return => {
                        self.pop_call(rec.v1() as usize);
                        break 'dispatch;
                    }

                    Opcode::Call => {
                        self.call_stack.last_mut().unwrap().pc = pc + 1;
                        match t!(self.push_call_space(instance, rec.v1())) {
                            Disposition::Entered => break 'dispatch,
                            Disposition::Completed => {}
                        }
                    }
                    Opcode::CallIndirect => {
                        let table = t!(self.frame_table(instance, rec.v2()));
                        let key = self.pop().u32();
                        let func_index = {
                            let guard = self.runtime.table(table).read();
                            match guard.values.get(key as usize) {
                                Some(&v) => v,
                                None => tr!(UndefinedTableIndex),
                            }
                        };
                        if func_index == INVALID_INDEX {
                            tr!(UninitializedTableElement);
                        }
                        let binding =
                            match self.runtime.instance(instance).func_binding(func_index) {
                                Some(b) => b,
                                None => tr!(IndirectCallSignatureMismatch),
                            };
                        let matches = {
                            let declared = &module.signatures[rec.v1() as usize];
                            match self.runtime.binding_signature(binding) {
                                Some(sig) => sig == declared,
                                None => false,
                            }
                        };
                        if !matches {
                            tr!(IndirectCallSignatureMismatch);
                        }
                        self.call_stack.last_mut().unwrap().pc = pc + 1;
                        match t!(self.push_call_binding(binding)) {
                            Disposition::Entered => break 'dispatch,
                            Disposition::Completed => {}
                        }
                    }

                    Opcode::Drop => {
                        self.pop();
                    }
                    Opcode::Select => {
                        let cond = self.pop().u32();
                        let false_ = self.pop();
                        let true_ = self.pop();
                        t!(self.push(if cond != 0 { true_ } else { false_ }));
                    }

                    Opcode::GetLocal => {
                        let v = self.local(locals, rec.v1());
                        t!(self.push(v));
                    }
                    Opcode::SetLocal => {
                        let v = self.pop();
                        self.set_local(locals, rec.v1(), v);
                    }
                    Opcode::TeeLocal => {
                        let v = self.top();
                        self.set_local(locals, rec.v1(), v);
                    }
                    Opcode::GetGlobal => {
                        let arena = t!(self.frame_global(instance, rec.v1()));
                        t!(self.push(self.runtime.global(arena).get()));
                    }
                    Opcode::SetGlobal => {
                        let arena = t!(self.frame_global(instance, rec.v1()));
                        let v = self.pop();
                        self.runtime.global(arena).set(v);
                    }

                    Opcode::InterpGetStack => {
                        t!(self.push(Value::from_u32(self.user_stack_pointer)));
                    }
                    Opcode::InterpSetStack => {
                        let v = self.pop().u32();
                        if v < self.user_stack_guard {
                            tr!(UserStackExhausted);
                        }
                        self.user_stack_pointer = v;
                    }

                    Opcode::I32Const => t!(self.push(Value::from_u32(rec.v1()))),
                    Opcode::I64Const => t!(self.push(Value::from_u64(rec.value64()))),
                    Opcode::F32Const => t!(self.push(Value::from_u32(rec.v1()))),
                    Opcode::F64Const => t!(self.push(Value::from_u64(rec.value64()))),

                    Opcode::CurrentMemory => {
                        let arena = t!(self.frame_memory(instance, rec.v1()));
                        let pages = self.runtime.memory(arena).read().pages();
                        t!(self.push(Value::from_u32(pages)));
                    }
                    Opcode::GrowMemory => {
                        let arena = t!(self.frame_memory(instance, rec.v1()));
                        let grow = self.pop().u32();
                        let old = self.runtime.memory(arena).read().pages();
                        if self.grow_memory(arena, grow) {
                            t!(self.push(Value::from_u32(old)));
                        } else {
                            t!(self.push(Value::from_i32(-1)));
                        }
                    }

                    // Loads.
                    Opcode::I32Load => {
                        let b = t!(self.mem_load::<4>(instance, rec));
                        t!(self.push(Value::from_u32(u32::from_le_bytes(b))));
                    }
                    Opcode::I64Load => {
                        let b = t!(self.mem_load::<8>(instance, rec));
                        t!(self.push(Value::from_u64(u64::from_le_bytes(b))));
                    }
                    Opcode::F32Load => {
                        let b = t!(self.mem_load::<4>(instance, rec));
                        t!(self.push(Value::from_u32(u32::from_le_bytes(b))));
                    }
                    Opcode::F64Load => {
                        let b = t!(self.mem_load::<8>(instance, rec));
                        t!(self.push(Value::from_u64(u64::from_le_bytes(b))));
                    }
                    Opcode::I32Load8S => {
                        let b = t!(self.mem_load::<1>(instance, rec));
                        t!(self.push(Value::from_i32(b[0] as i8 as i32)));
                    }
                    Opcode::I32Load8U => {
                        let b = t!(self.mem_load::<1>(instance, rec));
                        t!(self.push(Value::from_u32(b[0] as u32)));
                    }
                    Opcode::I32Load16S => {
                        let b = t!(self.mem_load::<2>(instance, rec));
                        t!(self.push(Value::from_i32(i16::from_le_bytes(b) as i32)));
                    }
                    Opcode::I32Load16U => {
                        let b = t!(self.mem_load::<2>(instance, rec));
                        t!(self.push(Value::from_u32(u16::from_le_bytes(b) as u32)));
                    }
                    Opcode::I64Load8S => {
                        let b = t!(self.mem_load::<1>(instance, rec));
                        t!(self.push(Value::from_i64(b[0] as i8 as i64)));
                    }
                    Opcode::I64Load8U => {
                        let b = t!(self.mem_load::<1>(instance, rec));
                        t!(self.push(Value::from_u64(b[0] as u64)));
                    }
                    Opcode::I64Load16S => {
                        let b = t!(self.mem_load::<2>(instance, rec));
                        t!(self.push(Value::from_i64(i16::from_le_bytes(b) as i64)));
                    }
                    Opcode::I64Load16U => {
                        let b = t!(self.mem_load::<2>(instance, rec));
                        t!(self.push(Value::from_u64(u16::from_le_bytes(b) as u64)));
                    }
                    Opcode::I64Load32S => {
                        let b = t!(self.mem_load::<4>(instance, rec));
                        t!(self.push(Value::from_i64(i32::from_le_bytes(b) as i64)));
                    }
                    Opcode::I64Load32U => {
                        let b = t!(self.mem_load::<4>(instance, rec));
                        t!(self.push(Value::from_u64(u32::from_le_bytes(b) as u64)));
                    }

                    // Stores; the value is popped before the address.
                    Opcode::I32Store | Opcode::F32Store => {
                        let v = self.pop().u32();
                        t!(self.mem_store::<4>(instance, rec, v.to_le_bytes()));
                    }
                    Opcode::I64Store | Opcode::F64Store => {
                        let v = self.pop().u64();
                        t!(self.mem_store::<8>(instance, rec, v.to_le_bytes()));
                    }
                    Opcode::I32Store8 => {
                        let v = self.pop().u32() as u8;
                        t!(self.mem_store::<1>(instance, rec, [v]));
                    }
                    Opcode::I32Store16 => {
                        let v = self.pop().u32() as u16;
                        t!(self.mem_store::<2>(instance, rec, v.to_le_bytes()));
                    }
                    Opcode::I64Store8 => {
                        let v = self.pop().u64() as u8;
                        t!(self.mem_store::<1>(instance, rec, [v]));
                    }
                    Opcode::I64Store16 => {
                        let v = self.pop().u64() as u16;
                        t!(self.mem_store::<2>(instance, rec, v.to_le_bytes()));
                    }
                    Opcode::I64Store32 => {
                        let v = self.pop().u64() as u32;
                        t!(self.mem_store::<4>(instance, rec, v.to_le_bytes()));
                    }

                    // Atomics: natural alignment enforced at the access.
                    Opcode::I32AtomicLoad => {
                        let b = t!(self.atomic_load::<4>(instance, rec));
                        t!(self.push(Value::from_u32(u32::from_le_bytes(b))));
                    }
                    Opcode::I64AtomicLoad => {
                        let b = t!(self.atomic_load::<8>(instance, rec));
                        t!(self.push(Value::from_u64(u64::from_le_bytes(b))));
                    }
                    Opcode::I32AtomicLoad8U => {
                        let b = t!(self.atomic_load::<1>(instance, rec));
                        t!(self.push(Value::from_u32(b[0] as u32)));
                    }
                    Opcode::I32AtomicLoad16U => {
                        let b = t!(self.atomic_load::<2>(instance, rec));
                        t!(self.push(Value::from_u32(u16::from_le_bytes(b) as u32)));
                    }
                    Opcode::I64AtomicLoad8U => {
                        let b = t!(self.atomic_load::<1>(instance, rec));
                        t!(self.push(Value::from_u64(b[0] as u64)));
                    }
                    Opcode::I64AtomicLoad16U => {
                        let b = t!(self.atomic_load::<2>(instance, rec));
                        t!(self.push(Value::from_u64(u16::from_le_bytes(b) as u64)));
                    }
                    Opcode::I64AtomicLoad32U => {
                        let b = t!(self.atomic_load::<4>(instance, rec));
                        t!(self.push(Value::from_u64(u32::from_le_bytes(b) as u64)));
                    }
                    Opcode::I32AtomicStore => {
                        let v = self.pop().u32();
                        t!(self.atomic_store::<4>(instance, rec, v.to_le_bytes()));
                    }
                    Opcode::I64AtomicStore => {
                        let v = self.pop().u64();
                        t!(self.atomic_store::<8>(instance, rec, v.to_le_bytes()));
                    }
                    Opcode::I32AtomicStore8 => {
                        let v = self.pop().u32() as u8;
                        t!(self.atomic_store::<1>(instance, rec, [v]));
                    }
                    Opcode::I32AtomicStore16 => {
                        let v = self.pop().u32() as u16;
                        t!(self.atomic_store::<2>(instance, rec, v.to_le_bytes()));
                    }
                    Opcode::I64AtomicStore8 => {
                        let v = self.pop().u64() as u8;
                        t!(self.atomic_store::<1>(instance, rec, [v]));
                    }
                    Opcode::I64AtomicStore16 => {
                        let v = self.pop().u64() as u16;
                        t!(self.atomic_store::<2>(instance, rec, v.to_le_bytes()));
                    }
                    Opcode::I64AtomicStore32 => {
                        let v = self.pop().u64() as u32;
                        t!(self.atomic_store::<4>(instance, rec, v.to_le_bytes()));
                    }

                    Opcode::I32AtomicWait | Opcode::I64AtomicWait | Opcode::AtomicWake => {
                        tr!(Unreachable);
                    }

                    // i32 arithmetic.
                    Opcode::I32Add => bin!(u32, from_u32, |l: u32, r: u32| l.wrapping_add(r)),
                    Opcode::I32Sub => bin!(u32, from_u32, |l: u32, r: u32| l.wrapping_sub(r)),
                    Opcode::I32Mul => bin!(u32, from_u32, |l: u32, r: u32| l.wrapping_mul(r)),
                    Opcode::I32DivS => {
                        let r = self.pop().i32();
                        let l = self.pop().i32();
                        if r == 0 {
                            tr!(IntegerDivideByZero);
                        }
                        if l == i32::MIN && r == -1 {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_i32(l.wrapping_div(r))));
                    }
                    Opcode::I32DivU => {
                        let r = self.pop().u32();
                        let l = self.pop().u32();
                        if r == 0 {
                            tr!(IntegerDivideByZero);
                        }
                        t!(self.push(Value::from_u32(l / r)));
                    }
                    Opcode::I32RemS => {
                        let r = self.pop().i32();
                        let l = self.pop().i32();
                        if r == 0 {
                            tr!(IntegerDivideByZero);
                        }
                        t!(self.push(Value::from_i32(l.wrapping_rem(r))));
                    }
                    Opcode::I32RemU => {
                        let r = self.pop().u32();
                        let l = self.pop().u32();
                        if r == 0 {
                            tr!(IntegerDivideByZero);
                        }
                        t!(self.push(Value::from_u32(l % r)));
                    }
                    Opcode::I32And => bin!(u32, from_u32, |l: u32, r: u32| l & r),
                    Opcode::I32Or => bin!(u32, from_u32, |l: u32, r: u32| l | r),
                    Opcode::I32Xor => bin!(u32, from_u32, |l: u32, r: u32| l ^ r),
                    Opcode::I32Shl => bin!(u32, from_u32, |l: u32, r: u32| l.wrapping_shl(r)),
                    Opcode::I32ShrU => bin!(u32, from_u32, |l: u32, r: u32| l.wrapping_shr(r)),
                    Opcode::I32ShrS => {
                        bin!(i32, from_i32, |l: i32, r: i32| l.wrapping_shr(r as u32))
                    }
                    Opcode::I32Rotl => bin!(u32, from_u32, |l: u32, r: u32| l.rotate_left(r & 31)),
                    Opcode::I32Rotr => bin!(u32, from_u32, |l: u32, r: u32| l.rotate_right(r & 31)),
                    Opcode::I32Clz => un!(u32, from_u32, |v: u32| v.leading_zeros()),
                    Opcode::I32Ctz => un!(u32, from_u32, |v: u32| v.trailing_zeros()),
                    Opcode::I32Popcnt => un!(u32, from_u32, |v: u32| v.count_ones()),
                    Opcode::I32Eqz => un!(u32, from_u32, |v: u32| (v == 0) as u32),
                    Opcode::I32Eq => cmp!(u32, |l, r| l == r),
                    Opcode::I32Ne => cmp!(u32, |l, r| l != r),
                    Opcode::I32LtS => cmp!(i32, |l, r| l < r),
                    Opcode::I32LtU => cmp!(u32, |l, r| l < r),
                    Opcode::I32GtS => cmp!(i32, |l, r| l > r),
                    Opcode::I32GtU => cmp!(u32, |l, r| l > r),
                    Opcode::I32LeS => cmp!(i32, |l, r| l <= r),
                    Opcode::I32LeU => cmp!(u32, |l, r| l <= r),
                    Opcode::I32GeS => cmp!(i32, |l, r| l >= r),
                    Opcode::I32GeU => cmp!(u32, |l, r| l >= r),

                    // i64 arithmetic.
                    Opcode::I64Add => bin!(u64, from_u64, |l: u64, r: u64| l.wrapping_add(r)),
                    Opcode::I64Sub => bin!(u64, from_u64, |l: u64, r: u64| l.wrapping_sub(r)),
                    Opcode::I64Mul => bin!(u64, from_u64, |l: u64, r: u64| l.wrapping_mul(r)),
                    Opcode::I64DivS => {
                        let r = self.pop().i64();
                        let l = self.pop().i64();
                        if r == 0 {
                            tr!(IntegerDivideByZero);
                        }
                        if l == i64::MIN && r == -1 {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_i64(l.wrapping_div(r))));
                    }
                    Opcode::I64DivU => {
                        let r = self.pop().u64();
                        let l = self.pop().u64();
                        if r == 0 {
                            tr!(IntegerDivideByZero);
                        }
                        t!(self.push(Value::from_u64(l / r)));
                    }
                    Opcode::I64RemS => {
                        let r = self.pop().i64();
                        let l = self.pop().i64();
                        if r == 0 {
                            tr!(IntegerDivideByZero);
                        }
                        t!(self.push(Value::from_i64(l.wrapping_rem(r))));
                    }
                    Opcode::I64RemU => {
                        let r = self.pop().u64();
                        let l = self.pop().u64();
                        if r == 0 {
                            tr!(IntegerDivideByZero);
                        }
                        t!(self.push(Value::from_u64(l % r)));
                    }
                    Opcode::I64And => bin!(u64, from_u64, |l: u64, r: u64| l & r),
                    Opcode::I64Or => bin!(u64, from_u64, |l: u64, r: u64| l | r),
                    Opcode::I64Xor => bin!(u64, from_u64, |l: u64, r: u64| l ^ r),
                    Opcode::I64Shl => {
                        bin!(u64, from_u64, |l: u64, r: u64| l.wrapping_shl(r as u32))
                    }
                    Opcode::I64ShrU => {
                        bin!(u64, from_u64, |l: u64, r: u64| l.wrapping_shr(r as u32))
                    }
                    Opcode::I64ShrS => {
                        bin!(i64, from_i64, |l: i64, r: i64| l.wrapping_shr(r as u32))
                    }
                    Opcode::I64Rotl => {
                        bin!(u64, from_u64, |l: u64, r: u64| l.rotate_left(r as u32 & 63))
                    }
                    Opcode::I64Rotr => {
                        bin!(u64, from_u64, |l: u64, r: u64| l.rotate_right(r as u32 & 63))
                    }
                    Opcode::I64Clz => un!(u64, from_u64, |v: u64| v.leading_zeros() as u64),
                    Opcode::I64Ctz => un!(u64, from_u64, |v: u64| v.trailing_zeros() as u64),
                    Opcode::I64Popcnt => un!(u64, from_u64, |v: u64| v.count_ones() as u64),
                    Opcode::I64Eqz => un!(u64, from_u32, |v: u64| (v == 0) as u32),
                    Opcode::I64Eq => cmp!(u64, |l, r| l == r),
                    Opcode::I64Ne => cmp!(u64, |l, r| l != r),
                    Opcode::I64LtS => cmp!(i64, |l, r| l < r),
                    Opcode::I64LtU => cmp!(u64, |l, r| l < r),
                    Opcode::I64GtS => cmp!(i64, |l, r| l > r),
                    Opcode::I64GtU => cmp!(u64, |l, r| l > r),
                    Opcode::I64LeS => cmp!(i64, |l, r| l <= r),
                    Opcode::I64LeU => cmp!(u64, |l, r| l <= r),
                    Opcode::I64GeS => cmp!(i64, |l, r| l >= r),
                    Opcode::I64GeU => cmp!(u64, |l, r| l >= r),

                    // f32 arithmetic.
                    Opcode::F32Add => fbin32!(|l: f32, r: f32| l + r),
                    Opcode::F32Sub => fbin32!(|l: f32, r: f32| l - r),
                    Opcode::F32Mul => fbin32!(|l: f32, r: f32| l * r),
                    Opcode::F32Div => bin!(f32_bits, from_u32, numeric::div_f32),
                    Opcode::F32Min => bin!(f32_bits, from_u32, numeric::min_f32),
                    Opcode::F32Max => bin!(f32_bits, from_u32, numeric::max_f32),
                    Opcode::F32Abs => {
                        un!(f32_bits, from_u32, |v: u32| v & !f32b::SIGN_MASK)
                    }
                    Opcode::F32Neg => un!(f32_bits, from_u32, |v: u32| v ^ f32b::SIGN_MASK),
                    Opcode::F32Copysign => bin!(f32_bits, from_u32, |l: u32, r: u32| {
                        (l & !f32b::SIGN_MASK) | (r & f32b::SIGN_MASK)
                    }),
                    Opcode::F32Ceil => fun32!(|v: f32| v.ceil()),
                    Opcode::F32Floor => fun32!(|v: f32| v.floor()),
                    Opcode::F32Trunc => fun32!(|v: f32| v.trunc()),
                    Opcode::F32Nearest => un!(f32_bits, from_u32, numeric::nearest_f32),
                    Opcode::F32Sqrt => fun32!(|v: f32| v.sqrt()),
                    Opcode::F32Eq => cmp!(f32, |l, r| l == r),
                    Opcode::F32Ne => cmp!(f32, |l, r| l != r),
                    Opcode::F32Lt => cmp!(f32, |l, r| l < r),
                    Opcode::F32Le => cmp!(f32, |l, r| l <= r),
                    Opcode::F32Gt => cmp!(f32, |l, r| l > r),
                    Opcode::F32Ge => cmp!(f32, |l, r| l >= r),

                    // f64 arithmetic.
                    Opcode::F64Add => fbin64!(|l: f64, r: f64| l + r),
                    Opcode::F64Sub => fbin64!(|l: f64, r: f64| l - r),
                    Opcode::F64Mul => fbin64!(|l: f64, r: f64| l * r),
                    Opcode::F64Div => bin!(f64_bits, from_u64, numeric::div_f64),
                    Opcode::F64Min => bin!(f64_bits, from_u64, numeric::min_f64),
                    Opcode::F64Max => bin!(f64_bits, from_u64, numeric::max_f64),
                    Opcode::F64Abs => {
                        un!(f64_bits, from_u64, |v: u64| v & !f64b::SIGN_MASK)
                    }
                    Opcode::F64Neg => un!(f64_bits, from_u64, |v: u64| v ^ f64b::SIGN_MASK),
                    Opcode::F64Copysign => bin!(f64_bits, from_u64, |l: u64, r: u64| {
                        (l & !f64b::SIGN_MASK) | (r & f64b::SIGN_MASK)
                    }),
                    Opcode::F64Ceil => fun64!(|v: f64| v.ceil()),
                    Opcode::F64Floor => fun64!(|v: f64| v.floor()),
                    Opcode::F64Trunc => fun64!(|v: f64| v.trunc()),
                    Opcode::F64Nearest => un!(f64_bits, from_u64, numeric::nearest_f64),
                    Opcode::F64Sqrt => fun64!(|v: f64| v.sqrt()),
                    Opcode::F64Eq => cmp!(f64, |l, r| l == r),
                    Opcode::F64Ne => cmp!(f64, |l, r| l != r),
                    Opcode::F64Lt => cmp!(f64, |l, r| l < r),
                    Opcode::F64Le => cmp!(f64, |l, r| l <= r),
                    Opcode::F64Gt => cmp!(f64, |l, r| l > r),
                    Opcode::F64Ge => cmp!(f64, |l, r| l >= r),

                    // Trapping float-to-int conversions.
                    Opcode::I32TruncSF32 => {
                        let b = self.pop().f32_bits();
                        if f32b::is_nan(b) {
                            tr!(InvalidConversionToInteger);
                        }
                        if !numeric::in_range_i32_f32(b) {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_i32(f32::from_bits(b) as i32)));
                    }
                    Opcode::I32TruncUF32 => {
                        let b = self.pop().f32_bits();
                        if f32b::is_nan(b) {
                            tr!(InvalidConversionToInteger);
                        }
                        if !numeric::in_range_u32_f32(b) {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_u32(f32::from_bits(b) as u32)));
                    }
                    Opcode::I32TruncSF64 => {
                        let b = self.pop().f64_bits();
                        if f64b::is_nan(b) {
                            tr!(InvalidConversionToInteger);
                        }
                        if !numeric::in_range_i32_f64(b) {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_i32(f64::from_bits(b) as i32)));
                    }
                    Opcode::I32TruncUF64 => {
                        let b = self.pop().f64_bits();
                        if f64b::is_nan(b) {
                            tr!(InvalidConversionToInteger);
                        }
                        if !numeric::in_range_u32_f64(b) {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_u32(f64::from_bits(b) as u32)));
                    }
                    Opcode::I64TruncSF32 => {
                        let b = self.pop().f32_bits();
                        if f32b::is_nan(b) {
                            tr!(InvalidConversionToInteger);
                        }
                        if !numeric::in_range_i64_f32(b) {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_i64(f32::from_bits(b) as i64)));
                    }
                    Opcode::I64TruncUF32 => {
                        let b = self.pop().f32_bits();
                        if f32b::is_nan(b) {
                            tr!(InvalidConversionToInteger);
                        }
                        if !numeric::in_range_u64_f32(b) {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_u64(f32::from_bits(b) as u64)));
                    }
                    Opcode::I64TruncSF64 => {
                        let b = self.pop().f64_bits();
                        if f64b::is_nan(b) {
                            tr!(InvalidConversionToInteger);
                        }
                        if !numeric::in_range_i64_f64(b) {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_i64(f64::from_bits(b) as i64)));
                    }
                    Opcode::I64TruncUF64 => {
                        let b = self.pop().f64_bits();
                        if f64b::is_nan(b) {
                            tr!(InvalidConversionToInteger);
                        }
                        if !numeric::in_range_u64_f64(b) {
                            tr!(IntegerOverflow);
                        }
                        t!(self.push(Value::from_u64(f64::from_bits(b) as u64)));
                    }

                    // Saturating variants: NaN to 0, out-of-range clamped.
                    Opcode::I32TruncSSatF32 => un!(f32, from_i32, |v: f32| v as i32),
                    Opcode::I32TruncUSatF32 => un!(f32, from_u32, |v: f32| v as u32),
                    Opcode::I32TruncSSatF64 => un!(f64, from_i32, |v: f64| v as i32),
                    Opcode::I32TruncUSatF64 => un!(f64, from_u32, |v: f64| v as u32),
                    Opcode::I64TruncSSatF32 => un!(f32, from_i64, |v: f32| v as i64),
                    Opcode::I64TruncUSatF32 => un!(f32, from_u64, |v: f32| v as u64),
                    Opcode::I64TruncSSatF64 => un!(f64, from_i64, |v: f64| v as i64),
                    Opcode::I64TruncUSatF64 => un!(f64, from_u64, |v: f64| v as u64),

                    // Other conversions.
                    Opcode::I32WrapI64 => un!(u64, from_u32, |v: u64| v as u32),
                    Opcode::I64ExtendSI32 => un!(i32, from_i64, |v: i32| v as i64),
                    Opcode::I64ExtendUI32 => un!(u32, from_u64, |v: u32| v as u64),
                    Opcode::F32ConvertSI32 => un!(i32, from_f32, |v: i32| v as f32),
                    Opcode::F32ConvertUI32 => un!(u32, from_f32, |v: u32| v as f32),
                    Opcode::F32ConvertSI64 => un!(i64, from_f32, |v: i64| v as f32),
                    Opcode::F32ConvertUI64 => un!(u64, from_f32, |v: u64| v as f32),
                    Opcode::F64ConvertSI32 => un!(i32, from_f64, |v: i32| v as f64),
                    Opcode::F64ConvertUI32 => un!(u32, from_f64, |v: u32| v as f64),
                    Opcode::F64ConvertSI64 => un!(i64, from_f64, |v: i64| v as f64),
                    Opcode::F64ConvertUI64 => un!(u64, from_f64, |v: u64| v as f64),
                    Opcode::F32DemoteF64 => un!(f64_bits, from_u32, numeric::demote),
                    Opcode::F64PromoteF32 => {
                        un!(f32_bits, from_u64, |v: u32| {
                            if f32b::is_nan(v) {
                                // Widen the payload, keep the quiet bit set.
                                let sign = ((v & f32b::SIGN_MASK) as u64) << 32;
                                let sig = ((v & f32b::SIG_MASK) as u64)
                                    << (f64b::SIG_BITS - f32b::SIG_BITS);
                                sign | f64b::INF | f64b::QUIET_NAN_BIT | sig
                            } else {
                                (f32::from_bits(v) as f64).to_bits()
                            }
                        })
                    }
                    Opcode::I32ReinterpretF32
                    | Opcode::F32ReinterpretI32
                    | Opcode::I64ReinterpretF64
                    | Opcode::F64ReinterpretI64 => {
                        let v = self.pop();
                        t!(self.push(v));
                    }

                    Opcode::I32Extend8S => un!(u32, from_i32, |v: u32| v as u8 as i8 as i32),
                    Opcode::I32Extend16S => un!(u32, from_i32, |v: u32| v as u16 as i16 as i32),
                    Opcode::I64Extend8S => un!(u64, from_i64, |v: u64| v as u8 as i8 as i64),
                    Opcode::I64Extend16S => un!(u64, from_i64, |v: u64| v as u16 as i16 as i64),
                    Opcode::I64Extend32S => un!(u64, from_i64, |v: u64| v as u32 as i32 as i64),

                    // Decode-only exception opcodes trap if ever executed.
                    Opcode::Throw | Opcode::Rethrow => {
                        tr!(Unreachable);
                    }

                    op if op.atomic_rmw_width().is_some() => {
                        t!(self.atomic_rmw(instance, rec));
                    }
                    op if op.atomic_cmpxchg_width().is_some() => {
                        t!(self.atomic_cmpxchg(instance, rec));
                    }

                    // Never emitted by the decoder.
                    Opcode::Block | Opcode::Loop | Opcode::Try => tr!(Unreachable),

                    _ => tr!(Unreachable),
                }
                pc += 1;
            }
        }
        Ok(())
    }
}
