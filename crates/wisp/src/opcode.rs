//! The opcode set: wire decoding, mnemonics and feature gating.
//!
//! `InterpGetStack`/`InterpSetStack` have no wire encoding; the decoder
//! synthesizes them when the stack-pointer feature rewrites accesses to the
//! shadow-stack-pointer global.

use crate::types::Features;

/// Secondary opcode namespaces.
pub const MISC_PREFIX: u8 = 0xfc;
pub const ATOMIC_PREFIX: u8 = 0xfe;

/// The read-modify-write operations the atomic opcodes perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RmwKind {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Control
    Unreachable,
    Nop,
    Block,
    Loop,
    If,
    Else,
    Try,
    Catch,
    Throw,
    Rethrow,
    CatchAll,
    End,
    Br,
    BrIf,
    BrTable,
    Return,
    Call,
    CallIndirect,

    // Parametric
    Drop,
    Select,

    // Variables
    GetLocal,
    SetLocal,
    TeeLocal,
    GetGlobal,
    SetGlobal,

    // Memory
    I32Load,
    I64Load,
    F32Load,
    F64Load,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I64Load8S,
    I64Load8U,
    I64Load16S,
    I64Load16U,
    I64Load32S,
    I64Load32U,
    I32Store,
    I64Store,
    F32Store,
    F64Store,
    I32Store8,
    I32Store16,
    I64Store8,
    I64Store16,
    I64Store32,
    CurrentMemory,
    GrowMemory,

    // Constants
    I32Const,
    I64Const,
    F32Const,
    F64Const,

    // i32 comparison
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // i64 comparison
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // f32 comparison
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,

    // f64 comparison
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // i32 arithmetic
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    // i64 arithmetic
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // f32 arithmetic
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    // f64 arithmetic
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversions
    I32WrapI64,
    I32TruncSF32,
    I32TruncUF32,
    I32TruncSF64,
    I32TruncUF64,
    I64ExtendSI32,
    I64ExtendUI32,
    I64TruncSF32,
    I64TruncUF32,
    I64TruncSF64,
    I64TruncUF64,
    F32ConvertSI32,
    F32ConvertUI32,
    F32ConvertSI64,
    F32ConvertUI64,
    F32DemoteF64,
    F64ConvertSI32,
    F64ConvertUI32,
    F64ConvertSI64,
    F64ConvertUI64,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    // Sign extension
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    // Saturating truncation (0xfc prefix)
    I32TruncSSatF32,
    I32TruncUSatF32,
    I32TruncSSatF64,
    I32TruncUSatF64,
    I64TruncSSatF32,
    I64TruncUSatF32,
    I64TruncSSatF64,
    I64TruncUSatF64,

    // Atomics (0xfe prefix)
    AtomicWake,
    I32AtomicWait,
    I64AtomicWait,
    I32AtomicLoad,
    I64AtomicLoad,
    I32AtomicLoad8U,
    I32AtomicLoad16U,
    I64AtomicLoad8U,
    I64AtomicLoad16U,
    I64AtomicLoad32U,
    I32AtomicStore,
    I64AtomicStore,
    I32AtomicStore8,
    I32AtomicStore16,
    I64AtomicStore8,
    I64AtomicStore16,
    I64AtomicStore32,
    I32AtomicRmwAdd,
    I64AtomicRmwAdd,
    I32AtomicRmw8UAdd,
    I32AtomicRmw16UAdd,
    I64AtomicRmw8UAdd,
    I64AtomicRmw16UAdd,
    I64AtomicRmw32UAdd,
    I32AtomicRmwSub,
    I64AtomicRmwSub,
    I32AtomicRmw8USub,
    I32AtomicRmw16USub,
    I64AtomicRmw8USub,
    I64AtomicRmw16USub,
    I64AtomicRmw32USub,
    I32AtomicRmwAnd,
    I64AtomicRmwAnd,
    I32AtomicRmw8UAnd,
    I32AtomicRmw16UAnd,
    I64AtomicRmw8UAnd,
    I64AtomicRmw16UAnd,
    I64AtomicRmw32UAnd,
    I32AtomicRmwOr,
    I64AtomicRmwOr,
    I32AtomicRmw8UOr,
    I32AtomicRmw16UOr,
    I64AtomicRmw8UOr,
    I64AtomicRmw16UOr,
    I64AtomicRmw32UOr,
    I32AtomicRmwXor,
    I64AtomicRmwXor,
    I32AtomicRmw8UXor,
    I32AtomicRmw16UXor,
    I64AtomicRmw8UXor,
    I64AtomicRmw16UXor,
    I64AtomicRmw32UXor,
    I32AtomicRmwXchg,
    I64AtomicRmwXchg,
    I32AtomicRmw8UXchg,
    I32AtomicRmw16UXchg,
    I64AtomicRmw8UXchg,
    I64AtomicRmw16UXchg,
    I64AtomicRmw32UXchg,
    I32AtomicRmwCmpxchg,
    I64AtomicRmwCmpxchg,
    I32AtomicRmw8UCmpxchg,
    I32AtomicRmw16UCmpxchg,
    I64AtomicRmw8UCmpxchg,
    I64AtomicRmw16UCmpxchg,
    I64AtomicRmw32UCmpxchg,

    // Interpreter intrinsics, synthesized at decode time.
    InterpGetStack,
    InterpSetStack,
}

impl Opcode {
    /// Decode a one-byte opcode from the main namespace.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => Unreachable,
            0x01 => Nop,
            0x02 => Block,
            0x03 => Loop,
            0x04 => If,
            0x05 => Else,
            0x06 => Try,
            0x07 => Catch,
            0x08 => Throw,
            0x09 => Rethrow,
            0x0a => CatchAll,
            0x0b => End,
            0x0c => Br,
            0x0d => BrIf,
            0x0e => BrTable,
            0x0f => Return,
            0x10 => Call,
            0x11 => CallIndirect,
            0x1a => Drop,
            0x1b => Select,
            0x20 => GetLocal,
            0x21 => SetLocal,
            0x22 => TeeLocal,
            0x23 => GetGlobal,
            0x24 => SetGlobal,
            0x28 => I32Load,
            0x29 => I64Load,
            0x2a => F32Load,
            0x2b => F64Load,
            0x2c => I32Load8S,
            0x2d => I32Load8U,
            0x2e => I32Load16S,
            0x2f => I32Load16U,
            0x30 => I64Load8S,
            0x31 => I64Load8U,
            0x32 => I64Load16S,
            0x33 => I64Load16U,
            0x34 => I64Load32S,
            0x35 => I64Load32U,
            0x36 => I32Store,
            0x37 => I64Store,
            0x38 => F32Store,
            0x39 => F64Store,
            0x3a => I32Store8,
            0x3b => I32Store16,
            0x3c => I64Store8,
            0x3d => I64Store16,
            0x3e => I64Store32,
            0x3f => CurrentMemory,
            0x40 => GrowMemory,
            0x41 => I32Const,
            0x42 => I64Const,
            0x43 => F32Const,
            0x44 => F64Const,
            0x45 => I32Eqz,
            0x46 => I32Eq,
            0x47 => I32Ne,
            0x48 => I32LtS,
            0x49 => I32LtU,
            0x4a => I32GtS,
            0x4b => I32GtU,
            0x4c => I32LeS,
            0x4d => I32LeU,
            0x4e => I32GeS,
            0x4f => I32GeU,
            0x50 => I64Eqz,
            0x51 => I64Eq,
            0x52 => I64Ne,
            0x53 => I64LtS,
            0x54 => I64LtU,
            0x55 => I64GtS,
            0x56 => I64GtU,
            0x57 => I64LeS,
            0x58 => I64LeU,
            0x59 => I64GeS,
            0x5a => I64GeU,
            0x5b => F32Eq,
            0x5c => F32Ne,
            0x5d => F32Lt,
            0x5e => F32Gt,
            0x5f => F32Le,
            0x60 => F32Ge,
            0x61 => F64Eq,
            0x62 => F64Ne,
            0x63 => F64Lt,
            0x64 => F64Gt,
            0x65 => F64Le,
            0x66 => F64Ge,
            0x67 => I32Clz,
            0x68 => I32Ctz,
            0x69 => I32Popcnt,
            0x6a => I32Add,
            0x6b => I32Sub,
            0x6c => I32Mul,
            0x6d => I32DivS,
            0x6e => I32DivU,
            0x6f => I32RemS,
            0x70 => I32RemU,
            0x71 => I32And,
            0x72 => I32Or,
            0x73 => I32Xor,
            0x74 => I32Shl,
            0x75 => I32ShrS,
            0x76 => I32ShrU,
            0x77 => I32Rotl,
            0x78 => I32Rotr,
            0x79 => I64Clz,
            0x7a => I64Ctz,
            0x7b => I64Popcnt,
            0x7c => I64Add,
            0x7d => I64Sub,
            0x7e => I64Mul,
            0x7f => I64DivS,
            0x80 => I64DivU,
            0x81 => I64RemS,
            0x82 => I64RemU,
            0x83 => I64And,
            0x84 => I64Or,
            0x85 => I64Xor,
            0x86 => I64Shl,
            0x87 => I64ShrS,
            0x88 => I64ShrU,
            0x89 => I64Rotl,
            0x8a => I64Rotr,
            0x8b => F32Abs,
            0x8c => F32Neg,
            0x8d => F32Ceil,
            0x8e => F32Floor,
            0x8f => F32Trunc,
            0x90 => F32Nearest,
            0x91 => F32Sqrt,
            0x92 => F32Add,
            0x93 => F32Sub,
            0x94 => F32Mul,
            0x95 => F32Div,
            0x96 => F32Min,
            0x97 => F32Max,
            0x98 => F32Copysign,
            0x99 => F64Abs,
            0x9a => F64Neg,
            0x9b => F64Ceil,
            0x9c => F64Floor,
            0x9d => F64Trunc,
            0x9e => F64Nearest,
            0x9f => F64Sqrt,
            0xa0 => F64Add,
            0xa1 => F64Sub,
            0xa2 => F64Mul,
            0xa3 => F64Div,
            0xa4 => F64Min,
            0xa5 => F64Max,
            0xa6 => F64Copysign,
            0xa7 => I32WrapI64,
            0xa8 => I32TruncSF32,
            0xa9 => I32TruncUF32,
            0xaa => I32TruncSF64,
            0xab => I32TruncUF64,
            0xac => I64ExtendSI32,
            0xad => I64ExtendUI32,
            0xae => I64TruncSF32,
            0xaf => I64TruncUF32,
            0xb0 => I64TruncSF64,
            0xb1 => I64TruncUF64,
            0xb2 => F32ConvertSI32,
            0xb3 => F32ConvertUI32,
            0xb4 => F32ConvertSI64,
            0xb5 => F32ConvertUI64,
            0xb6 => F32DemoteF64,
            0xb7 => F64ConvertSI32,
            0xb8 => F64ConvertUI32,
            0xb9 => F64ConvertSI64,
            0xba => F64ConvertUI64,
            0xbb => F64PromoteF32,
            0xbc => I32ReinterpretF32,
            0xbd => I64ReinterpretF64,
            0xbe => F32ReinterpretI32,
            0xbf => F64ReinterpretI64,
            0xc0 => I32Extend8S,
            0xc1 => I32Extend16S,
            0xc2 => I64Extend8S,
            0xc3 => I64Extend16S,
            0xc4 => I64Extend32S,
            _ => return None,
        })
    }

    /// Decode the second byte of a 0xfc-prefixed opcode.
    pub fn from_misc(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => I32TruncSSatF32,
            0x01 => I32TruncUSatF32,
            0x02 => I32TruncSSatF64,
            0x03 => I32TruncUSatF64,
            0x04 => I64TruncSSatF32,
            0x05 => I64TruncUSatF32,
            0x06 => I64TruncSSatF64,
            0x07 => I64TruncUSatF64,
            _ => return None,
        })
    }

    /// Decode the second byte of a 0xfe-prefixed opcode.
    pub fn from_atomic(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => AtomicWake,
            0x01 => I32AtomicWait,
            0x02 => I64AtomicWait,
            0x10 => I32AtomicLoad,
            0x11 => I64AtomicLoad,
            0x12 => I32AtomicLoad8U,
            0x13 => I32AtomicLoad16U,
            0x14 => I64AtomicLoad8U,
            0x15 => I64AtomicLoad16U,
            0x16 => I64AtomicLoad32U,
            0x17 => I32AtomicStore,
            0x18 => I64AtomicStore,
            0x19 => I32AtomicStore8,
            0x1a => I32AtomicStore16,
            0x1b => I64AtomicStore8,
            0x1c => I64AtomicStore16,
            0x1d => I64AtomicStore32,
            0x1e => I32AtomicRmwAdd,
            0x1f => I64AtomicRmwAdd,
            0x20 => I32AtomicRmw8UAdd,
            0x21 => I32AtomicRmw16UAdd,
            0x22 => I64AtomicRmw8UAdd,
            0x23 => I64AtomicRmw16UAdd,
            0x24 => I64AtomicRmw32UAdd,
            0x25 => I32AtomicRmwSub,
            0x26 => I64AtomicRmwSub,
            0x27 => I32AtomicRmw8USub,
            0x28 => I32AtomicRmw16USub,
            0x29 => I64AtomicRmw8USub,
            0x2a => I64AtomicRmw16USub,
            0x2b => I64AtomicRmw32USub,
            0x2c => I32AtomicRmwAnd,
            0x2d => I64AtomicRmwAnd,
            0x2e => I32AtomicRmw8UAnd,
            0x2f => I32AtomicRmw16UAnd,
            0x30 => I64AtomicRmw8UAnd,
            0x31 => I64AtomicRmw16UAnd,
            0x32 => I64AtomicRmw32UAnd,
            0x33 => I32AtomicRmwOr,
            0x34 => I64AtomicRmwOr,
            0x35 => I32AtomicRmw8UOr,
            0x36 => I32AtomicRmw16UOr,
            0x37 => I64AtomicRmw8UOr,
            0x38 => I64AtomicRmw16UOr,
            0x39 => I64AtomicRmw32UOr,
            0x3a => I32AtomicRmwXor,
            0x3b => I64AtomicRmwXor,
            0x3c => I32AtomicRmw8UXor,
            0x3d => I32AtomicRmw16UXor,
            0x3e => I64AtomicRmw8UXor,
            0x3f => I64AtomicRmw16UXor,
            0x40 => I64AtomicRmw32UXor,
            0x41 => I32AtomicRmwXchg,
            0x42 => I64AtomicRmwXchg,
            0x43 => I32AtomicRmw8UXchg,
            0x44 => I32AtomicRmw16UXchg,
            0x45 => I64AtomicRmw8UXchg,
            0x46 => I64AtomicRmw16UXchg,
            0x47 => I64AtomicRmw32UXchg,
            0x48 => I32AtomicRmwCmpxchg,
            0x49 => I64AtomicRmwCmpxchg,
            0x4a => I32AtomicRmw8UCmpxchg,
            0x4b => I32AtomicRmw16UCmpxchg,
            0x4c => I64AtomicRmw8UCmpxchg,
            0x4d => I64AtomicRmw16UCmpxchg,
            0x4e => I64AtomicRmw32UCmpxchg,
            _ => return None,
        })
    }

    /// Which feature, if any, must be enabled for the decoder to accept
    /// this opcode.
    pub fn enabled(self, features: &Features) -> bool {
        use Opcode::*;
        match self {
            Try | Catch | Throw | Rethrow | CatchAll => features.exceptions,
            I32TruncSSatF32 | I32TruncUSatF32 | I32TruncSSatF64 | I32TruncUSatF64
            | I64TruncSSatF32 | I64TruncUSatF32 | I64TruncSSatF64 | I64TruncUSatF64 => {
                features.sat_float_to_int
            }
            InterpGetStack | InterpSetStack => features.stack_pointer,
            other => {
                if other.is_atomic() {
                    features.threads
                } else {
                    true
                }
            }
        }
    }

    pub fn is_atomic(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            AtomicWake
                | I32AtomicWait
                | I64AtomicWait
                | I32AtomicLoad
                | I64AtomicLoad
                | I32AtomicLoad8U
                | I32AtomicLoad16U
                | I64AtomicLoad8U
                | I64AtomicLoad16U
                | I64AtomicLoad32U
                | I32AtomicStore
                | I64AtomicStore
                | I32AtomicStore8
                | I32AtomicStore16
                | I64AtomicStore8
                | I64AtomicStore16
                | I64AtomicStore32
        ) || self.atomic_rmw_width().is_some()
            || self.atomic_cmpxchg_width().is_some()
    }

    /// Access width in bytes for atomic RMW ops (except cmpxchg).
    pub(crate) fn atomic_rmw_width(self) -> Option<u32> {
        use Opcode::*;
        Some(match self {
            I32AtomicRmw8UAdd | I32AtomicRmw8USub | I32AtomicRmw8UAnd | I32AtomicRmw8UOr
            | I32AtomicRmw8UXor | I32AtomicRmw8UXchg | I64AtomicRmw8UAdd | I64AtomicRmw8USub
            | I64AtomicRmw8UAnd | I64AtomicRmw8UOr | I64AtomicRmw8UXor | I64AtomicRmw8UXchg => 1,
            I32AtomicRmw16UAdd | I32AtomicRmw16USub | I32AtomicRmw16UAnd | I32AtomicRmw16UOr
            | I32AtomicRmw16UXor | I32AtomicRmw16UXchg | I64AtomicRmw16UAdd
            | I64AtomicRmw16USub | I64AtomicRmw16UAnd | I64AtomicRmw16UOr | I64AtomicRmw16UXor
            | I64AtomicRmw16UXchg => 2,
            I32AtomicRmwAdd | I32AtomicRmwSub | I32AtomicRmwAnd | I32AtomicRmwOr
            | I32AtomicRmwXor | I32AtomicRmwXchg | I64AtomicRmw32UAdd | I64AtomicRmw32USub
            | I64AtomicRmw32UAnd | I64AtomicRmw32UOr | I64AtomicRmw32UXor | I64AtomicRmw32UXchg => 4,
            I64AtomicRmwAdd | I64AtomicRmwSub | I64AtomicRmwAnd | I64AtomicRmwOr
            | I64AtomicRmwXor | I64AtomicRmwXchg => 8,
            _ => return None,
        })
    }

    pub(crate) fn atomic_rmw_kind(self) -> Option<RmwKind> {
        use Opcode::*;
        Some(match self {
            I32AtomicRmwAdd | I64AtomicRmwAdd | I32AtomicRmw8UAdd | I32AtomicRmw16UAdd
            | I64AtomicRmw8UAdd | I64AtomicRmw16UAdd | I64AtomicRmw32UAdd => RmwKind::Add,
            I32AtomicRmwSub | I64AtomicRmwSub | I32AtomicRmw8USub | I32AtomicRmw16USub
            | I64AtomicRmw8USub | I64AtomicRmw16USub | I64AtomicRmw32USub => RmwKind::Sub,
            I32AtomicRmwAnd | I64AtomicRmwAnd | I32AtomicRmw8UAnd | I32AtomicRmw16UAnd
            | I64AtomicRmw8UAnd | I64AtomicRmw16UAnd | I64AtomicRmw32UAnd => RmwKind::And,
            I32AtomicRmwOr | I64AtomicRmwOr | I32AtomicRmw8UOr | I32AtomicRmw16UOr
            | I64AtomicRmw8UOr | I64AtomicRmw16UOr | I64AtomicRmw32UOr => RmwKind::Or,
            I32AtomicRmwXor | I64AtomicRmwXor | I32AtomicRmw8UXor | I32AtomicRmw16UXor
            | I64AtomicRmw8UXor | I64AtomicRmw16UXor | I64AtomicRmw32UXor => RmwKind::Xor,
            I32AtomicRmwXchg | I64AtomicRmwXchg | I32AtomicRmw8UXchg | I32AtomicRmw16UXchg
            | I64AtomicRmw8UXchg | I64AtomicRmw16UXchg | I64AtomicRmw32UXchg => RmwKind::Xchg,
            _ => return None,
        })
    }

    /// True when the atomic op works on the 64-bit stack type.
    pub(crate) fn atomic_is_64(self) -> bool {
        self.name().starts_with("i64")
    }

    pub(crate) fn atomic_cmpxchg_width(self) -> Option<u32> {
        use Opcode::*;
        Some(match self {
            I32AtomicRmw8UCmpxchg | I64AtomicRmw8UCmpxchg => 1,
            I32AtomicRmw16UCmpxchg | I64AtomicRmw16UCmpxchg => 2,
            I32AtomicRmwCmpxchg | I64AtomicRmw32UCmpxchg => 4,
            I64AtomicRmwCmpxchg => 8,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Unreachable => "unreachable",
            Nop => "nop",
            Block => "block",
            Loop => "loop",
            If => "if",
            Else => "else",
            Try => "try",
            Catch => "catch",
            Throw => "throw",
            Rethrow => "rethrow",
            CatchAll => "catch_all",
            End => "end",
            Br => "br",
            BrIf => "br_if",
            BrTable => "br_table",
            Return => "return",
            Call => "call",
            CallIndirect => "call_indirect",
            Drop => "drop",
            Select => "select",
            GetLocal => "get_local",
            SetLocal => "set_local",
            TeeLocal => "tee_local",
            GetGlobal => "get_global",
            SetGlobal => "set_global",
            I32Load => "i32.load",
            I64Load => "i64.load",
            F32Load => "f32.load",
            F64Load => "f64.load",
            I32Load8S => "i32.load8_s",
            I32Load8U => "i32.load8_u",
            I32Load16S => "i32.load16_s",
            I32Load16U => "i32.load16_u",
            I64Load8S => "i64.load8_s",
            I64Load8U => "i64.load8_u",
            I64Load16S => "i64.load16_s",
            I64Load16U => "i64.load16_u",
            I64Load32S => "i64.load32_s",
            I64Load32U => "i64.load32_u",
            I32Store => "i32.store",
            I64Store => "i64.store",
            F32Store => "f32.store",
            F64Store => "f64.store",
            I32Store8 => "i32.store8",
            I32Store16 => "i32.store16",
            I64Store8 => "i64.store8",
            I64Store16 => "i64.store16",
            I64Store32 => "i64.store32",
            CurrentMemory => "current_memory",
            GrowMemory => "grow_memory",
            I32Const => "i32.const",
            I64Const => "i64.const",
            F32Const => "f32.const",
            F64Const => "f64.const",
            I32Eqz => "i32.eqz",
            I32Eq => "i32.eq",
            I32Ne => "i32.ne",
            I32LtS => "i32.lt_s",
            I32LtU => "i32.lt_u",
            I32GtS => "i32.gt_s",
            I32GtU => "i32.gt_u",
            I32LeS => "i32.le_s",
            I32LeU => "i32.le_u",
            I32GeS => "i32.ge_s",
            I32GeU => "i32.ge_u",
            I64Eqz => "i64.eqz",
            I64Eq => "i64.eq",
            I64Ne => "i64.ne",
            I64LtS => "i64.lt_s",
            I64LtU => "i64.lt_u",
            I64GtS => "i64.gt_s",
            I64GtU => "i64.gt_u",
            I64LeS => "i64.le_s",
            I64LeU => "i64.le_u",
            I64GeS => "i64.ge_s",
            I64GeU => "i64.ge_u",
            F32Eq => "f32.eq",
            F32Ne => "f32.ne",
            F32Lt => "f32.lt",
            F32Gt => "f32.gt",
            F32Le => "f32.le",
            F32Ge => "f32.ge",
            F64Eq => "f64.eq",
            F64Ne => "f64.ne",
            F64Lt => "f64.lt",
            F64Gt => "f64.gt",
            F64Le => "f64.le",
            F64Ge => "f64.ge",
            I32Clz => "i32.clz",
            I32Ctz => "i32.ctz",
            I32Popcnt => "i32.popcnt",
            I32Add => "i32.add",
            I32Sub => "i32.sub",
            I32Mul => "i32.mul",
            I32DivS => "i32.div_s",
            I32DivU => "i32.div_u",
            I32RemS => "i32.rem_s",
            I32RemU => "i32.rem_u",
            I32And => "i32.and",
            I32Or => "i32.or",
            I32Xor => "i32.xor",
            I32Shl => "i32.shl",
            I32ShrS => "i32.shr_s",
            I32ShrU => "i32.shr_u",
            I32Rotl => "i32.rotl",
            I32Rotr => "i32.rotr",
            I64Clz => "i64.clz",
            I64Ctz => "i64.ctz",
            I64Popcnt => "i64.popcnt",
            I64Add => "i64.add",
            I64Sub => "i64.sub",
            I64Mul => "i64.mul",
            I64DivS => "i64.div_s",
            I64DivU => "i64.div_u",
            I64RemS => "i64.rem_s",
            I64RemU => "i64.rem_u",
            I64And => "i64.and",
            I64Or => "i64.or",
            I64Xor => "i64.xor",
            I64Shl => "i64.shl",
            I64ShrS => "i64.shr_s",
            I64ShrU => "i64.shr_u",
            I64Rotl => "i64.rotl",
            I64Rotr => "i64.rotr",
            F32Abs => "f32.abs",
            F32Neg => "f32.neg",
            F32Ceil => "f32.ceil",
            F32Floor => "f32.floor",
            F32Trunc => "f32.trunc",
            F32Nearest => "f32.nearest",
            F32Sqrt => "f32.sqrt",
            F32Add => "f32.add",
            F32Sub => "f32.sub",
            F32Mul => "f32.mul",
            F32Div => "f32.div",
            F32Min => "f32.min",
            F32Max => "f32.max",
            F32Copysign => "f32.copysign",
            F64Abs => "f64.abs",
            F64Neg => "f64.neg",
            F64Ceil => "f64.ceil",
            F64Floor => "f64.floor",
            F64Trunc => "f64.trunc",
            F64Nearest => "f64.nearest",
            F64Sqrt => "f64.sqrt",
            F64Add => "f64.add",
            F64Sub => "f64.sub",
            F64Mul => "f64.mul",
            F64Div => "f64.div",
            F64Min => "f64.min",
            F64Max => "f64.max",
            F64Copysign => "f64.copysign",
            I32WrapI64 => "i32.wrap/i64",
            I32TruncSF32 => "i32.trunc_s/f32",
            I32TruncUF32 => "i32.trunc_u/f32",
            I32TruncSF64 => "i32.trunc_s/f64",
            I32TruncUF64 => "i32.trunc_u/f64",
            I64ExtendSI32 => "i64.extend_s/i32",
            I64ExtendUI32 => "i64.extend_u/i32",
            I64TruncSF32 => "i64.trunc_s/f32",
            I64TruncUF32 => "i64.trunc_u/f32",
            I64TruncSF64 => "i64.trunc_s/f64",
            I64TruncUF64 => "i64.trunc_u/f64",
            F32ConvertSI32 => "f32.convert_s/i32",
            F32ConvertUI32 => "f32.convert_u/i32",
            F32ConvertSI64 => "f32.convert_s/i64",
            F32ConvertUI64 => "f32.convert_u/i64",
            F32DemoteF64 => "f32.demote/f64",
            F64ConvertSI32 => "f64.convert_s/i32",
            F64ConvertUI32 => "f64.convert_u/i32",
            F64ConvertSI64 => "f64.convert_s/i64",
            F64ConvertUI64 => "f64.convert_u/i64",
            F64PromoteF32 => "f64.promote/f32",
            I32ReinterpretF32 => "i32.reinterpret/f32",
            I64ReinterpretF64 => "i64.reinterpret/f64",
            F32ReinterpretI32 => "f32.reinterpret/i32",
            F64ReinterpretI64 => "f64.reinterpret/i64",
            I32Extend8S => "i32.extend8_s",
            I32Extend16S => "i32.extend16_s",
            I64Extend8S => "i64.extend8_s",
            I64Extend16S => "i64.extend16_s",
            I64Extend32S => "i64.extend32_s",
            I32TruncSSatF32 => "i32.trunc_s:sat/f32",
            I32TruncUSatF32 => "i32.trunc_u:sat/f32",
            I32TruncSSatF64 => "i32.trunc_s:sat/f64",
            I32TruncUSatF64 => "i32.trunc_u:sat/f64",
            I64TruncSSatF32 => "i64.trunc_s:sat/f32",
            I64TruncUSatF32 => "i64.trunc_u:sat/f32",
            I64TruncSSatF64 => "i64.trunc_s:sat/f64",
            I64TruncUSatF64 => "i64.trunc_u:sat/f64",
            AtomicWake => "atomic.wake",
            I32AtomicWait => "i32.atomic.wait",
            I64AtomicWait => "i64.atomic.wait",
            I32AtomicLoad => "i32.atomic.load",
            I64AtomicLoad => "i64.atomic.load",
            I32AtomicLoad8U => "i32.atomic.load8_u",
            I32AtomicLoad16U => "i32.atomic.load16_u",
            I64AtomicLoad8U => "i64.atomic.load8_u",
            I64AtomicLoad16U => "i64.atomic.load16_u",
            I64AtomicLoad32U => "i64.atomic.load32_u",
            I32AtomicStore => "i32.atomic.store",
            I64AtomicStore => "i64.atomic.store",
            I32AtomicStore8 => "i32.atomic.store8",
            I32AtomicStore16 => "i32.atomic.store16",
            I64AtomicStore8 => "i64.atomic.store8",
            I64AtomicStore16 => "i64.atomic.store16",
            I64AtomicStore32 => "i64.atomic.store32",
            I32AtomicRmwAdd => "i32.atomic.rmw.add",
            I64AtomicRmwAdd => "i64.atomic.rmw.add",
            I32AtomicRmw8UAdd => "i32.atomic.rmw8_u.add",
            I32AtomicRmw16UAdd => "i32.atomic.rmw16_u.add",
            I64AtomicRmw8UAdd => "i64.atomic.rmw8_u.add",
            I64AtomicRmw16UAdd => "i64.atomic.rmw16_u.add",
            I64AtomicRmw32UAdd => "i64.atomic.rmw32_u.add",
            I32AtomicRmwSub => "i32.atomic.rmw.sub",
            I64AtomicRmwSub => "i64.atomic.rmw.sub",
            I32AtomicRmw8USub => "i32.atomic.rmw8_u.sub",
            I32AtomicRmw16USub => "i32.atomic.rmw16_u.sub",
            I64AtomicRmw8USub => "i64.atomic.rmw8_u.sub",
            I64AtomicRmw16USub => "i64.atomic.rmw16_u.sub",
            I64AtomicRmw32USub => "i64.atomic.rmw32_u.sub",
            I32AtomicRmwAnd => "i32.atomic.rmw.and",
            I64AtomicRmwAnd => "i64.atomic.rmw.and",
            I32AtomicRmw8UAnd => "i32.atomic.rmw8_u.and",
            I32AtomicRmw16UAnd => "i32.atomic.rmw16_u.and",
            I64AtomicRmw8UAnd => "i64.atomic.rmw8_u.and",
            I64AtomicRmw16UAnd => "i64.atomic.rmw16_u.and",
            I64AtomicRmw32UAnd => "i64.atomic.rmw32_u.and",
            I32AtomicRmwOr => "i32.atomic.rmw.or",
            I64AtomicRmwOr => "i64.atomic.rmw.or",
            I32AtomicRmw8UOr => "i32.atomic.rmw8_u.or",
            I32AtomicRmw16UOr => "i32.atomic.rmw16_u.or",
            I64AtomicRmw8UOr => "i64.atomic.rmw8_u.or",
            I64AtomicRmw16UOr => "i64.atomic.rmw16_u.or",
            I64AtomicRmw32UOr => "i64.atomic.rmw32_u.or",
            I32AtomicRmwXor => "i32.atomic.rmw.xor",
            I64AtomicRmwXor => "i64.atomic.rmw.xor",
            I32AtomicRmw8UXor => "i32.atomic.rmw8_u.xor",
            I32AtomicRmw16UXor => "i32.atomic.rmw16_u.xor",
            I64AtomicRmw8UXor => "i64.atomic.rmw8_u.xor",
            I64AtomicRmw16UXor => "i64.atomic.rmw16_u.xor",
            I64AtomicRmw32UXor => "i64.atomic.rmw32_u.xor",
            I32AtomicRmwXchg => "i32.atomic.rmw.xchg",
            I64AtomicRmwXchg => "i64.atomic.rmw.xchg",
            I32AtomicRmw8UXchg => "i32.atomic.rmw8_u.xchg",
            I32AtomicRmw16UXchg => "i32.atomic.rmw16_u.xchg",
            I64AtomicRmw8UXchg => "i64.atomic.rmw8_u.xchg",
            I64AtomicRmw16UXchg => "i64.atomic.rmw16_u.xchg",
            I64AtomicRmw32UXchg => "i64.atomic.rmw32_u.xchg",
            I32AtomicRmwCmpxchg => "i32.atomic.rmw.cmpxchg",
            I64AtomicRmwCmpxchg => "i64.atomic.rmw.cmpxchg",
            I32AtomicRmw8UCmpxchg => "i32.atomic.rmw8_u.cmpxchg",
            I32AtomicRmw16UCmpxchg => "i32.atomic.rmw16_u.cmpxchg",
            I64AtomicRmw8UCmpxchg => "i64.atomic.rmw8_u.cmpxchg",
            I64AtomicRmw16UCmpxchg => "i64.atomic.rmw16_u.cmpxchg",
            I64AtomicRmw32UCmpxchg => "i64.atomic.rmw32_u.cmpxchg",
            InterpGetStack => "interp.get_stack",
            InterpSetStack => "interp.set_stack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_namespace_round_trip() {
        assert_eq!(Opcode::from_byte(0x00), Some(Opcode::Unreachable));
        assert_eq!(Opcode::from_byte(0x6a), Some(Opcode::I32Add));
        assert_eq!(Opcode::from_byte(0xc4), Some(Opcode::I64Extend32S));
        assert_eq!(Opcode::from_byte(0x12), None);
        assert_eq!(Opcode::from_byte(0xfc), None);
    }

    #[test]
    fn prefixed_namespaces() {
        assert_eq!(Opcode::from_misc(0x03), Some(Opcode::I32TruncUSatF64));
        assert_eq!(Opcode::from_misc(0x08), None);
        assert_eq!(Opcode::from_atomic(0x1e), Some(Opcode::I32AtomicRmwAdd));
        assert_eq!(Opcode::from_atomic(0x4e), Some(Opcode::I64AtomicRmw32UCmpxchg));
        assert_eq!(Opcode::from_atomic(0x4f), None);
    }

    #[test]
    fn feature_gating() {
        let none = Features::default();
        let all = Features::all();
        assert!(Opcode::I32Add.enabled(&none));
        assert!(!Opcode::I32TruncSSatF32.enabled(&none));
        assert!(Opcode::I32TruncSSatF32.enabled(&all));
        assert!(!Opcode::I64AtomicRmwCmpxchg.enabled(&none));
        assert!(Opcode::I64AtomicRmwCmpxchg.enabled(&all));
        assert!(!Opcode::Try.enabled(&none));
    }

    #[test]
    fn atomic_widths() {
        assert_eq!(Opcode::I32AtomicRmw8UAdd.atomic_rmw_width(), Some(1));
        assert_eq!(Opcode::I64AtomicRmw32UXchg.atomic_rmw_width(), Some(4));
        assert_eq!(Opcode::I64AtomicRmwCmpxchg.atomic_cmpxchg_width(), Some(8));
        assert_eq!(Opcode::I32Add.atomic_rmw_width(), None);
    }
}
