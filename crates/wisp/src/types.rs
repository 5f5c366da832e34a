//! Shared primitive types: value types, raw values, limits, features.

use std::fmt;

/// An index into one of the many index spaces.
pub type Index = u32;
/// An address or size in linear memory.
pub type Address = u32;

pub const INVALID_INDEX: Index = Index::MAX;

/// 64 KiB, the unit of linear-memory allocation.
pub const PAGE_SIZE: u32 = 0x10000;
/// Number of pages that fit in a 32-bit address space.
pub const MAX_PAGES: u32 = 0x10000;

/// Value and meta types. Discriminants match the binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum Type {
    I32 = -0x01,
    I64 = -0x02,
    F32 = -0x03,
    F64 = -0x04,
    Anyfunc = -0x10,
    Func = -0x20,
    Void = -0x40,
    /// Not part of the format; the polymorphic type used while checking.
    Any = 0,
}

impl Type {
    pub fn from_code(code: i32) -> Option<Type> {
        Some(match code {
            -0x01 => Type::I32,
            -0x02 => Type::I64,
            -0x03 => Type::F32,
            -0x04 => Type::F64,
            -0x10 => Type::Anyfunc,
            -0x20 => Type::Func,
            -0x40 => Type::Void,
            _ => return None,
        })
    }

    pub fn is_value(self) -> bool {
        matches!(self, Type::I32 | Type::I64 | Type::F32 | Type::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::Anyfunc => "anyfunc",
            Type::Func => "func",
            Type::Void => "void",
            Type::Any => "any",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// External kinds. Discriminants match the binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExternalKind {
    Func = 0,
    Table = 1,
    Memory = 2,
    Global = 3,
    Except = 4,
}

impl ExternalKind {
    pub fn from_code(code: u8) -> Option<ExternalKind> {
        Some(match code {
            0 => ExternalKind::Func,
            1 => ExternalKind::Table,
            2 => ExternalKind::Memory,
            3 => ExternalKind::Global,
            4 => ExternalKind::Except,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ExternalKind::Func => "func",
            ExternalKind::Table => "table",
            ExternalKind::Memory => "memory",
            ExternalKind::Global => "global",
            ExternalKind::Except => "except",
        }
    }
}

/// Binary section ids, in their mandatory order of appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BinarySection {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Elem = 9,
    Code = 10,
    Data = 11,
}

impl BinarySection {
    pub fn from_code(code: u8) -> Option<BinarySection> {
        Some(match code {
            0 => BinarySection::Custom,
            1 => BinarySection::Type,
            2 => BinarySection::Import,
            3 => BinarySection::Function,
            4 => BinarySection::Table,
            5 => BinarySection::Memory,
            6 => BinarySection::Global,
            7 => BinarySection::Export,
            8 => BinarySection::Start,
            9 => BinarySection::Elem,
            10 => BinarySection::Code,
            11 => BinarySection::Data,
            _ => return None,
        })
    }
}

/// Size bounds for memories (pages) and tables (elements).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub initial: u32,
    pub max: Option<u32>,
    pub shared: bool,
}

impl Limits {
    pub fn new(initial: u32, max: Option<u32>) -> Limits {
        Limits { initial, max, shared: false }
    }
}

/// A raw 64-bit value slot. Interpretation is up to the opcode; integer
/// sign in particular is not recorded.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Value(u64);

impl Value {
    pub const ZERO: Value = Value(0);

    pub fn from_raw(bits: u64) -> Value {
        Value(bits)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_u32(v: u32) -> Value {
        Value(v as u64)
    }

    pub fn from_i32(v: i32) -> Value {
        Value(v as u32 as u64)
    }

    pub fn from_u64(v: u64) -> Value {
        Value(v)
    }

    pub fn from_i64(v: i64) -> Value {
        Value(v as u64)
    }

    pub fn from_f32(v: f32) -> Value {
        Value(v.to_bits() as u64)
    }

    pub fn from_f64(v: f64) -> Value {
        Value(v.to_bits())
    }

    pub fn u32(self) -> u32 {
        self.0 as u32
    }

    pub fn i32(self) -> i32 {
        self.0 as u32 as i32
    }

    pub fn u64(self) -> u64 {
        self.0
    }

    pub fn i64(self) -> i64 {
        self.0 as i64
    }

    pub fn f32_bits(self) -> u32 {
        self.0 as u32
    }

    pub fn f64_bits(self) -> u64 {
        self.0
    }

    pub fn f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    pub fn f64(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:#018x})", self.0)
    }
}

/// A value together with its type, used at API boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedValue {
    pub ty: Type,
    pub value: Value,
}

impl TypedValue {
    pub fn new(ty: Type, value: Value) -> TypedValue {
        TypedValue { ty, value }
    }

    pub fn i32(v: i32) -> TypedValue {
        TypedValue { ty: Type::I32, value: Value::from_i32(v) }
    }

    pub fn i64(v: i64) -> TypedValue {
        TypedValue { ty: Type::I64, value: Value::from_i64(v) }
    }

    pub fn f32(v: f32) -> TypedValue {
        TypedValue { ty: Type::F32, value: Value::from_f32(v) }
    }

    pub fn f64(v: f64) -> TypedValue {
        TypedValue { ty: Type::F64, value: Value::from_f64(v) }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::I32 => write!(f, "i32:{}", self.value.i32()),
            Type::I64 => write!(f, "i64:{}", self.value.i64()),
            Type::F32 => write!(f, "f32:{}", self.value.f32()),
            Type::F64 => write!(f, "f64:{}", self.value.f64()),
            other => write!(f, "{}:{:#x}", other, self.value.raw()),
        }
    }
}

/// Optional extensions the decoder may accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    pub exceptions: bool,
    pub sat_float_to_int: bool,
    pub threads: bool,
    /// Rewrite accesses to the shadow-stack-pointer global into per-thread
    /// interpreter intrinsics.
    pub stack_pointer: bool,
}

impl Features {
    pub fn all() -> Features {
        Features { exceptions: true, sat_float_to_int: true, threads: true, stack_pointer: true }
    }
}

/// Options for `Environment::load_module`.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub features: Features,
    pub read_debug_names: bool,
    pub stop_on_first_error: bool,
}

impl Default for ReadOptions {
    fn default() -> ReadOptions {
        ReadOptions { features: Features::default(), read_debug_names: false, stop_on_first_error: true }
    }
}

/// The parameter and result type vectors of a function. Equality is
/// structural, which is exactly the import-matching rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

impl Signature {
    pub fn new(params: Vec<Type>, results: Vec<Type>) -> Signature {
        Signature { params, results }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(p.name())?;
        }
        f.write_str(") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(r.name())?;
        }
        f.write_str(")")
    }
}
