//! The parsed, immutable module representation. Instance state lives in
//! `runtime`; nothing here changes after `Environment::load_module`.

use crate::opcode::Opcode;
use crate::types::{ExternalKind, Index, Limits, Signature, Type, TypedValue};

/// One decoded operation. Control flow is pre-resolved: branch records hold
/// absolute opcode-stream offsets, so the engine never re-scans for labels.
#[derive(Clone, Copy, PartialEq)]
pub struct OpRec {
    pub opcode: Opcode,
    value: u64,
}

impl OpRec {
    pub fn new(opcode: Opcode) -> OpRec {
        OpRec { opcode, value: 0 }
    }

    pub fn with_pair(opcode: Opcode, v1: u32, v2: u32) -> OpRec {
        OpRec { opcode, value: (v1 as u64) | ((v2 as u64) << 32) }
    }

    pub fn with_u64(opcode: Opcode, value: u64) -> OpRec {
        OpRec { opcode, value }
    }

    /// First 32-bit immediate.
    pub fn v1(self) -> u32 {
        self.value as u32
    }

    /// Second 32-bit immediate; branch targets live here.
    pub fn v2(self) -> u32 {
        (self.value >> 32) as u32
    }

    /// The full 64-bit immediate (i64/f64 constants).
    pub fn value64(self) -> u64 {
        self.value
    }

    pub(crate) fn set_v2(&mut self, v2: u32) {
        self.value = (self.value & 0xffff_ffff) | ((v2 as u64) << 32);
    }
}

impl std::fmt::Debug for OpRec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode {
            Opcode::I64Const | Opcode::F64Const => {
                write!(f, "{} {}", self.opcode.name(), self.value64())
            }
            _ => write!(f, "{} {} {}", self.opcode.name(), self.v1(), self.v2()),
        }
    }
}

/// Position of an object in a per-kind index space: either the n-th entry
/// of `Module::imports` or an index into the module's own definition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub import: bool,
    pub index: Index,
    pub exported: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    Func { sig: Index },
    Table(TableDef),
    Memory(Limits),
    Global { ty: Type, mutable: bool },
    Except(Vec<Type>),
}

impl ImportKind {
    pub fn external_kind(&self) -> ExternalKind {
        match self {
            ImportKind::Func { .. } => ExternalKind::Func,
            ImportKind::Table(_) => ExternalKind::Table,
            ImportKind::Memory(_) => ExternalKind::Memory,
            ImportKind::Global { .. } => ExternalKind::Global,
            ImportKind::Except(_) => ExternalKind::Except,
        }
    }
}

/// A function defined by this module.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub sig: Index,
    /// Parameter types followed by declared locals; one value slot each.
    pub locals: Vec<Type>,
    pub opcodes: Vec<OpRec>,
    /// From the `name` custom section, if read.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub ty: Type,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Global {
    pub ty: Type,
    pub mutable: bool,
    pub init: TypedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    /// Index into the owning index space.
    pub object: Index,
}

/// A data segment with its offset expression already evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub memory: Index,
    pub offset: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElemSegment {
    pub table: Index,
    pub offset: u32,
    pub values: Vec<Index>,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub signatures: Vec<Signature>,
    pub imports: Vec<Import>,
    pub funcs: Vec<Func>,
    pub tables: Vec<TableDef>,
    pub memories: Vec<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub data: Vec<DataSegment>,
    pub elements: Vec<ElemSegment>,
    pub func_index: Vec<IndexEntry>,
    pub table_index: Vec<IndexEntry>,
    pub memory_index: Vec<IndexEntry>,
    pub global_index: Vec<IndexEntry>,
    pub except_index: Vec<IndexEntry>,
    pub start: Option<Index>,
    /// DataSize from the `linking` custom section.
    pub data_size: Option<u32>,
    /// The global the stack-pointer rewrite targeted, when it fired.
    pub stack_pointer_global: Option<Index>,
    pub(crate) bytes: Vec<u8>,
}

impl Module {
    /// The source bytes this module was decoded from.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn signature(&self, index: Index) -> Option<&Signature> {
        self.signatures.get(index as usize)
    }

    /// A local function by function-space index; `None` for imports.
    pub fn func(&self, space_index: Index) -> Option<&Func> {
        let entry = self.func_index.get(space_index as usize)?;
        if entry.import {
            None
        } else {
            self.funcs.get(entry.index as usize)
        }
    }

    /// Signature of any function in the function index space.
    pub fn func_signature(&self, space_index: Index) -> Option<&Signature> {
        let entry = self.func_index.get(space_index as usize)?;
        let sig = if entry.import {
            match &self.imports.get(entry.index as usize)?.kind {
                ImportKind::Func { sig } => *sig,
                _ => return None,
            }
        } else {
            self.funcs.get(entry.index as usize)?.sig
        };
        self.signatures.get(sig as usize)
    }

    pub fn import(&self, index: Index) -> Option<&Import> {
        self.imports.get(index as usize)
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }

    pub fn global(&self, index: Index) -> Option<&Global> {
        self.globals.get(index as usize)
    }

    /// Compare the decoded representation, ignoring the cached bytes and
    /// the registration name.
    pub fn same_representation(&self, other: &Module) -> bool {
        self.signatures == other.signatures
            && self.imports == other.imports
            && self.funcs == other.funcs
            && self.tables == other.tables
            && self.memories == other.memories
            && self.globals == other.globals
            && self.exports == other.exports
            && self.data == other.data
            && self.elements == other.elements
            && self.func_index == other.func_index
            && self.table_index == other.table_index
            && self.memory_index == other.memory_index
            && self.global_index == other.global_index
            && self.start == other.start
            && self.data_size == other.data_size
    }
}
