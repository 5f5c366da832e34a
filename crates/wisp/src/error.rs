//! The three error channels: decode errors, link errors, execution traps.

use thiserror::Error;

use crate::types::{BinarySection, ExternalKind};

/// A structured decoder error: message, byte offset, section in progress.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (offset {offset:#x}, {section:?} section)")]
pub struct DecodeError {
    pub message: String,
    pub offset: usize,
    pub section: BinarySection,
}

impl DecodeError {
    pub fn new(message: impl Into<String>, offset: usize) -> DecodeError {
        DecodeError { message: message.into(), offset, section: BinarySection::Custom }
    }

    pub fn in_section(mut self, section: BinarySection) -> DecodeError {
        self.section = section;
        self
    }
}

/// Instantiation failures. Linking is atomic: any of these aborts the
/// whole `Runtime::new`.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{importer}: import \"{module}\".\"{field}\": module not found")]
    MissingModule { importer: String, module: String, field: String },

    #[error("{importer}: import \"{module}\".\"{field}\": field is not exported")]
    MissingExport { importer: String, module: String, field: String },

    #[error("{importer}: import \"{module}\".\"{field}\": expected {expected:?}, found {found:?}")]
    KindMismatch {
        importer: String,
        module: String,
        field: String,
        expected: ExternalKind,
        found: ExternalKind,
    },

    #[error("{importer}: import \"{module}\".\"{field}\": signature mismatch")]
    SignatureMismatch { importer: String, module: String, field: String },

    #[error("{importer}: import \"{module}\".\"{field}\": global type mismatch")]
    GlobalTypeMismatch { importer: String, module: String, field: String },

    #[error("{importer}: import \"{module}\".\"{field}\": host policy refused the import")]
    PolicyRefused { importer: String, module: String, field: String },

    #[error("{importer}: import \"{module}\".\"{field}\": import cycle")]
    ImportCycle { importer: String, module: String, field: String },

    #[error("{module}: data segment does not fit (offset {offset}, len {len})")]
    DataSegmentOutOfBounds { module: String, offset: u32, len: usize },

    #[error("{module}: element segment does not fit (offset {offset}, len {len})")]
    ElemSegmentOutOfBounds { module: String, offset: u32, len: usize },

    #[error("memory allocation failed ({pages} pages)")]
    MemoryAllocFailed { pages: u32 },

    #[error("{module}: start function trapped: {trap}")]
    StartTrap {
        module: String,
        #[source]
        trap: Trap,
    },
}

/// Terminal statuses of a guest call. Display strings match the trap
/// reasons the test suites assert on.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Trap {
    #[error("out of bounds memory access")]
    MemoryAccessOutOfBounds,
    #[error("atomic memory access is unaligned")]
    AtomicMemoryAccessUnaligned,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("undefined table index")]
    UndefinedTableIndex,
    #[error("uninitialized table element")]
    UninitializedTableElement,
    #[error("unreachable executed")]
    Unreachable,
    #[error("indirect call signature mismatch")]
    IndirectCallSignatureMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("value stack exhausted")]
    ValueStackExhausted,
    #[error("user stack exhausted")]
    UserStackExhausted,
    #[error("host result type mismatch")]
    HostResultTypeMismatch,
    #[error("host function trapped")]
    HostTrapped,
    #[error("argument type mismatch")]
    ArgumentTypeMismatch,
    #[error("unknown export")]
    UnknownExport,
    #[error("export kind mismatch")]
    ExportKindMismatch,
}

impl Trap {
    /// Match a trap against the reason string a test directive expects.
    /// The reference suites phrase a few reasons differently.
    pub fn matches_reason(self, reason: &str) -> bool {
        let own = self.to_string();
        if reason == own || own.starts_with(reason) || reason.starts_with(&own) {
            return true;
        }
        matches!(
            (self, reason),
            (Trap::UndefinedTableIndex, "undefined element")
                | (Trap::UninitializedTableElement, "uninitialized element")
                | (Trap::IndirectCallSignatureMismatch, "indirect call type mismatch")
                | (Trap::Unreachable, "unreachable")
                | (Trap::CallStackExhausted, "stack overflow")
        )
    }
}

/// Returned by a host callback to signal failure; surfaces to the guest as
/// `Trap::HostTrapped`.
#[derive(Debug, Default, Error)]
#[error("host function trapped")]
pub struct HostFault;
