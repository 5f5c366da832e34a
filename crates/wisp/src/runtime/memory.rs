//! Linear memories. The byte buffer lives behind an `RwLock`: ordinary
//! accesses take transient guards inside a single opcode, so no raw view
//! survives a relocation (see the grow barrier in `thread::sync`).

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::Limits;

/// What the embedder's memory hook is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAction {
    Alloc,
    Realloc,
    Free,
}

/// Policy-supplied allocator for linear memories. Absent a hook, plain
/// heap buffers are used.
pub trait MemoryHook: Send + Sync {
    fn on_memory(&self, memory: &mut MemoryData, size: u32, action: MemoryAction) -> bool;
}

pub struct MemoryData {
    pub limits: Limits,
    pub data: Vec<u8>,
    /// 16-aligned high-water mark of placed data segments; the script
    /// allocator puts its arena above this.
    pub user_data_offset: u32,
    /// Opaque to the interpreter; the script allocator stores its arena
    /// header offset here (0 = none).
    pub ctx: u32,
}

impl MemoryData {
    pub fn new(limits: Limits) -> MemoryData {
        MemoryData { limits, data: Vec::new(), user_data_offset: 0, ctx: 0 }
    }

    /// Current size in pages.
    pub fn pages(&self) -> u32 {
        self.limits.initial
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Grow or shrink to `size` bytes, zero-filling any new tail.
    pub fn resize(&mut self, size: u32) {
        self.data.resize(size as usize, 0);
    }
}

pub struct Memory {
    inner: RwLock<MemoryData>,
}

impl Memory {
    pub(crate) fn new(data: MemoryData) -> Memory {
        Memory { inner: RwLock::new(data) }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, MemoryData> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, MemoryData> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
