//! Function tables. Slots hold function-space indices of the module that
//! placed the element, with `INVALID_INDEX` marking uninitialized slots.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{Index, Limits, Type, INVALID_INDEX};

pub struct TableData {
    pub ty: Type,
    pub limits: Limits,
    pub values: Vec<Index>,
}

impl TableData {
    pub fn new(ty: Type, limits: Limits) -> TableData {
        TableData { ty, limits, values: Vec::new() }
    }

    /// Size to `limits.initial`, new slots uninitialized.
    pub(crate) fn fill_initial(&mut self) {
        self.values.resize(self.limits.initial as usize, INVALID_INDEX);
    }
}

pub struct Table {
    inner: RwLock<TableData>,
}

impl Table {
    pub(crate) fn new(data: TableData) -> Table {
        Table { inner: RwLock::new(data) }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TableData> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, TableData> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
