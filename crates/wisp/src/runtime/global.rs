//! Runtime globals: raw bits behind a relaxed atomic, shared by reference
//! between the instances that import them.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Type, TypedValue, Value};

pub struct RuntimeGlobal {
    pub ty: Type,
    pub mutable: bool,
    bits: AtomicU64,
}

impl RuntimeGlobal {
    pub fn new(init: TypedValue, mutable: bool) -> RuntimeGlobal {
        RuntimeGlobal { ty: init.ty, mutable, bits: AtomicU64::new(init.value.raw()) }
    }

    pub fn get(&self) -> Value {
        Value::from_raw(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: Value) {
        self.bits.store(value.raw(), Ordering::Relaxed);
    }

    pub fn typed(&self) -> TypedValue {
        TypedValue::new(self.ty, self.get())
    }
}
