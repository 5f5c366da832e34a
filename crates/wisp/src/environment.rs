//! The registry an embedder populates before instantiation: loaded
//! modules, host modules, and the diagnostic callback.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::decode;
use crate::error::{DecodeError, HostFault};
use crate::module::{Global, ImportKind, Module};
use crate::thread::Thread;
use crate::types::{ExternalKind, ReadOptions, Signature, Type, TypedValue, Value};

/// Host function body. The slice is both the parameter and the result
/// buffer: results are written over the leading slots.
pub type HostCallback =
    Arc<dyn Fn(&mut Thread, &mut [Value]) -> Result<(), HostFault> + Send + Sync>;

#[derive(Clone)]
pub struct HostFunc {
    pub sig: Signature,
    pub callback: HostCallback,
}

impl HostFunc {
    pub fn new(
        params: Vec<Type>,
        results: Vec<Type>,
        callback: impl Fn(&mut Thread, &mut [Value]) -> Result<(), HostFault> + Send + Sync + 'static,
    ) -> HostFunc {
        HostFunc { sig: Signature::new(params, results), callback: Arc::new(callback) }
    }
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostFunc {}", self.sig)
    }
}

/// An instance-like record whose functions and globals come from the
/// embedder rather than a binary.
#[derive(Default)]
pub struct HostModule {
    pub funcs: BTreeMap<String, HostFunc>,
    pub globals: BTreeMap<String, Global>,
}

impl HostModule {
    pub fn add_func(
        &mut self,
        name: &str,
        params: Vec<Type>,
        results: Vec<Type>,
        callback: impl Fn(&mut Thread, &mut [Value]) -> Result<(), HostFault> + Send + Sync + 'static,
    ) {
        self.funcs.insert(name.to_string(), HostFunc::new(params, results, callback));
    }

    pub fn add_global(&mut self, name: &str, value: TypedValue, mutable: bool) {
        self.globals.insert(name.to_string(), Global { ty: value.ty, mutable, init: value });
    }
}

pub type ErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// The default host module every environment starts with.
pub const ENV_MODULE: &str = "env";

pub struct Environment {
    modules: BTreeMap<String, Arc<Module>>,
    host_modules: BTreeMap<String, HostModule>,
    error_callback: Option<ErrorCallback>,
}

impl Default for Environment {
    fn default() -> Environment {
        Environment::new()
    }
}

impl Environment {
    pub fn new() -> Environment {
        let mut env = Environment {
            modules: BTreeMap::new(),
            host_modules: BTreeMap::new(),
            error_callback: None,
        };
        env.host_modules.insert(ENV_MODULE.to_string(), HostModule::default());
        env
    }

    /// Decode `bytes` and register the result under `name`. The module is
    /// immutable from here on.
    pub fn load_module(
        &mut self,
        name: &str,
        bytes: &[u8],
        options: &ReadOptions,
    ) -> Result<Arc<Module>, DecodeError> {
        let module = decode::decode_module(name, bytes, self, options)?;
        let module = Arc::new(module);
        self.modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    pub fn module(&self, name: &str) -> Option<&Arc<Module>> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &Arc<Module>)> {
        self.modules.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Get or create a host module.
    pub fn host_module_mut(&mut self, name: &str) -> &mut HostModule {
        self.host_modules.entry(name.to_string()).or_default()
    }

    pub fn host_module(&self, name: &str) -> Option<&HostModule> {
        self.host_modules.get(name)
    }

    pub fn host_modules(&self) -> impl Iterator<Item = (&str, &HostModule)> {
        self.host_modules.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn env_module_mut(&mut self) -> &mut HostModule {
        self.host_module_mut(ENV_MODULE)
    }

    pub fn set_error_callback(&mut self, callback: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.error_callback = Some(Arc::new(callback));
    }

    pub(crate) fn error_callback(&self) -> Option<ErrorCallback> {
        self.error_callback.clone()
    }

    /// Route a diagnostic to the embedder callback, or to the logger when
    /// none is installed.
    pub fn report(&self, tag: &str, message: &str) {
        match &self.error_callback {
            Some(cb) => cb(tag, message),
            None => log::error!(target: "wisp", "{tag}: {message}"),
        }
    }

    /// The value of an exported global, following import chains across
    /// modules (bounded, in case of cycles).
    pub fn global_value(&self, module: &str, field: &str) -> Option<TypedValue> {
        self.global_value_bounded(module, field, 0)
    }

    fn global_value_bounded(&self, module: &str, field: &str, depth: u32) -> Option<TypedValue> {
        if depth >= 16 {
            return None;
        }
        if let Some(m) = self.modules.get(module) {
            let export = m
                .exports
                .iter()
                .find(|e| e.kind == ExternalKind::Global && e.name == field)?;
            let entry = m.global_index.get(export.object as usize)?;
            if entry.import {
                let import = m.import(entry.index)?;
                if let ImportKind::Global { .. } = import.kind {
                    return self.global_value_bounded(&import.module, &import.field, depth + 1);
                }
                return None;
            }
            return m.global(entry.index).map(|g| g.init);
        }
        let host = self.host_modules.get(module)?;
        host.globals.get(field).map(|g| g.init)
    }
}
