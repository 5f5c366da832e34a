//! Binary module decoder: section framing and dispatch. Code bodies are
//! assembled in `code`, operand checking lives in `typecheck`.

mod code;
mod custom;
mod reader;
mod typecheck;

#[cfg(test)]
mod tests;

use crate::environment::Environment;
use crate::error::DecodeError;
use crate::module::{
    DataSegment, ElemSegment, Export, Func, Global, Import, ImportKind, IndexEntry, Module,
    TableDef,
};
use crate::types::{
    BinarySection, ExternalKind, Index, Limits, ReadOptions, Signature, Type, TypedValue, Value,
};
use code::FuncAssembler;
use reader::Reader;

const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
const WASM_VERSION: u32 = 1;

/// An arbitrary sanity cap; far above anything a toolchain emits.
const MAX_LOCALS: u32 = 0x10_0000;

pub(crate) fn decode_module(
    name: &str,
    bytes: &[u8],
    env: &Environment,
    options: &ReadOptions,
) -> Result<Module, DecodeError> {
    let mut r = Reader::new(bytes);
    let magic = r.bytes(4).map_err(|_| DecodeError::new("magic header not detected", 0))?;
    if magic != WASM_MAGIC.as_slice() {
        return Err(DecodeError::new("magic header not detected", 0));
    }
    let version_bytes = r.bytes(4).map_err(|_| DecodeError::new("unexpected end", 4))?;
    let version = u32::from_le_bytes(version_bytes.try_into().unwrap());
    if version != WASM_VERSION {
        return Err(DecodeError::new("unknown binary version", 4));
    }

    let mut decoder = Decoder {
        module: Module { name: name.to_string(), ..Module::default() },
        env,
        options,
        declared_funcs: 0,
        code_entries: 0,
        errors: Vec::new(),
    };

    let mut last_section: Option<BinarySection> = None;
    while !r.is_done() {
        let at = r.pos();
        let id = r.u8()?;
        let size = r.leb_u32()? as usize;
        let section = BinarySection::from_code(id)
            .ok_or_else(|| DecodeError::new("invalid section id", at))?;
        if section != BinarySection::Custom {
            if last_section.is_some_and(|last| section <= last) {
                return Err(DecodeError::new("section out of order", at).in_section(section));
            }
            last_section = Some(section);
        }
        let mut sub = r.sub(size)?;
        match decoder.read_section(section, &mut sub) {
            Ok(()) => {
                if !sub.is_done() {
                    decoder.record(
                        DecodeError::new("section size mismatch", sub.pos()).in_section(section),
                    )?;
                }
            }
            Err(e) => decoder.record(e.in_section(section))?,
        }
    }

    if decoder.declared_funcs != decoder.code_entries {
        decoder.record(DecodeError::new(
            "function and code section have inconsistent lengths",
            r.pos(),
        ))?;
    }

    if let Some(first) = decoder.errors.into_iter().next() {
        return Err(first);
    }
    decoder.module.bytes = bytes.to_vec();
    Ok(decoder.module)
}

struct Decoder<'a> {
    module: Module,
    env: &'a Environment,
    options: &'a ReadOptions,
    declared_funcs: u32,
    code_entries: u32,
    errors: Vec<DecodeError>,
}

impl<'a> Decoder<'a> {
    /// In stop-on-first-error mode the error propagates; otherwise it is
    /// reported, remembered, and decoding continues with the next section.
    fn record(&mut self, error: DecodeError) -> Result<(), DecodeError> {
        if self.options.stop_on_first_error {
            return Err(error);
        }
        self.env.report("Decoder", &error.to_string());
        self.errors.push(error);
        Ok(())
    }

    fn read_section(
        &mut self,
        section: BinarySection,
        r: &mut Reader,
    ) -> Result<(), DecodeError> {
        match section {
            BinarySection::Custom => self.read_custom(r),
            BinarySection::Type => self.read_types(r),
            BinarySection::Import => self.read_imports(r),
            BinarySection::Function => self.read_functions(r),
            BinarySection::Table => self.read_tables(r),
            BinarySection::Memory => self.read_memories(r),
            BinarySection::Global => self.read_globals(r),
            BinarySection::Export => self.read_exports(r),
            BinarySection::Start => self.read_start(r),
            BinarySection::Elem => self.read_elements(r),
            BinarySection::Code => self.read_code(r),
            BinarySection::Data => self.read_data(r),
        }
    }

    fn read_custom(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let name = r.name()?.to_string();
        if name == "name" {
            if self.options.read_debug_names {
                custom::read_name_section(r, &mut self.module)?;
            }
        } else if name == "linking" {
            custom::read_linking_section(r, &mut self.module)?;
        } else if name.starts_with("reloc.") {
            custom::read_reloc_section(r)?;
        } else if name == "exception" {
            custom::read_exception_section(r)?;
        }
        // Unknown custom sections are skipped.
        let rest = r.remaining();
        r.skip(rest)
    }

    fn read_types(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        for _ in 0..count {
            let at = r.pos();
            let form = r.leb_i32()?;
            if Type::from_code(form) != Some(Type::Func) {
                return Err(DecodeError::new("invalid type form", at));
            }
            let params = self.read_value_types(r)?;
            let results = self.read_value_types(r)?;
            if results.len() > 1 {
                return Err(DecodeError::new("invalid result arity", at));
            }
            self.module.signatures.push(Signature::new(params, results));
        }
        Ok(())
    }

    fn read_value_types(&mut self, r: &mut Reader) -> Result<Vec<Type>, DecodeError> {
        let count = r.leb_u32()?;
        let mut types = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            types.push(self.read_value_type(r)?);
        }
        Ok(types)
    }

    fn read_value_type(&mut self, r: &mut Reader) -> Result<Type, DecodeError> {
        let at = r.pos();
        let code = r.leb_i32()?;
        match Type::from_code(code) {
            Some(ty) if ty.is_value() => Ok(ty),
            _ => Err(DecodeError::new("invalid value type", at)),
        }
    }

    /// Flags byte: bit 0 = has max, bit 1 = shared.
    fn read_limits(&mut self, r: &mut Reader, shareable: bool) -> Result<Limits, DecodeError> {
        let at = r.pos();
        let flags = r.leb_u32()?;
        if flags > 3 {
            return Err(DecodeError::new("invalid limits flags", at));
        }
        let has_max = flags & 1 != 0;
        let shared = flags & 2 != 0;
        if shared && !shareable {
            return Err(DecodeError::new("tables may not be shared", at));
        }
        if shared && !self.options.features.threads {
            return Err(DecodeError::new("shared memory requires the threads feature", at));
        }
        if shared && !has_max {
            return Err(DecodeError::new("shared memory must have a max size", at));
        }
        let initial = r.leb_u32()?;
        let max = if has_max {
            let max = r.leb_u32()?;
            if max < initial {
                return Err(DecodeError::new(
                    "size minimum must not be greater than maximum",
                    at,
                ));
            }
            Some(max)
        } else {
            None
        };
        Ok(Limits { initial, max, shared })
    }

    fn read_table_def(&mut self, r: &mut Reader) -> Result<TableDef, DecodeError> {
        let at = r.pos();
        let elem_ty = r.leb_i32()?;
        if Type::from_code(elem_ty) != Some(Type::Anyfunc) {
            return Err(DecodeError::new("invalid table element type", at));
        }
        let limits = self.read_limits(r, false)?;
        Ok(TableDef { ty: Type::Anyfunc, limits })
    }

    fn read_memory_limits(&mut self, r: &mut Reader) -> Result<Limits, DecodeError> {
        let at = r.pos();
        let limits = self.read_limits(r, true)?;
        if limits.initial > crate::types::MAX_PAGES
            || limits.max.is_some_and(|m| m > crate::types::MAX_PAGES)
        {
            return Err(DecodeError::new(
                "memory size must be at most 65536 pages (4GiB)",
                at,
            ));
        }
        Ok(limits)
    }

    fn read_global_header(&mut self, r: &mut Reader) -> Result<(Type, bool), DecodeError> {
        let ty = self.read_value_type(r)?;
        let at = r.pos();
        let mutable = match r.u8()? {
            0 => false,
            1 => true,
            _ => return Err(DecodeError::new("invalid mutability", at)),
        };
        Ok((ty, mutable))
    }

    fn read_imports(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        for _ in 0..count {
            let module_name = r.name()?.to_string();
            let field = r.name()?.to_string();
            let at = r.pos();
            let kind_code = r.u8()?;
            let kind = ExternalKind::from_code(kind_code)
                .ok_or_else(|| DecodeError::new("malformed import kind", at))?;
            let import_index = self.module.imports.len() as Index;
            let entry = IndexEntry { import: true, index: import_index, exported: false };
            let kind = match kind {
                ExternalKind::Func => {
                    let at = r.pos();
                    let sig = r.leb_u32()?;
                    if self.module.signature(sig).is_none() {
                        return Err(DecodeError::new("unknown type", at));
                    }
                    self.module.func_index.push(entry);
                    ImportKind::Func { sig }
                }
                ExternalKind::Table => {
                    if !self.module.table_index.is_empty() {
                        return Err(DecodeError::new("multiple tables", at));
                    }
                    let def = self.read_table_def(r)?;
                    self.module.table_index.push(entry);
                    ImportKind::Table(def)
                }
                ExternalKind::Memory => {
                    if !self.module.memory_index.is_empty() {
                        return Err(DecodeError::new("multiple memories", at));
                    }
                    let limits = self.read_memory_limits(r)?;
                    self.module.memory_index.push(entry);
                    ImportKind::Memory(limits)
                }
                ExternalKind::Global => {
                    let (ty, mutable) = self.read_global_header(r)?;
                    self.module.global_index.push(entry);
                    ImportKind::Global { ty, mutable }
                }
                ExternalKind::Except => {
                    if !self.options.features.exceptions {
                        return Err(DecodeError::new("malformed import kind", at));
                    }
                    let types = self.read_value_types(r)?;
                    self.module.except_index.push(entry);
                    ImportKind::Except(types)
                }
            };
            self.module.imports.push(Import { module: module_name, field, kind });
        }
        Ok(())
    }

    fn read_functions(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        self.declared_funcs = count;
        for _ in 0..count {
            let at = r.pos();
            let sig = r.leb_u32()?;
            if self.module.signature(sig).is_none() {
                return Err(DecodeError::new("unknown type", at));
            }
            let local_index = self.module.funcs.len() as Index;
            self.module.func_index.push(IndexEntry {
                import: false,
                index: local_index,
                exported: false,
            });
            // Locals and body are filled by the code section.
            self.module.funcs.push(Func { sig, locals: Vec::new(), opcodes: Vec::new(), name: None });
        }
        Ok(())
    }

    fn read_tables(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        for _ in 0..count {
            let at = r.pos();
            if !self.module.table_index.is_empty() {
                return Err(DecodeError::new("multiple tables", at));
            }
            let def = self.read_table_def(r)?;
            let local_index = self.module.tables.len() as Index;
            self.module.table_index.push(IndexEntry {
                import: false,
                index: local_index,
                exported: false,
            });
            self.module.tables.push(def);
        }
        Ok(())
    }

    fn read_memories(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        for _ in 0..count {
            let at = r.pos();
            if !self.module.memory_index.is_empty() {
                return Err(DecodeError::new("multiple memories", at));
            }
            let limits = self.read_memory_limits(r)?;
            let local_index = self.module.memories.len() as Index;
            self.module.memory_index.push(IndexEntry {
                import: false,
                index: local_index,
                exported: false,
            });
            self.module.memories.push(limits);
        }
        Ok(())
    }

    /// A constant initializer: one const or `get_global` of an immutable
    /// import, terminated by `end`, evaluated on the spot.
    fn read_init_expr(
        &mut self,
        r: &mut Reader,
        expected: Type,
    ) -> Result<TypedValue, DecodeError> {
        let at = r.pos();
        let op = r.u8()?;
        let value = match op {
            0x41 => TypedValue::i32(r.leb_i32()?),
            0x42 => TypedValue::i64(r.leb_i64()?),
            0x43 => TypedValue::new(Type::F32, Value::from_u32(r.f32_bits()?)),
            0x44 => TypedValue::new(Type::F64, Value::from_u64(r.f64_bits()?)),
            0x23 => {
                let index = r.leb_u32()?;
                let entry = self
                    .module
                    .global_index
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| DecodeError::new("unknown global", at))?;
                if !entry.import {
                    return Err(DecodeError::new("constant expression required", at));
                }
                let import = &self.module.imports[entry.index as usize];
                let (ty, mutable) = match &import.kind {
                    ImportKind::Global { ty, mutable } => (*ty, *mutable),
                    _ => return Err(DecodeError::new("unknown global", at)),
                };
                if mutable {
                    return Err(DecodeError::new("constant expression required", at));
                }
                let value = self
                    .env
                    .global_value(&import.module, &import.field)
                    .ok_or_else(|| DecodeError::new("unknown import global value", at))?;
                if value.ty != ty {
                    return Err(DecodeError::new("type mismatch in constant expression", at));
                }
                value
            }
            _ => return Err(DecodeError::new("constant expression required", at)),
        };
        if r.u8()? != 0x0b {
            return Err(DecodeError::new("END opcode expected", at));
        }
        if value.ty != expected {
            return Err(DecodeError::new("type mismatch in constant expression", at));
        }
        Ok(value)
    }

    fn read_globals(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        for _ in 0..count {
            let (ty, mutable) = self.read_global_header(r)?;
            let init = self.read_init_expr(r, ty)?;
            let local_index = self.module.globals.len() as Index;
            self.module.global_index.push(IndexEntry {
                import: false,
                index: local_index,
                exported: false,
            });
            self.module.globals.push(Global { ty, mutable, init });
        }
        Ok(())
    }

    fn read_exports(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        for _ in 0..count {
            let at = r.pos();
            let name = r.name()?.to_string();
            if self.module.exports.iter().any(|e| e.name == name) {
                return Err(DecodeError::new("duplicate export name", at));
            }
            let kind_code = r.u8()?;
            let kind = ExternalKind::from_code(kind_code)
                .ok_or_else(|| DecodeError::new("invalid export description", at))?;
            let object = r.leb_u32()?;
            let space = match kind {
                ExternalKind::Func => &mut self.module.func_index,
                ExternalKind::Table => &mut self.module.table_index,
                ExternalKind::Memory => &mut self.module.memory_index,
                ExternalKind::Global => &mut self.module.global_index,
                ExternalKind::Except => &mut self.module.except_index,
            };
            match space.get_mut(object as usize) {
                Some(entry) => entry.exported = true,
                None => {
                    return Err(DecodeError::new(
                        format!("unknown {} in export", kind.name()),
                        at,
                    ))
                }
            }
            self.module.exports.push(Export { name, kind, object });
        }
        Ok(())
    }

    fn read_start(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let at = r.pos();
        let index = r.leb_u32()?;
        match self.module.func_signature(index) {
            Some(sig) if sig.params.is_empty() && sig.results.is_empty() => {}
            _ => return Err(DecodeError::new("start function", at)),
        }
        self.module.start = Some(index);
        Ok(())
    }

    fn read_elements(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        for _ in 0..count {
            let at = r.pos();
            let table = r.leb_u32()?;
            if self.module.table_index.get(table as usize).is_none() {
                return Err(DecodeError::new("unknown table", at));
            }
            let offset = self.read_init_expr(r, Type::I32)?.value.u32();
            let len = r.leb_u32()?;
            let mut values = Vec::with_capacity(len.min(4096) as usize);
            for _ in 0..len {
                let at = r.pos();
                let func = r.leb_u32()?;
                if self.module.func_index.get(func as usize).is_none() {
                    return Err(DecodeError::new("unknown function", at));
                }
                values.push(func);
            }
            self.module.elements.push(ElemSegment { table, offset, values });
        }
        Ok(())
    }

    fn read_code(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        self.code_entries = count;
        if count != self.declared_funcs {
            return Err(DecodeError::new(
                "function and code section have inconsistent lengths",
                r.pos(),
            ));
        }
        if self.options.features.stack_pointer {
            self.module.stack_pointer_global = self.find_stack_pointer_global();
        }
        for i in 0..count {
            let size = r.leb_u32()? as usize;
            let mut body = r.sub(size)?;

            let func_index = i as usize;
            let sig_index = self.module.funcs[func_index].sig;
            let sig = self.module.signatures[sig_index as usize].clone();

            let mut locals: Vec<Type> = sig.params.clone();
            let group_count = body.leb_u32()?;
            for _ in 0..group_count {
                let at = body.pos();
                let n = body.leb_u32()?;
                let ty = self.read_value_type(&mut body)?;
                if locals.len() as u32 + n > MAX_LOCALS {
                    return Err(DecodeError::new("too many locals", at));
                }
                locals.extend(std::iter::repeat(ty).take(n as usize));
            }

            let assembler = FuncAssembler::new(
                &self.module,
                &sig,
                &locals,
                self.options.features,
                self.module.stack_pointer_global,
            );
            let opcodes = assembler.run(&mut body)?;
            let func = &mut self.module.funcs[func_index];
            func.locals = locals;
            func.opcodes = opcodes;
        }
        Ok(())
    }

    /// The shadow-stack-pointer convention: the first private mutable i32
    /// global defined by the module itself.
    fn find_stack_pointer_global(&self) -> Option<Index> {
        for (space, entry) in self.module.global_index.iter().enumerate() {
            if entry.import || entry.exported {
                continue;
            }
            let g = &self.module.globals[entry.index as usize];
            if g.ty == Type::I32 && g.mutable {
                return Some(space as Index);
            }
        }
        None
    }

    fn read_data(&mut self, r: &mut Reader) -> Result<(), DecodeError> {
        let count = r.leb_u32()?;
        for _ in 0..count {
            let at = r.pos();
            let memory = r.leb_u32()?;
            if self.module.memory_index.get(memory as usize).is_none() {
                return Err(DecodeError::new("unknown memory", at));
            }
            let offset = self.read_init_expr(r, Type::I32)?.value.u32();
            let len = r.leb_u32()? as usize;
            let data = r.bytes(len)?.to_vec();
            self.module.data.push(DataSegment { memory, offset, data });
        }
        Ok(())
    }
}
