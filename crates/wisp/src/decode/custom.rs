//! Recognized custom sections: `name` (function names), `linking`
//! (DataSize only), `reloc.*` and `exception` (accepted, not applied).

use crate::decode::reader::Reader;
use crate::error::DecodeError;
use crate::module::Module;

const NAME_SUBSECTION_FUNCTION: u32 = 1;

const LINKING_ENTRY_DATA_SIZE: u32 = 3;

pub(crate) fn read_name_section(r: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    while !r.is_done() {
        let id = r.leb_u32()?;
        let size = r.leb_u32()? as usize;
        let mut sub = r.sub(size)?;
        if id != NAME_SUBSECTION_FUNCTION {
            continue;
        }
        let count = sub.leb_u32()?;
        for _ in 0..count {
            let at = sub.pos();
            let space_index = sub.leb_u32()?;
            let name = sub.name()?.to_string();
            let entry = module
                .func_index
                .get(space_index as usize)
                .copied()
                .ok_or_else(|| DecodeError::new("unknown function in name section", at))?;
            if !entry.import {
                if let Some(func) = module.funcs.get_mut(entry.index as usize) {
                    func.name = Some(name);
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn read_linking_section(r: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    while !r.is_done() {
        let entry = r.leb_u32()?;
        let size = r.leb_u32()? as usize;
        let mut sub = r.sub(size)?;
        if entry == LINKING_ENTRY_DATA_SIZE {
            module.data_size = Some(sub.leb_u32()?);
        }
    }
    Ok(())
}

/// Relocations are advisory here; the content is validated as readable and
/// otherwise ignored.
pub(crate) fn read_reloc_section(r: &mut Reader) -> Result<(), DecodeError> {
    let _section = r.leb_u32()?;
    let count = r.leb_u32()?;
    for _ in 0..count {
        let _ty = r.leb_u32()?;
        let _offset = r.leb_u32()?;
        let _index = r.leb_u32()?;
    }
    // Trailing addends for reloc types that carry them; accept anything.
    let rest = r.remaining();
    r.skip(rest)
}

pub(crate) fn read_exception_section(r: &mut Reader) -> Result<(), DecodeError> {
    let rest = r.remaining();
    r.skip(rest)
}
