use crate::{
    bytes,
    error::{Error, Result},
    rsid,
    segments::Code0Segment,
};
use std::io::Write;
use super::{LoadContext, StaticDataLoader};

const CODE_TAG: u32 = 0x434F_4445;
const DATA_TAG: u32 = 0x4441_5441;

/// Loader for the DATA 0 resource paired with a DATA00 code segment.
///
/// The resource holds three regions of a small byte code program that fills
/// the globals around the A5 base and, for some executables, the part of the
/// jump table that CODE 0 left blank.
pub struct Data00Loader {
    data00: Option<Vec<u8>>,
}

impl Data00Loader {
    #[must_use]
    pub fn new() -> Self {
        Self { data00: None }
    }
}

impl Default for Data00Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticDataLoader for Data00Loader {
    fn name(&self) -> &'static str {
        "DATA00 loader"
    }

    fn reset(&mut self) {
        self.data00 = None;
    }

    fn is_supported(
        &mut self,
        ctx: &mut LoadContext<'_>,
        _name: &str,
        offset: u32,
        _size: u32,
    ) -> bool {
        let memory: &[u8] = ctx.memory;
        let offset = offset as usize;

        // TODO: This detection heuristic is probably all wrong...
        if memory.len() < offset + 0x210 {
            return false;
        }
        if bytes::read_u16_at(memory, offset).ok() != Some(0) {
            return false;
        }
        if bytes::read_u16_at(memory, offset + 2).ok() != Some(1) {
            return false;
        }
        if bytes::read_u32_at(memory, offset + 0x0A).ok() != Some(CODE_TAG) {
            return false;
        }
        if bytes::read_u32_at(memory, offset + 0x44).ok() != Some(DATA_TAG) {
            return false;
        }

        match ctx.fork.data(rsid!(b"DATA", 0)) {
            Ok(data) => {
                self.data00 = Some(data);
                true
            }
            Err(_) => false,
        }
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>, _offset: u32, _size: u32) -> Result<()> {
        let data = match self.data00.take() {
            Some(data) => data,
            None => return Err(Error::NotFound(rsid!(b"DATA", 0))),
        };

        uncompress(ctx.code0, ctx.memory, ctx.info, &data)
    }
}

fn uncompress(
    code0: &mut Code0Segment,
    memory: &mut [u8],
    info: &mut dyn Write,
    data: &[u8],
) -> Result<()> {
    let a5_base = i64::from(code0.application_globals_size());
    let mut src = 4;
    let mut wrote_jump_table = false;

    for _ in 0..3 {
        let region_offset = bytes::read_u32(data, &mut src)? as i32;

        let dst_start = a5_base + i64::from(region_offset);
        if dst_start < 0 || dst_start > memory.len() as i64 {
            return Err(Error::BadRegionOffset(region_offset));
        }
        let mut dst = dst_start as usize;

        // Offsets reaching past the application parameters land on the
        // uninitialized tail of the jump table
        if i64::from(region_offset) >= i64::from(code0.application_parameters_size()) + 8 {
            writeln!(info, "\tData write to jump table offset: {}", region_offset)?;
            wrote_jump_table = true;
        }

        loop {
            let code = bytes::read_u8(data, &mut src)?;

            if code & 0x80 != 0 {
                let count = usize::from(code & 0x7F) + 1;
                copy_literal(memory, &mut dst, data, &mut src, count)?;
            } else if code & 0x40 != 0 {
                let count = usize::from(code & 0x3F) + 1;
                fill(memory, &mut dst, count, 0x00)?;
            } else if code & 0x20 != 0 {
                let count = usize::from(code & 0x1F) + 2;
                let value = bytes::read_u8(data, &mut src)?;
                fill(memory, &mut dst, count, value)?;
            } else if code & 0x10 != 0 {
                let count = usize::from(code & 0x0F) + 1;
                fill(memory, &mut dst, count, 0xFF)?;
            } else if code == 0 {
                break;
            } else if code <= 4 {
                let entry = jump_table_template(code, data, &mut src)?;
                if dst + 8 > memory.len() {
                    return Err(Error::ImageOverrun(dst));
                }
                memory[dst..dst + 8].copy_from_slice(&entry);
                dst += 8;
            } else {
                return Err(Error::BadData00Code(code));
            }
        }
    }

    if wrote_jump_table {
        // Pull the table content the program produced back into the CODE 0
        // entries so the final jump table write and any dump reflect it
        let table_start = code0.jump_table_image_offset() as usize;
        for index in 1..code0.jump_table_entry_count() {
            let at = table_start + index * 8;
            if at + 8 > memory.len() {
                return Err(Error::ImageOverrun(at));
            }
            let mut raw = [0; 8];
            raw.copy_from_slice(&memory[at..at + 8]);
            code0.entry_mut(index)?.set_raw(raw);
        }

        code0.output_jump_table(info)?;
    }

    Ok(())
}

/// Emits one of the four 8-byte jump table entry templates; `?` marks the
/// bytes pulled from the input stream:
///
/// ```text
/// 1: 00 00 00 00 FF FF ?  ?
/// 2: 00 00 00 00 FF ?  ?  ?
/// 3: A9 F0 00 00 ?  ?  00 ?
/// 4: A9 F0 00 ?  ?  ?  00 ?
/// ```
fn jump_table_template(code: u8, data: &[u8], src: &mut usize) -> Result<[u8; 8]> {
    let mut next = || bytes::read_u8(data, src);
    Ok(match code {
        1 => [0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, next()?, next()?],
        2 => [0x00, 0x00, 0x00, 0x00, 0xFF, next()?, next()?, next()?],
        3 => [0xA9, 0xF0, 0x00, 0x00, next()?, next()?, 0x00, next()?],
        4 => [0xA9, 0xF0, 0x00, next()?, next()?, next()?, 0x00, next()?],
        _ => unreachable!("template codes are 1 through 4"),
    })
}

fn fill(memory: &mut [u8], dst: &mut usize, count: usize, value: u8) -> Result<()> {
    let end = dst
        .checked_add(count)
        .filter(|&end| end <= memory.len())
        .ok_or(Error::ImageOverrun(*dst))?;
    for byte in &mut memory[*dst..end] {
        *byte = value;
    }
    *dst = end;
    Ok(())
}

fn copy_literal(
    memory: &mut [u8],
    dst: &mut usize,
    data: &[u8],
    src: &mut usize,
    count: usize,
) -> Result<()> {
    let src_end = src
        .checked_add(count)
        .filter(|&end| end <= data.len())
        .ok_or(Error::InputOverrun(*src))?;
    let dst_end = dst
        .checked_add(count)
        .filter(|&end| end <= memory.len())
        .ok_or(Error::ImageOverrun(*dst))?;
    memory[*dst..dst_end].copy_from_slice(&data[*src..src_end]);
    *src = src_end;
    *dst = dst_end;
    Ok(())
}
