use byteorder::{BigEndian, ByteOrder};
use crate::{
    bytes,
    error::{Error, Result},
};
use std::io::{self, Write};
use super::code0::Code0Segment;

const EXTENDED_HEADER_SIZE: usize = 40;

/// A loadable CODE segment (any id other than 0).
///
/// The first two header words either describe the segment's claim on the
/// jump table directly, or mark the segment as a "32-bit" one whose claims
/// and relocation streams live in an extended header.
#[derive(Debug)]
pub struct CodeSegment {
    id: u16,
    name: String,
    jump_table_offset: u16,
    jump_table_entries: u16,
    data: Vec<u8>,
    segment_size: u32,
    is_32bit: bool,
}

impl CodeSegment {
    pub fn new(code0: &Code0Segment, id: u16, name: String, data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::CodeTooSmall(data.len() as u32));
        }

        let jump_table_offset = BigEndian::read_u16(&data[0..]);
        let jump_table_entries = BigEndian::read_u16(&data[2..]);
        let is_32bit = jump_table_offset == 0xFFFF && jump_table_entries == 0x0000;

        let table_size = code0.jump_table_size();
        if is_32bit {
            if data.len() < EXTENDED_HEADER_SIZE {
                return Err(Error::CodeTooSmall(data.len() as u32));
            }

            for &hunk_at in &[4, 12] {
                let offset = BigEndian::read_u32(&data[hunk_at..]);
                let entries = BigEndian::read_u32(&data[hunk_at + 4..]);
                if offset % 8 != 0 {
                    return Err(Error::MisalignedSegmentOffset(offset));
                }
                if u64::from(offset) + u64::from(entries) * 8 > u64::from(table_size) {
                    return Err(Error::JumpTableOutOfRange {
                        offset,
                        entries,
                        table_size,
                    });
                }
            }

            for &reloc_at in &[20, 28] {
                let data_offset = BigEndian::read_u32(&data[reloc_at..]);
                let reloc_offset = BigEndian::read_u32(&data[reloc_at + 4..]);
                if data_offset != 0 && u64::from(data_offset) + 2 > data.len() as u64 {
                    return Err(Error::BadRelocationDataOffset(data_offset));
                }
                if reloc_offset != 0 {
                    return Err(Error::BadRelocationOffset(reloc_offset));
                }
            }
        } else {
            if jump_table_offset % 8 != 0 {
                return Err(Error::MisalignedSegmentOffset(u32::from(jump_table_offset)));
            }
            if u32::from(jump_table_offset) >= table_size
                || u32::from(jump_table_offset) + 8 * u32::from(jump_table_entries) > table_size
            {
                return Err(Error::JumpTableOutOfRange {
                    offset: u32::from(jump_table_offset),
                    entries: u32::from(jump_table_entries),
                    table_size,
                });
            }
        }

        // An odd payload gets one zero byte of padding in the image
        let segment_size = (data.len() + (data.len() & 1)) as u32;

        Ok(Self {
            id,
            name,
            jump_table_offset,
            jump_table_entries,
            data,
            segment_size,
            is_32bit,
        })
    }

    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    #[must_use]
    pub fn is_32bit_segment(&self) -> bool {
        self.is_32bit
    }

    /// Copies the segment into the image at `offset` and patches the jump
    /// table entries it owns.
    pub fn load_into(
        &self,
        code0: &mut Code0Segment,
        memory: &mut [u8],
        offset: u32,
    ) -> Result<()> {
        let memory_size = memory.len() as u32;
        if memory_size
            .checked_sub(offset)
            .map_or(true, |left| left < self.segment_size)
        {
            return Err(Error::SegmentTooBig {
                size: self.segment_size,
                memory: memory_size,
            });
        }

        let at = offset as usize;
        memory[at..at + self.data.len()].copy_from_slice(&self.data);
        if self.segment_size as usize > self.data.len() {
            memory[at + self.data.len()] = 0;
        }

        if self.is_32bit {
            self.initialize_32bit(code0, memory, offset)
        } else {
            self.initialize(code0, offset)
        }
    }

    fn initialize(&self, code0: &mut Code0Segment, offset: u32) -> Result<()> {
        for i in 0..u32::from(self.jump_table_entries) {
            let entry_num = (i + u32::from(self.jump_table_offset) / 8) as usize;
            let entry = code0.entry_mut(entry_num)?;

            if entry.is_loaded() {
                return Err(Error::EntryAlreadyLoaded(entry_num));
            }
            if entry.segment_id() != self.id {
                return Err(Error::EntrySegmentMismatch {
                    entry: entry_num,
                    referenced: entry.segment_id(),
                    segment: self.id,
                });
            }

            // The segment header is part of the image copy, hence the + 4
            entry.load(offset + 4);
        }

        Ok(())
    }

    fn initialize_32bit(
        &self,
        code0: &mut Code0Segment,
        memory: &mut [u8],
        offset: u32,
    ) -> Result<()> {
        let at = offset as usize;

        let hunk_a_offset = bytes::read_u32_at(memory, at + 4)?;
        let hunk_a_count = bytes::read_u32_at(memory, at + 8)?;
        let hunk_b_offset = bytes::read_u32_at(memory, at + 12)?;
        let hunk_b_count = bytes::read_u32_at(memory, at + 16)?;
        self.init_jump_table_block_32bit(code0, hunk_a_offset, hunk_a_count, offset)?;
        self.init_jump_table_block_32bit(code0, hunk_b_offset, hunk_b_count, offset)?;

        let global_delta = (code0.application_globals_size() as i32)
            .wrapping_sub(bytes::read_u32_at(memory, at + 24)? as i32);
        let global_data_offset = bytes::read_u32_at(memory, at + 20)?;
        if global_delta != 0 && global_data_offset != 0 {
            relocate_32bit(memory, at, at + global_data_offset as usize, global_delta)?;
        }

        let stored_base = bytes::read_u32_at(memory, at + 32)?;
        let segment_delta = if stored_base == 0 {
            offset.wrapping_add(EXTENDED_HEADER_SIZE as u32)
        } else {
            offset.wrapping_sub(stored_base)
        };
        let segment_data_offset = bytes::read_u32_at(memory, at + 28)?;
        if segment_delta != 0 && segment_data_offset != 0 {
            relocate_32bit(
                memory,
                at,
                at + segment_data_offset as usize,
                segment_delta as i32,
            )?;
        }

        Ok(())
    }

    fn init_jump_table_block_32bit(
        &self,
        code0: &mut Code0Segment,
        start_offset: u32,
        count: u32,
        offset: u32,
    ) -> Result<()> {
        for i in 0..count {
            let entry_num = (i + start_offset / 8) as usize;
            let entry = code0.entry_mut(entry_num)?;

            if entry.is_loaded_32bit() {
                return Err(Error::EntryAlreadyLoaded(entry_num));
            }
            if entry.segment_id_32bit() != self.id {
                return Err(Error::EntrySegmentMismatch {
                    entry: entry_num,
                    referenced: entry.segment_id_32bit(),
                    segment: self.id,
                });
            }

            entry.load_32bit(offset);
        }

        Ok(())
    }

    pub fn output_header(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "CODE{} \"{}\" header", self.id, self.name)?;
        writeln!(out, "Real segment size: {}", self.data.len())?;
        writeln!(out, "Loaded segment size: {}", self.segment_size)?;
        writeln!(out, "===========")?;
        writeln!(out, "Is 32bit segment: {}", if self.is_32bit { "yes" } else { "no" })?;
        writeln!(out, "Offset to first entry in jump table: {}", self.jump_table_offset)?;
        writeln!(out, "Number of exported functions: {}", self.jump_table_entries)?;
        writeln!(out)
    }
}

/// Applies one 32-bit relocation stream: a sequence of doubled deltas walking
/// a position from the segment base, adding `delta` to the 32-bit word at
/// every stop. A zero byte followed by a zero byte terminates the stream; a
/// zero byte followed by anything else introduces a 32-bit offset.
fn relocate_32bit(memory: &mut [u8], start: usize, mut src: usize, delta: i32) -> Result<()> {
    let mut pos = start;
    loop {
        let first = bytes::read_u8(memory, &mut src)?;
        let off = if first == 0 {
            if bytes::peek_u8(memory, src)? == 0 {
                return Ok(());
            }
            bytes::read_u32(memory, &mut src)? as usize
        } else if first & 0x80 != 0 {
            (usize::from(first & 0x7F) << 8) | usize::from(bytes::read_u8(memory, &mut src)?)
        } else {
            usize::from(first)
        };

        pos = pos
            .checked_add(off * 2)
            .filter(|&p| p + 4 <= memory.len())
            .ok_or(Error::ImageOverrun(pos))?;
        let value = bytes::read_u32_at(memory, pos)?;
        bytes::write_u32_at(memory, pos, value.wrapping_add(delta as u32))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_code0(entries: &[[u8; 8]]) -> Code0Segment {
        let table_size = (entries.len() * 8) as u32;
        let mut data = Vec::new();
        data.extend_from_slice(&(table_size + 8).to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&table_size.to_be_bytes());
        data.extend_from_slice(&8u32.to_be_bytes());
        for entry in entries {
            data.extend_from_slice(entry);
        }
        Code0Segment::new(&data).unwrap()
    }

    fn unloaded(segment_id: u16, function_offset: u16) -> [u8; 8] {
        let mut raw = [0x00, 0x00, 0x3F, 0x3C, 0x00, 0x00, 0xA9, 0xF0];
        raw[..2].copy_from_slice(&function_offset.to_be_bytes());
        raw[4..6].copy_from_slice(&segment_id.to_be_bytes());
        raw
    }

    #[test]
    fn parses_classic_header() {
        let code0 = simple_code0(&[unloaded(1, 0)]);
        let mut data = vec![0x00, 0x00, 0x00, 0x01];
        data.extend_from_slice(&[0xCC; 11]);
        let segment = CodeSegment::new(&code0, 1, "Main".to_string(), data).unwrap();
        assert!(!segment.is_32bit_segment());
        assert_eq!(segment.segment_size(), 16);
    }

    #[test]
    fn rejects_short_segment() {
        let code0 = simple_code0(&[unloaded(1, 0)]);
        assert!(matches!(
            CodeSegment::new(&code0, 1, String::new(), vec![0; 3]),
            Err(Error::CodeTooSmall(3))
        ));
    }

    #[test]
    fn rejects_claim_past_jump_table() {
        let code0 = simple_code0(&[unloaded(1, 0)]);
        let data = vec![0x00, 0x00, 0x00, 0x02];
        assert!(matches!(
            CodeSegment::new(&code0, 1, String::new(), data),
            Err(Error::JumpTableOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_misaligned_claim() {
        let code0 = simple_code0(&[unloaded(1, 0), unloaded(1, 0)]);
        let data = vec![0x00, 0x04, 0x00, 0x01];
        assert!(matches!(
            CodeSegment::new(&code0, 1, String::new(), data),
            Err(Error::MisalignedSegmentOffset(4))
        ));
    }

    #[test]
    fn load_patches_claimed_entries() {
        let mut code0 = simple_code0(&[unloaded(1, 0x10)]);
        let data = vec![0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB, 0xCC, 0xDD];
        let segment = CodeSegment::new(&code0, 1, String::new(), data).unwrap();

        let offset = code0.segment_size();
        let mut memory = vec![0; (offset + segment.segment_size()) as usize];
        segment.load_into(&mut code0, &mut memory, offset).unwrap();

        assert_eq!(&memory[offset as usize..], &[0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB, 0xCC, 0xDD]);
        let entry = code0.entry(0).unwrap();
        assert!(entry.is_loaded());
        let target = BigEndian::read_u32(&entry.raw()[4..]);
        assert_eq!(target, offset + 4 + 0x10);
    }

    #[test]
    fn load_pads_odd_payload() {
        let mut code0 = simple_code0(&[unloaded(1, 0)]);
        let data = vec![0x00, 0x00, 0x00, 0x00, 0xAA];
        let segment = CodeSegment::new(&code0, 1, String::new(), data).unwrap();
        assert_eq!(segment.segment_size(), 6);

        let mut memory = vec![0xEE; 8 + 16 + 6];
        segment.load_into(&mut code0, &mut memory, 24).unwrap();
        assert_eq!(&memory[24..], &[0x00, 0x00, 0x00, 0x00, 0xAA, 0x00]);
    }

    #[test]
    fn load_rejects_segment_id_mismatch() {
        let mut code0 = simple_code0(&[unloaded(2, 0)]);
        let data = vec![0x00, 0x00, 0x00, 0x01];
        let segment = CodeSegment::new(&code0, 1, String::new(), data).unwrap();
        let mut memory = vec![0; 64];
        assert!(matches!(
            segment.load_into(&mut code0, &mut memory, 24),
            Err(Error::EntrySegmentMismatch { entry: 0, referenced: 2, segment: 1 })
        ));
    }

    #[test]
    fn load_rejects_double_claim() {
        let mut code0 = simple_code0(&[unloaded(1, 0)]);
        let data = vec![0x00, 0x00, 0x00, 0x01];
        let segment = CodeSegment::new(&code0, 1, String::new(), data).unwrap();
        let mut memory = vec![0; 64];
        segment.load_into(&mut code0, &mut memory, 24).unwrap();
        assert!(matches!(
            segment.load_into(&mut code0, &mut memory, 32),
            Err(Error::EntryAlreadyLoaded(0))
        ));
    }

    fn far_entry(segment_id: u16, function_offset: u32) -> [u8; 8] {
        let mut raw = [0; 8];
        raw[..2].copy_from_slice(&segment_id.to_be_bytes());
        raw[2..6].copy_from_slice(&function_offset.to_be_bytes());
        raw[6..8].copy_from_slice(&[0xA9, 0xF0]);
        raw
    }

    fn extended_segment(body: &[u8], reloc: &[(usize, &[u8])]) -> Vec<u8> {
        // header words: claim hunk A = entry 0, no hunk B, no relocations
        let mut data = vec![0xFF, 0xFF, 0x00, 0x00];
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&[0; 16]);
        // the code proper starts 40 bytes in
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(body);
        for &(field_at, stream) in reloc {
            let stream_at = data.len() as u32;
            data.extend_from_slice(stream);
            BigEndian::write_u32(&mut data[field_at..], stream_at);
        }
        data
    }

    #[test]
    fn loads_32bit_segment() {
        let mut code0 = simple_code0(&[far_entry(1, 0x44)]);
        let data = extended_segment(&[0x12, 0x34, 0x56, 0x78], &[]);
        let segment = CodeSegment::new(&code0, 1, String::new(), data).unwrap();
        assert!(segment.is_32bit_segment());

        let offset = code0.segment_size();
        let mut memory = vec![0; (offset + segment.segment_size()) as usize];
        segment.load_into(&mut code0, &mut memory, offset).unwrap();

        let entry = code0.entry(0).unwrap();
        assert!(entry.is_loaded_32bit());
        assert_eq!(entry.segment_id_32bit(), 1);
        assert_eq!(BigEndian::read_u32(&entry.raw()[4..]), offset + 0x44);
    }

    #[test]
    fn global_relocation_rewrites_pointers() {
        // globals size is zero, so the stored bias of 0x10 gives delta -0x10
        let mut code0 = simple_code0(&[far_entry(1, 0)]);
        let body = [0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x50];
        // offsets are doubled: 20 steps to body word 0, 2 more to word 1
        let stream = [20, 2, 0x00, 0x00];
        let mut data = extended_segment(&body, &[(20, &stream)]);
        BigEndian::write_u32(&mut data[24..], 0x10);

        let segment = CodeSegment::new(&code0, 1, String::new(), data).unwrap();
        let offset = code0.segment_size();
        let mut memory = vec![0; (offset + segment.segment_size()) as usize];
        segment.load_into(&mut code0, &mut memory, offset).unwrap();

        let at = (offset + 40) as usize;
        assert_eq!(BigEndian::read_u32(&memory[at..]), 0x30);
        assert_eq!(BigEndian::read_u32(&memory[at + 4..]), 0x40);
    }

    #[test]
    fn rejects_nonzero_relocation_offset() {
        let code0 = simple_code0(&[far_entry(1, 0)]);
        let mut data = extended_segment(&[], &[]);
        BigEndian::write_u32(&mut data[32..], 8);
        assert!(matches!(
            CodeSegment::new(&code0, 1, String::new(), data),
            Err(Error::BadRelocationOffset(8))
        ));
    }

    #[test]
    fn relocation_stream_forms() {
        let mut memory = vec![0u8; 64];
        // words at 8, 16: direct and 15-bit offsets
        memory[11] = 1;
        memory[19] = 2;
        // stream at 40: +8 bytes (off 4 doubled), then 15-bit form +8, end
        let stream = [4, 0x80, 4, 0x00, 0x00];
        memory[40..45].copy_from_slice(&stream);
        relocate_32bit(&mut memory, 0, 40, 5).unwrap();
        assert_eq!(BigEndian::read_u32(&memory[8..]), 6);
        assert_eq!(BigEndian::read_u32(&memory[16..]), 7);
    }

    #[test]
    fn relocation_stream_32bit_offset() {
        let mut memory = vec![0u8; 64];
        // a 32-bit offset necessarily has a non-zero high byte (a zero byte
        // after the introducer terminates the stream), so it can only land
        // outside an image this small
        let stream = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        memory[48..55].copy_from_slice(&stream);
        assert!(matches!(
            relocate_32bit(&mut memory, 0, 48, 1),
            Err(Error::ImageOverrun(_))
        ));
    }

    #[test]
    fn relocation_stream_overrun_fails() {
        let mut memory = vec![0u8; 16];
        let stream = [0x7F, 0x00, 0x00];
        memory[8..11].copy_from_slice(&stream);
        assert!(matches!(
            relocate_32bit(&mut memory, 0, 8, 1),
            Err(Error::ImageOverrun(_))
        ));
    }
}
