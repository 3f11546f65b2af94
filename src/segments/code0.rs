use byteorder::{BigEndian, ByteOrder};
use crate::error::{Error, Result};
use std::io::{self, Write};
use super::jump_table::JumpTableEntry;

const HEADER_SIZE: usize = 16;

/// The CODE 0 segment: sizing header plus the full jump table.
///
/// In the output image the segment turns into three regions: zeroed
/// application globals, zeroed application parameters and the jump table.
/// The jump table entries are patched in place while the other segments load,
/// so the segment is written to the image last.
#[derive(Debug)]
pub struct Code0Segment {
    jump_table: Vec<JumpTableEntry>,
    size_above_a5: u32,
    application_globals_size: u32,
    jump_table_size: u32,
    jump_table_offset: u32,
    only_first_entry_initialized: bool,
}

impl Code0Segment {
    pub fn new(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + JumpTableEntry::SIZE {
            return Err(Error::Code0TooSmall(data.len() as u32));
        }

        let size_above_a5 = BigEndian::read_u32(&data[0..]);
        let application_globals_size = BigEndian::read_u32(&data[4..]);
        let jump_table_size = BigEndian::read_u32(&data[8..]);
        let jump_table_offset = BigEndian::read_u32(&data[12..]);

        if jump_table_size % 8 != 0 {
            return Err(Error::MisalignedJumpTable(jump_table_size));
        }

        if u64::from(jump_table_size) + u64::from(jump_table_offset) != u64::from(size_above_a5) {
            return Err(Error::BadSizeAboveA5 {
                size_above_a5,
                jump_table_size,
                jump_table_offset,
            });
        }

        if u64::from(jump_table_size) > (data.len() - HEADER_SIZE) as u64 {
            return Err(Error::Code0JumpTableTruncated {
                needed: jump_table_size,
                available: (data.len() - HEADER_SIZE) as u32,
            });
        }

        let segment_size = u64::from(application_globals_size)
            + u64::from(jump_table_offset)
            + u64::from(jump_table_size);
        if segment_size > u64::from(u32::MAX) {
            return Err(Error::SegmentSizeOverflow(segment_size));
        }
        if segment_size & 1 != 0 {
            return Err(Error::OddSegmentSize(segment_size));
        }

        let jump_table = data[HEADER_SIZE..HEADER_SIZE + jump_table_size as usize]
            .chunks_exact(JumpTableEntry::SIZE)
            .map(|chunk| {
                let mut raw = [0; 8];
                raw.copy_from_slice(chunk);
                JumpTableEntry::new(raw)
            })
            .collect::<Vec<_>>();

        // A table where everything but entry 0 is blank means the real table
        // content arrives later through the DATA 0 resource
        let only_first_entry_initialized =
            jump_table.iter().skip(1).all(JumpTableEntry::is_zeroed);

        Ok(Self {
            jump_table,
            size_above_a5,
            application_globals_size,
            jump_table_size,
            jump_table_offset,
            only_first_entry_initialized,
        })
    }

    #[must_use]
    pub fn jump_table_size(&self) -> u32 {
        (self.jump_table.len() * JumpTableEntry::SIZE) as u32
    }

    #[must_use]
    pub fn jump_table_entry_count(&self) -> usize {
        self.jump_table.len()
    }

    #[must_use]
    pub fn application_globals_size(&self) -> u32 {
        self.application_globals_size
    }

    #[must_use]
    pub fn application_parameters_size(&self) -> u32 {
        self.jump_table_offset
    }

    /// The offset of the jump table in the output image.
    #[must_use]
    pub fn jump_table_image_offset(&self) -> u32 {
        self.application_globals_size + self.jump_table_offset
    }

    #[must_use]
    pub fn segment_size(&self) -> u32 {
        self.jump_table_size() + self.application_globals_size + self.jump_table_offset
    }

    #[must_use]
    pub fn is_jump_table_uninitialized(&self) -> bool {
        self.only_first_entry_initialized
    }

    pub fn entry(&self, index: usize) -> Result<&JumpTableEntry> {
        self.jump_table.get(index).ok_or(Error::EntryOutOfRange(index))
    }

    pub fn entry_mut(&mut self, index: usize) -> Result<&mut JumpTableEntry> {
        self.jump_table
            .get_mut(index)
            .ok_or(Error::EntryOutOfRange(index))
    }

    /// Writes the segment into the image.
    ///
    /// The globals and application parameter regions stay zero-filled from
    /// the image allocation unless a static data loader initialized them, so
    /// the only bytes to place here are the jump table entries with every
    /// patch applied. This runs after all other segments for that reason.
    pub fn write_into(&self, memory: &mut [u8]) -> Result<()> {
        if (memory.len() as u64) < u64::from(self.segment_size()) {
            return Err(Error::SegmentTooBig {
                size: self.segment_size(),
                memory: memory.len() as u32,
            });
        }

        let table_start = self.jump_table_image_offset() as usize;
        for (index, entry) in self.jump_table.iter().enumerate() {
            let at = table_start + index * JumpTableEntry::SIZE;
            memory[at..at + JumpTableEntry::SIZE].copy_from_slice(entry.raw());
        }

        Ok(())
    }

    pub fn output_header(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "CODE0 header")?;
        writeln!(out, "Size above A5: {}", self.size_above_a5)?;
        writeln!(out, "Global data size: {}", self.application_globals_size)?;
        writeln!(out, "Jump table size: {}", self.jump_table_size)?;
        writeln!(out, "Jump table offset: {}", self.jump_table_offset)?;
        writeln!(out, "===========")?;
        writeln!(
            out,
            "Only entry 0 initialized: {}",
            if self.only_first_entry_initialized { "yes" } else { "no" }
        )?;
        writeln!(out)
    }

    pub fn output_jump_table(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Jump table entries: {}", self.jump_table.len())?;
        for (index, entry) in self.jump_table.iter().enumerate() {
            write!(out, "Entry {:4}:", index)?;
            for byte in entry.raw() {
                write!(out, " {:02X}", byte)?;
            }
            writeln!(out)?;
        }
        writeln!(out)
    }
}
