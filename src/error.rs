use crate::resources::ResourceId;
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("unknown i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("no resource fork found in {0}")]
    NoResourceFork(String),
    #[error("not a MacBinary file: {0}")]
    NotMacBinary(&'static str),
    #[error("not an AppleDouble file: {0}")]
    NotAppleDouble(&'static str),
    #[error("bad fork data offset ({0})")]
    BadDataOffset(u32),
    #[error("bad fork map offset ({0})")]
    BadMapOffset(u32),
    #[error("bad resource type list offset ({0})")]
    BadTypeListOffset(u16),
    #[error("resource {0} not found")]
    NotFound(ResourceId),
    #[error("no resource named \"{0}\"")]
    NotFoundNamed(String),
    #[error("resource {0} data is truncated")]
    TruncatedResource(ResourceId),

    #[error("CODE0 segment contains only {0} bytes")]
    Code0TooSmall(u32),
    #[error("CODE0 jump table size ({0}) is not a multiple of 8")]
    MisalignedJumpTable(u32),
    #[error("CODE0 size above A5 ({size_above_a5}) does not match jump table size {jump_table_size} + offset {jump_table_offset}")]
    BadSizeAboveA5 {
        size_above_a5: u32,
        jump_table_size: u32,
        jump_table_offset: u32,
    },
    #[error("CODE0 jump table needs {needed} bytes but the segment only has {available}")]
    Code0JumpTableTruncated { needed: u32, available: u32 },
    #[error("CODE0 segment size ({0}) is odd")]
    OddSegmentSize(u64),
    #[error("CODE0 segment size ({0}) overflows 32 bits")]
    SegmentSizeOverflow(u64),

    #[error("CODE segment contains only {0} bytes")]
    CodeTooSmall(u32),
    #[error("CODE segment has invalid jump table offset {0}")]
    MisalignedSegmentOffset(u32),
    #[error("CODE segment claims {entries} jump table entries at offset {offset} but the jump table only has size {table_size}")]
    JumpTableOutOfRange {
        offset: u32,
        entries: u32,
        table_size: u32,
    },
    #[error("CODE32 segment has invalid relocation data offset {0}")]
    BadRelocationDataOffset(u32),
    #[error("CODE32 segment has invalid relocation offset {0}")]
    BadRelocationOffset(u32),
    #[error("CODE segment has size {size}, but the memory only has a size of {memory}")]
    SegmentTooBig { size: u32, memory: u32 },

    #[error("jump table entry {0} is out of range")]
    EntryOutOfRange(usize),
    #[error("jump table entry {0} is loaded already")]
    EntryAlreadyLoaded(usize),
    #[error("jump table entry {entry} references segment {referenced} and not segment {segment}")]
    EntrySegmentMismatch {
        entry: usize,
        referenced: u16,
        segment: u16,
    },

    #[error("decoder ran past the end of its input at offset {0}")]
    InputOverrun(usize),
    #[error("decoder ran outside the memory image at offset {0}")]
    ImageOverrun(usize),
    #[error("invalid DATA00 code {0}")]
    BadData00Code(u8),
    #[error("DATA00 region offset {0} is outside the image")]
    BadRegionOffset(i32),
    #[error("A5 world size {data_size} exceeds the application globals size {globals}")]
    A5WorldTooBig { data_size: u32, globals: u32 },

    #[error("no CODE 0 segment in {0}")]
    MissingCode0(String),
    #[error("CODE segment {id} loading error: {source}")]
    Segment { id: u16, source: Box<Error> },
}
