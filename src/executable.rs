use crate::{
    error::{Error, Result},
    loaders::{LoadContext, StaticDataLoaderManager},
    resources::{ResourceFork, ResourceId},
    segments::{Code0Segment, CodeSegment},
    types::os_type::OSType,
};
use std::{collections::BTreeMap, fs::{self, File}, io::{self, Write}, path::Path};

const CODE_TAG: OSType = OSType::new(*b"CODE");

/// Loading behavior knobs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoadOptions {
    /// Log static data loader failures and keep going instead of aborting.
    /// CODE segment failures stay fatal either way.
    pub lenient_static_data: bool,
}

/// A Macintosh m68k executable.
///
/// Owns the resource fork, the CODE 0 segment and every other CODE segment,
/// and produces the memory image the legacy segment loader would have built
/// at process start.
#[derive(Debug)]
pub struct Executable {
    fork: ResourceFork<File>,
    code0: Code0Segment,
    segments: BTreeMap<u16, CodeSegment>,
    segments_size: u32,
    options: LoadOptions,
}

impl Executable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, LoadOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let fork = ResourceFork::open(path)?;

        let code0_data = fork
            .data(ResourceId(CODE_TAG, 0))
            .map_err(|_| Error::MissingCode0(path.display().to_string()))?;
        let code0 = Code0Segment::new(&code0_data)?;

        let mut segments = BTreeMap::new();
        let mut segments_size = 0u32;
        for id in fork.ids_of(CODE_TAG) {
            // CODE 0 is the jump table segment handled above
            if id == 0 {
                continue;
            }

            let data = fork.data(ResourceId(CODE_TAG, id))?;
            let name = fork
                .name_of(ResourceId(CODE_TAG, id))
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_{:02}.dat", CODE_TAG, id));
            let segment = CodeSegment::new(&code0, id, name, data)
                .map_err(|error| Error::Segment { id, source: Box::new(error) })?;
            segments_size += segment.segment_size();
            segments.insert(id, segment);
        }

        Ok(Self {
            fork,
            code0,
            segments,
            segments_size,
            options,
        })
    }

    #[must_use]
    pub fn resource_fork(&self) -> &ResourceFork<File> {
        &self.fork
    }

    #[must_use]
    pub fn code0(&self) -> &Code0Segment {
        &self.code0
    }

    /// Writes the segment headers, the jump table and the resource listing
    /// to the given sink.
    pub fn output_info(&self, out: &mut dyn Write) -> io::Result<()> {
        self.code0.output_header(out)?;
        self.code0.output_jump_table(out)?;
        for segment in self.segments.values() {
            segment.output_header(out)?;
        }
        self.fork.output_listing(out)
    }

    /// Builds the memory image and streams it to `path`. Nothing is written
    /// when building fails.
    pub fn write_memory_dump(
        &mut self,
        path: impl AsRef<Path>,
        out: &mut dyn Write,
    ) -> Result<()> {
        let memory = self.load_into_memory(out)?;
        fs::write(path, &memory)?;
        Ok(())
    }

    /// Builds the memory image: every CODE segment at its running offset with
    /// the jump table patches applied, static data expanded, and the CODE 0
    /// regions written last.
    pub fn load_into_memory(&mut self, out: &mut dyn Write) -> Result<Vec<u8>> {
        let memory_size = (self.code0.segment_size() + self.segments_size) as usize;
        let mut memory = vec![0; memory_size];

        writeln!(out, "A5 base is at 0x{:08X}", self.code0.application_globals_size())?;
        writeln!(out, "Jump table starts at 0x{:08X}", self.code0.jump_table_image_offset())?;
        writeln!(out, "Number of jump table entries {}", self.code0.jump_table_entry_count())?;

        let mut loaders = StaticDataLoaderManager::new();
        let mut offset = self.code0.segment_size();

        for (&id, segment) in &self.segments {
            segment
                .load_into(&mut self.code0, &mut memory, offset)
                .map_err(|error| Error::Segment { id, source: Box::new(error) })?;
            writeln!(
                out,
                "Segment {} \"{}\" starts at offset 0x{:08X}",
                id,
                segment.name(),
                offset
            )?;

            let loaded = loaders.load_from_segment(
                &mut LoadContext {
                    fork: &self.fork,
                    code0: &mut self.code0,
                    memory: &mut memory,
                    info: &mut *out,
                },
                segment.name(),
                offset,
                segment.segment_size(),
            );
            if let Err(error) = loaded {
                if self.options.lenient_static_data {
                    writeln!(out, "Static data loading failed for segment {}: {}", id, error)?;
                } else {
                    return Err(error);
                }
            }

            offset += segment.segment_size();
        }

        self.code0.write_into(&mut memory)?;
        Ok(memory)
    }
}
