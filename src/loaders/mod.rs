mod a5init;
mod data00;

pub use a5init::A5InitLoader;
pub use data00::Data00Loader;

use crate::{error::Result, resources::ResourceFork, segments::Code0Segment};
use std::{fs::File, io::Write};

/// Everything a static data loader may touch while it handles one freshly
/// written segment. The mutable pieces are borrowed for the duration of the
/// call only; loaders never store a back-reference to the executable.
pub struct LoadContext<'a> {
    pub fork: &'a ResourceFork<File>,
    pub code0: &'a mut Code0Segment,
    pub memory: &'a mut [u8],
    pub info: &'a mut dyn Write,
}

/// A loader for static data carried by a particular CODE segment, like the
/// compressed A5 world or a late-initialized jump table.
pub trait StaticDataLoader {
    fn name(&self) -> &'static str;

    /// Clears any state left over from probing a previous segment.
    fn reset(&mut self) {}

    fn is_supported(
        &mut self,
        ctx: &mut LoadContext<'_>,
        name: &str,
        offset: u32,
        size: u32,
    ) -> bool;

    fn load(&mut self, ctx: &mut LoadContext<'_>, offset: u32, size: u32) -> Result<()>;
}

/// The ordered loader list. The first loader that recognizes a segment
/// handles it; a segment nobody recognizes is simply plain code.
pub struct StaticDataLoaderManager {
    loaders: Vec<Box<dyn StaticDataLoader>>,
}

impl StaticDataLoaderManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loaders: vec![
                Box::new(A5InitLoader::new()),
                Box::new(Data00Loader::new()),
            ],
        }
    }

    pub fn load_from_segment(
        &mut self,
        ctx: &mut LoadContext<'_>,
        name: &str,
        offset: u32,
        size: u32,
    ) -> Result<bool> {
        for loader in &mut self.loaders {
            loader.reset();

            if loader.is_supported(ctx, name, offset, size) {
                writeln!(
                    ctx.info,
                    "Loading data from segment \"{}\" with loader: \"{}\"",
                    name,
                    loader.name()
                )?;
                loader.load(ctx, offset, size)?;
                return Ok(true);
            }
        }

        Ok(false)
    }
}

impl Default for StaticDataLoaderManager {
    fn default() -> Self {
        Self::new()
    }
}
