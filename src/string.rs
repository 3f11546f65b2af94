use encoding::{DecoderTrap, Encoding, EncodingRef};
use std::io::{self, Read};

pub(crate) trait StringReadExt: Read {
    #[inline]
    fn read_pascal_str(&mut self, decoder: EncodingRef) -> io::Result<String> {
        let mut size = [0; 1];
        self.read_exact(&mut size)?;
        let mut raw = vec![0; usize::from(size[0])];
        self.read_exact(&mut raw)?;
        decoder.decode(&raw, DecoderTrap::Replace)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.into_owned()))
    }
}

impl<T: Read + ?Sized> StringReadExt for T {}
