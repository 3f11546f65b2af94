//! Bounds-checked big-endian access over borrowed byte slices.
//!
//! The static data decoders walk a source cursor and a destination cursor
//! over the same memory image; both are plain indices validated by these
//! helpers so that hostile input fails with an error instead of running
//! outside the buffer.

use byteorder::{BigEndian, ByteOrder};
use crate::{Error, Result};

pub(crate) fn read_u8(data: &[u8], pos: &mut usize) -> Result<u8> {
    let value = *data.get(*pos).ok_or(Error::InputOverrun(*pos))?;
    *pos += 1;
    Ok(value)
}

pub(crate) fn peek_u8(data: &[u8], pos: usize) -> Result<u8> {
    data.get(pos).copied().ok_or(Error::InputOverrun(pos))
}

pub(crate) fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32> {
    let value = read_u32_at(data, *pos)?;
    *pos += 4;
    Ok(value)
}

pub(crate) fn read_u16_at(data: &[u8], pos: usize) -> Result<u16> {
    if pos.checked_add(2).map_or(true, |end| end > data.len()) {
        return Err(Error::InputOverrun(pos));
    }
    Ok(BigEndian::read_u16(&data[pos..]))
}

pub(crate) fn read_u32_at(data: &[u8], pos: usize) -> Result<u32> {
    if pos.checked_add(4).map_or(true, |end| end > data.len()) {
        return Err(Error::InputOverrun(pos));
    }
    Ok(BigEndian::read_u32(&data[pos..]))
}

pub(crate) fn write_u16_at(data: &mut [u8], pos: usize, value: u16) -> Result<()> {
    if pos.checked_add(2).map_or(true, |end| end > data.len()) {
        return Err(Error::ImageOverrun(pos));
    }
    BigEndian::write_u16(&mut data[pos..], value);
    Ok(())
}

pub(crate) fn write_u32_at(data: &mut [u8], pos: usize, value: u32) -> Result<()> {
    if pos.checked_add(4).map_or(true, |end| end > data.len()) {
        return Err(Error::ImageOverrun(pos));
    }
    BigEndian::write_u32(&mut data[pos..], value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        let mut pos = 0;
        assert_eq!(read_u8(&data, &mut pos).unwrap(), 0x12);
        assert_eq!(read_u32(&data, &mut pos).unwrap(), 0x3456_789A);
        assert_eq!(pos, 5);
        assert!(read_u8(&data, &mut pos).is_err());
    }

    #[test]
    fn at_reads_do_not_advance() {
        let data = [0x00, 0x01, 0x02, 0x03];
        assert_eq!(read_u16_at(&data, 1).unwrap(), 0x0102);
        assert_eq!(read_u32_at(&data, 0).unwrap(), 0x0001_0203);
        assert!(read_u32_at(&data, 1).is_err());
    }

    #[test]
    fn bounded_writes() {
        let mut data = [0; 4];
        write_u32_at(&mut data, 0, 0x4EF9_0010).unwrap();
        assert_eq!(data, [0x4E, 0xF9, 0x00, 0x10]);
        assert!(write_u16_at(&mut data, 3, 0).is_err());
    }
}
