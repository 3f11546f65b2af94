use byteorder::{BigEndian, ByteOrder};
use byteordered::{ByteOrdered, StaticEndianness};
use encoding::all::MAC_ROMAN;
use crate::{
    error::{Error, Result},
    io::{open_named_fork, stream_len},
    string::StringReadExt,
    types::{os_type::{OSType, OSTypeReadExt}, reader::Reader},
};
use std::{cell::RefCell, fs::File, io::{Read, Seek, SeekFrom, Write, self}, path::Path};
use super::{ResourceFlags, ResourceId};
use unicase::UniCase;

type Input<T> = ByteOrdered<T, StaticEndianness<BigEndian>>;

pub(crate) fn pad128(size: u32) -> u32 {
    ((size + 127) >> 7) << 7
}

/// A Macintosh resource fork reader.
///
/// The fork may live in the file itself, in the file system's named fork
/// side-channel, or inside a MacBinary or AppleDouble wrapper; `open` probes
/// the variants in that order and the first one that parses wins.
#[derive(Debug)]
pub struct ResourceFork<T: Reader> {
    input: RefCell<Input<T>>,
    kinds: Vec<ResourceKind>,
}

#[derive(Debug)]
struct ResourceKind {
    os_type: OSType,
    entries: Vec<ResourceEntry>,
}

#[derive(Debug)]
struct ResourceEntry {
    num: u16,
    name: Option<String>,
    data_offset: u32,
    flags: ResourceFlags,
}

impl ResourceFork<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::open_raw(path)
            .or_else(|_| Self::open_side_channel(path))
            .or_else(|_| Self::open_mac_binary(path))
            .or_else(|_| Self::open_apple_double(path))
            .map_err(|_| Error::NoResourceFork(path.display().to_string()))
    }

    fn open_raw(path: &Path) -> Result<Self> {
        Self::new(File::open(path)?)
    }

    fn open_side_channel(path: &Path) -> Result<Self> {
        Self::new(open_named_fork(path)?)
    }

    fn open_mac_binary(path: &Path) -> Result<Self> {
        Self::with_mac_binary(File::open(path)?)
    }

    fn open_apple_double(path: &Path) -> Result<Self> {
        Self::with_apple_double(File::open(path)?)
    }
}

impl<T: Reader> ResourceFork<T> {
    /// Reads a bare resource fork starting at the beginning of the stream.
    pub fn new(data: T) -> Result<Self> {
        Self::parse(data, 0)
    }

    /// Reads the resource fork out of a MacBinary wrapper.
    pub fn with_mac_binary(mut data: T) -> Result<Self> {
        const INFO_HEADER_SIZE: u32 = 128;

        let file_size = stream_len(&mut data)?;
        data.seek(SeekFrom::Start(0))?;
        let mut header = [0; INFO_HEADER_SIZE as usize];
        data.read_exact(&mut header).map_err(|_| Error::NotMacBinary("file too small"))?;

        if header[0] != 0 || header[74] != 0 || header[82] != 0 {
            return Err(Error::NotMacBinary("bad magic byte"));
        }
        if header[1] > 63 {
            return Err(Error::NotMacBinary("bad filename length"));
        }

        let data_size = BigEndian::read_u32(&header[83..]);
        let rsrc_size = BigEndian::read_u32(&header[87..]);
        let expected_size = u64::from(INFO_HEADER_SIZE)
            + u64::from(pad128(data_size))
            + u64::from(pad128(rsrc_size));
        if expected_size != file_size {
            return Err(Error::NotMacBinary("bad fork lengths"));
        }

        Self::parse(data, INFO_HEADER_SIZE + pad128(data_size))
    }

    /// Reads the resource fork out of an AppleDouble wrapper.
    pub fn with_apple_double(data: T) -> Result<Self> {
        const MAGIC: u32 = 0x0005_1607;
        const RESOURCE_FORK_ENTRY: u32 = 2;

        let mut input = ByteOrdered::be(data);
        input.seek(SeekFrom::Start(0))?;
        if input.read_u32().map_err(|_| Error::NotAppleDouble("file too small"))? != MAGIC {
            return Err(Error::NotAppleDouble("bad magic"));
        }

        // version + home file system
        input.seek(SeekFrom::Current(20))?;

        let num_entries = input.read_u16()?;
        for _ in 0..num_entries {
            let entry_id = input.read_u32()?;
            let offset = input.read_u32()?;
            let _length = input.read_u32()?;

            if entry_id == RESOURCE_FORK_ENTRY {
                return Self::parse(input.into_inner(), offset);
            }
        }

        Err(Error::NotAppleDouble("no resource fork entry"))
    }

    fn parse(mut data: T, start_offset: u32) -> Result<Self> {
        let file_size = stream_len(&mut data)?;
        let mut input = ByteOrdered::be(data);
        input.seek(SeekFrom::Start(start_offset.into()))?;

        let data_offset = input.read_u32()?.wrapping_add(start_offset);
        let map_offset = input.read_u32()?.wrapping_add(start_offset);
        if data_offset == 0 || u64::from(data_offset) >= file_size {
            return Err(Error::BadDataOffset(data_offset));
        }
        if map_offset == 0 || u64::from(map_offset) >= file_size {
            return Err(Error::BadMapOffset(map_offset));
        }

        input.seek(SeekFrom::Start(u64::from(map_offset) + 24))?;
        let type_list_offset = input.read_u16()?;
        let name_list_offset = input.read_u16()?;
        let num_types = u32::from(input.read_u16()?) + 1;

        if type_list_offset == 0
            || u64::from(map_offset) + u64::from(type_list_offset) >= file_size
        {
            return Err(Error::BadTypeListOffset(type_list_offset));
        }

        let mut kinds = Vec::with_capacity(num_types as usize);
        for _ in 0..num_types {
            let os_type = input.read_os_type()?;
            let id_count = u32::from(input.read_u16()?) + 1;
            let id_list_offset = input.read_u16()?;
            let next_type_pos = input.seek(SeekFrom::Current(0))?;

            input.seek(SeekFrom::Start(
                u64::from(map_offset) + u64::from(type_list_offset) + u64::from(id_list_offset),
            ))?;

            let mut entries = Vec::with_capacity(id_count as usize);
            for _ in 0..id_count {
                let num = input.read_u16()?;
                let name_offset = input.read_u16()?;
                let value = input.read_u32()?;
                input.seek(SeekFrom::Current(4))?;

                let (data_offset, flags) = {
                    const OFFSET_BITS: u8 = 24;
                    const OFFSET_MASK: u32 = (1 << OFFSET_BITS) - 1;
                    const FLAGS_MASK: u32 = !OFFSET_MASK;
                    (
                        data_offset.wrapping_add(value & OFFSET_MASK),
                        ResourceFlags::from_bits_truncate(((value & FLAGS_MASK) >> OFFSET_BITS) as u8),
                    )
                };

                let name = if name_list_offset != 0xFFFF && name_offset != 0xFFFF {
                    let entry_pos = input.seek(SeekFrom::Current(0))?;
                    input.seek(SeekFrom::Start(
                        u64::from(map_offset)
                            + u64::from(name_list_offset)
                            + u64::from(name_offset),
                    ))?;
                    let name = input.read_pascal_str(MAC_ROMAN)?;
                    input.seek(SeekFrom::Start(entry_pos))?;
                    if name.is_empty() { None } else { Some(name) }
                } else {
                    None
                };

                entries.push(ResourceEntry { num, name, data_offset, flags });
            }

            kinds.push(ResourceKind { os_type, entries });
            input.seek(SeekFrom::Start(next_type_pos))?;
        }

        Ok(Self {
            input: RefCell::new(input),
            kinds,
        })
    }

    /// Returns `true` if the fork contains the resource with the given ID.
    #[must_use]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.find(id).is_some()
    }

    /// Returns the data of the resource with the given ID.
    pub fn data(&self, id: ResourceId) -> Result<Vec<u8>> {
        let entry = self.find(id).ok_or(Error::NotFound(id))?;
        self.read_blob(id, entry.data_offset)
    }

    /// Returns the data of the first resource of any type with the given
    /// name. Names compare case-insensitively.
    pub fn data_by_name(&self, name: &str) -> Result<Vec<u8>> {
        for kind in &self.kinds {
            if let Some(entry) = find_named(&kind.entries, name) {
                return self.read_blob(ResourceId(kind.os_type, entry.num), entry.data_offset);
            }
        }
        Err(Error::NotFoundNamed(name.to_string()))
    }

    /// Returns the data of the resource with the given type and name.
    pub fn typed_data_by_name(&self, os_type: OSType, name: &str) -> Result<Vec<u8>> {
        self.kinds
            .iter()
            .find(|kind| kind.os_type == os_type)
            .and_then(|kind| find_named(&kind.entries, name))
            .ok_or_else(|| Error::NotFoundNamed(name.to_string()))
            .and_then(|entry| self.read_blob(ResourceId(os_type, entry.num), entry.data_offset))
    }

    /// Returns the stored name of the resource, if it has one.
    #[must_use]
    pub fn name_of(&self, id: ResourceId) -> Option<&str> {
        self.find(id).and_then(|entry| entry.name.as_deref())
    }

    /// Returns every type tag in the fork, in file order.
    pub fn os_types(&self) -> impl Iterator<Item = OSType> + '_ {
        self.kinds.iter().map(|kind| kind.os_type)
    }

    /// Returns the resource numbers of the given type, in file order.
    #[must_use]
    pub fn ids_of(&self, os_type: OSType) -> Vec<u16> {
        self.kinds
            .iter()
            .find(|kind| kind.os_type == os_type)
            .map_or_else(Vec::new, |kind| kind.entries.iter().map(|entry| entry.num).collect())
    }

    /// Writes the per-resource listing to the given sink.
    pub fn output_listing(&self, out: &mut dyn Write) -> io::Result<()> {
        for kind in &self.kinds {
            for entry in &kind.entries {
                write!(out, "{} {:04x}", kind.os_type, entry.num)?;
                if !entry.flags.is_empty() {
                    write!(out, " [{:?}]", entry.flags)?;
                }
                if let Some(name) = &entry.name {
                    write!(out, " - {}", name)?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }

    fn find(&self, id: ResourceId) -> Option<&ResourceEntry> {
        self.kinds
            .iter()
            .find(|kind| kind.os_type == id.0)
            .and_then(|kind| kind.entries.iter().find(|entry| entry.num == id.1))
    }

    fn read_blob(&self, id: ResourceId, data_offset: u32) -> Result<Vec<u8>> {
        let mut input = self.input.borrow_mut();
        input.seek(SeekFrom::Start(data_offset.into()))?;
        let size = input.read_u32()?;
        let mut data = Vec::with_capacity(size as usize);
        input.inner_mut().take(u64::from(size)).read_to_end(&mut data)?;
        if data.len() != size as usize {
            return Err(Error::TruncatedResource(id));
        }
        Ok(data)
    }
}

fn find_named<'a>(entries: &'a [ResourceEntry], name: &str) -> Option<&'a ResourceEntry> {
    entries.iter().find(|entry| {
        entry
            .name
            .as_ref()
            .map_or(false, |n| UniCase::new(n.as_str()) == UniCase::new(name))
    })
}

#[cfg(test)]
mod tests {
    use crate::{os, rsid};
    use std::io::Cursor;
    use super::*;

    // Builds a bare fork: 16-byte header, data section, then the map.
    pub(crate) fn build_fork(resources: &[(&[u8; 4], u16, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut data_section = Vec::new();
        let mut data_offsets = Vec::new();
        for (_, _, _, payload) in resources {
            data_offsets.push(data_section.len() as u32);
            data_section.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            data_section.extend_from_slice(payload);
        }

        let mut types: Vec<(&[u8; 4], Vec<usize>)> = Vec::new();
        for (index, (tag, _, _, _)) in resources.iter().enumerate() {
            match types.iter_mut().find(|(t, _)| t == tag) {
                Some((_, list)) => list.push(index),
                None => types.push((*tag, vec![index])),
            }
        }

        let num_types = types.len();
        let num_resources = resources.len();
        let id_lists_start = 2 + 8 * num_types;
        let name_list_offset = 28 + id_lists_start + 12 * num_resources;

        let mut names = Vec::new();
        let mut name_offsets = vec![0xFFFFu16; num_resources];
        for (index, (_, _, name, _)) in resources.iter().enumerate() {
            if let Some(name) = name {
                name_offsets[index] = names.len() as u16;
                names.push(name.len() as u8);
                names.extend_from_slice(name.as_bytes());
            }
        }

        let mut map = vec![0; 24];
        map.extend_from_slice(&28u16.to_be_bytes());
        map.extend_from_slice(&(name_list_offset as u16).to_be_bytes());
        map.extend_from_slice(&((num_types - 1) as u16).to_be_bytes());

        let mut id_list_offset = id_lists_start;
        for (tag, list) in &types {
            map.extend_from_slice(*tag);
            map.extend_from_slice(&((list.len() - 1) as u16).to_be_bytes());
            map.extend_from_slice(&(id_list_offset as u16).to_be_bytes());
            id_list_offset += 12 * list.len();
        }

        for (_, list) in &types {
            for &index in list {
                let (_, num, _, _) = resources[index];
                map.extend_from_slice(&num.to_be_bytes());
                map.extend_from_slice(&name_offsets[index].to_be_bytes());
                map.extend_from_slice(&data_offsets[index].to_be_bytes());
                map.extend_from_slice(&[0; 4]);
            }
        }

        map.extend_from_slice(&names);

        let mut fork = Vec::new();
        fork.extend_from_slice(&16u32.to_be_bytes());
        fork.extend_from_slice(&(16 + data_section.len() as u32).to_be_bytes());
        fork.extend_from_slice(&[0; 8]);
        fork.extend_from_slice(&data_section);
        fork.extend_from_slice(&map);
        fork
    }

    pub(crate) fn wrap_mac_binary(fork: &[u8]) -> Vec<u8> {
        let mut file = vec![0; 128];
        file[1] = 4;
        file[2..6].copy_from_slice(b"test");
        BigEndian::write_u32(&mut file[87..], fork.len() as u32);
        file.extend_from_slice(fork);
        file.resize(128 + pad128(fork.len() as u32) as usize, 0);
        file
    }

    pub(crate) fn wrap_apple_double(fork: &[u8]) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(&0x0005_1607u32.to_be_bytes());
        file.extend_from_slice(&0x0002_0000u32.to_be_bytes());
        file.extend_from_slice(&[0; 16]);
        file.extend_from_slice(&1u16.to_be_bytes());
        file.extend_from_slice(&2u32.to_be_bytes());
        file.extend_from_slice(&38u32.to_be_bytes());
        file.extend_from_slice(&(fork.len() as u32).to_be_bytes());
        file.extend_from_slice(fork);
        file
    }

    #[test]
    fn pad128_rounding() {
        assert_eq!(pad128(0), 0);
        assert_eq!(pad128(1), 128);
        assert_eq!(pad128(128), 128);
        assert_eq!(pad128(129), 256);
        for size in &[0u32, 5, 127, 128, 1000] {
            assert_eq!(pad128(pad128(*size)), pad128(*size));
        }
    }

    #[test]
    fn raw_fork() {
        let fork = build_fork(&[
            (b"CODE", 0, None, b"\x00\x01\x02\x03"),
            (b"CODE", 1, Some("%A5Init"), b"\xAA\xBB"),
            (b"DATA", 0, None, b"\xFF"),
        ]);
        let fork = ResourceFork::new(Cursor::new(fork)).unwrap();

        assert!(fork.contains(rsid!(b"CODE", 0)));
        assert!(fork.contains(rsid!(b"DATA", 0)));
        assert!(!fork.contains(rsid!(b"DATA", 1)));
        assert_eq!(fork.data(rsid!(b"CODE", 0)).unwrap(), b"\x00\x01\x02\x03");
        assert_eq!(fork.data(rsid!(b"CODE", 1)).unwrap(), b"\xAA\xBB");
        assert_eq!(fork.name_of(rsid!(b"CODE", 1)), Some("%A5Init"));
        assert_eq!(fork.name_of(rsid!(b"CODE", 0)), None);
        assert_eq!(fork.ids_of(os!(b"CODE")), vec![0, 1]);
        assert_eq!(fork.os_types().collect::<Vec<_>>(), vec![os!(b"CODE"), os!(b"DATA")]);
    }

    #[test]
    fn fetch_by_name() {
        let fork = build_fork(&[
            (b"CODE", 2, Some("Main"), b"\x11\x22"),
            (b"DATA", 7, Some("Extra"), b"\x33"),
        ]);
        let fork = ResourceFork::new(Cursor::new(fork)).unwrap();

        assert_eq!(fork.data_by_name("main").unwrap(), b"\x11\x22");
        assert_eq!(fork.typed_data_by_name(os!(b"DATA"), "EXTRA").unwrap(), b"\x33");
        assert!(fork.data_by_name("missing").is_err());
        assert!(fork.typed_data_by_name(os!(b"CODE"), "Extra").is_err());
    }

    #[test]
    fn mac_binary_fork() {
        let fork = build_fork(&[(b"CODE", 0, None, b"\x01\x02")]);
        let file = wrap_mac_binary(&fork);
        let fork = ResourceFork::with_mac_binary(Cursor::new(file)).unwrap();
        assert_eq!(fork.data(rsid!(b"CODE", 0)).unwrap(), b"\x01\x02");
    }

    #[test]
    fn mac_binary_rejects_bad_size() {
        let fork = build_fork(&[(b"CODE", 0, None, b"\x01\x02")]);
        let mut file = wrap_mac_binary(&fork);
        file.push(0);
        assert!(matches!(
            ResourceFork::with_mac_binary(Cursor::new(file)),
            Err(Error::NotMacBinary(_))
        ));
    }

    #[test]
    fn mac_binary_rejects_bad_magic() {
        let fork = build_fork(&[(b"CODE", 0, None, b"\x01\x02")]);
        let mut file = wrap_mac_binary(&fork);
        file[74] = 1;
        assert!(matches!(
            ResourceFork::with_mac_binary(Cursor::new(file)),
            Err(Error::NotMacBinary(_))
        ));
    }

    #[test]
    fn apple_double_fork() {
        let fork = build_fork(&[(b"CODE", 0, None, b"\x01\x02")]);
        let file = wrap_apple_double(&fork);
        let fork = ResourceFork::with_apple_double(Cursor::new(file)).unwrap();
        assert_eq!(fork.data(rsid!(b"CODE", 0)).unwrap(), b"\x01\x02");
    }

    #[test]
    fn apple_double_rejects_bad_magic() {
        assert!(matches!(
            ResourceFork::with_apple_double(Cursor::new(b"\x00\x05\x16\x00rest".to_vec())),
            Err(Error::NotAppleDouble(_))
        ));
    }

    #[test]
    fn rejects_bad_map_offset() {
        let mut fork = build_fork(&[(b"CODE", 0, None, b"\x01")]);
        // map offset beyond the end of the file
        BigEndian::write_u32(&mut fork[4..], 0x00FF_FFFF);
        assert!(matches!(
            ResourceFork::new(Cursor::new(fork)),
            Err(Error::BadMapOffset(_))
        ));
    }

    #[test]
    fn truncated_resource_data() {
        let mut fork = build_fork(&[(b"CODE", 0, None, b"\x01\x02\x03\x04")]);
        // lie about the resource length
        let data_offset = 16;
        BigEndian::write_u32(&mut fork[data_offset..], 0x1000);
        assert!(matches!(
            ResourceFork::new(Cursor::new(fork)).unwrap().data(rsid!(b"CODE", 0)),
            Err(Error::TruncatedResource(_))
        ));
    }
}
