use std::{fs::{self, File}, io::{self, Seek, SeekFrom}, path::Path};

/// Tries to open the resource fork through the file system's named fork
/// side-channel. On file systems without named forks the probe fails and the
/// caller falls through to the wrapper formats.
pub(crate) fn open_named_fork(path: &Path) -> io::Result<File> {
    let path = path.join("..namedfork/rsrc");
    let metadata = fs::metadata(&path)?;
    if metadata.len() > 0 {
        File::open(&path)
    } else {
        Err(io::Error::from(io::ErrorKind::NotFound))
    }
}

/// The total length of the stream, position-preserving.
pub(crate) fn stream_len<T: Seek>(stream: &mut T) -> io::Result<u64> {
    let pos = stream.seek(SeekFrom::Current(0))?;
    let end = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(pos))?;
    Ok(end)
}
