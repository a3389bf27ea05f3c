//! Random-access byte sources.
//!
//! Both the hasher and the chunker read through [`ByteSource`], which addresses
//! bytes by offset instead of by a consuming cursor. A retry of chunk `n` only
//! re-reads the byte range of chunk `n`.

use bytes::Bytes;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A sized, randomly addressable source of bytes.
pub trait ByteSource: Send + Sync {
    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Fails with `UnexpectedEof` if the source holds fewer bytes than requested
    /// and with `InvalidInput` if the range lies outside `size()`.
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        (**self).read_at(offset, len)
    }
}

fn check_range(offset: u64, len: usize, size: u64) -> io::Result<()> {
    let end = offset.checked_add(len as u64).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "range end overflows u64")
    })?;
    if end > size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {offset}..{end} exceeds source size {size}"),
        ));
    }
    Ok(())
}

/// A file on disk.
///
/// Reads seek a shared handle under a mutex, so concurrent callers are
/// serialised rather than interleaved.
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    /// Open a file and record its current length.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        check_range(offset, len, self.size)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file source lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("size", &self.size)
            .finish()
    }
}

/// An in-memory buffer. Reads are zero-copy slices.
#[derive(Clone, Debug)]
pub struct MemorySource(Bytes);

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(self.0.slice(start..start + len))
    }
}
