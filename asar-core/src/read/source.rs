//! Positioned reads over the archive file.
//!
//! Both backends can be shared between threads: the memory map is read-only
//! and the file backend never depends on a shared cursor.

use std::fs::File;
use std::io;

use memmap2::{Mmap, MmapOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Use `memmap2` memory mapping.
    #[default]
    Mmap,
    /// Use regular file IO with positioned reads.
    File,
}

pub trait ReadAt: Send + Sync {
    /// Read into `buf` starting at `offset`, returning the number of bytes read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length of the underlying data.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(offset, buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ));
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    pub fn new(file: &File) -> io::Result<Self> {
        // SAFETY: read-only mapping; archives are not modified while open.
        let mmap = unsafe { MmapOptions::new().map(file)? };
        Ok(Self { mmap })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }
}

impl ReadAt for MmapSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.mmap.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let to_read = (self.mmap.len() - start).min(buf.len());
        buf[..to_read].copy_from_slice(&self.mmap[start..start + to_read]);
        Ok(to_read)
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}

pub struct FileSource {
    #[cfg(any(unix, windows))]
    file: File,
    #[cfg(not(any(unix, windows)))]
    file: parking_lot::Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn new(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        #[cfg(not(any(unix, windows)))]
        let file = parking_lot::Mutex::new(file);
        Ok(Self { file, len })
    }
}

impl ReadAt for FileSource {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(&self.file, buf, offset)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// The one read capability an archive owns.
pub enum ArchiveSource {
    Mmap(MmapSource),
    File(FileSource),
}

impl ArchiveSource {
    pub fn open(file: File, backend: Backend) -> io::Result<Self> {
        Ok(match backend {
            Backend::Mmap => ArchiveSource::Mmap(MmapSource::new(&file)?),
            Backend::File => ArchiveSource::File(FileSource::new(file)?),
        })
    }

    pub fn backend(&self) -> Backend {
        match self {
            ArchiveSource::Mmap(_) => Backend::Mmap,
            ArchiveSource::File(_) => Backend::File,
        }
    }
}

impl ReadAt for ArchiveSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ArchiveSource::Mmap(source) => source.read_at(offset, buf),
            ArchiveSource::File(source) => source.read_at(offset, buf),
        }
    }

    fn len(&self) -> u64 {
        match self {
            ArchiveSource::Mmap(source) => source.len(),
            ArchiveSource::File(source) => source.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn sources() -> Vec<ArchiveSource> {
        let mut tmp = tempfile::tempfile().unwrap();
        tmp.write_all(b"hello, archive").unwrap();
        [Backend::Mmap, Backend::File]
            .into_iter()
            .map(|backend| ArchiveSource::open(tmp.try_clone().unwrap(), backend).unwrap())
            .collect()
    }

    #[test]
    fn test_read_at() {
        for source in sources() {
            assert_eq!(source.len(), 14);
            let mut buf = [0u8; 7];
            source.read_exact_at(7, &mut buf).unwrap();
            assert_eq!(&buf, b"archive");
        }
    }

    #[test]
    fn test_read_past_end() {
        for source in sources() {
            let mut buf = [0u8; 4];
            assert_eq!(source.read_at(14, &mut buf).unwrap(), 0);
            let err = source.read_exact_at(12, &mut buf).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        }
    }
}
