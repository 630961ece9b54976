use std::io::Read;
use std::sync::Arc;

use super::source::{ArchiveSource, ReadAt};

/// Read a packed entry's byte range.
pub struct EntryReader {
    source: Arc<ArchiveSource>,
    pos: u64,
    end: u64,
}

impl EntryReader {
    pub(crate) fn new(source: Arc<ArchiveSource>, offset: u64, size: u64) -> Self {
        Self {
            source,
            pos: offset,
            end: offset + size,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(0);
        }
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = self.source.read_at(self.pos, &mut buf[..to_read])?;
        self.pos += n as u64;
        Ok(n)
    }
}
