use serde_json::Value;

use crate::error::{AsarError, Result, SecurityFailure};
use crate::integrity::{HashAlgorithm, IntegrityPayload};

use super::node::{FileNode, RawIntegrity};

/// Metadata of a file entry, ready for reading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub(crate) size: u64,
    pub(crate) offset: u64,
    pub(crate) executable: bool,
    pub(crate) unpacked: bool,
    pub(crate) integrity: Option<IntegrityPayload>,
}

impl FileInfo {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Absolute offset in the archive file. Meaningless for unpacked entries.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn executable(&self) -> bool {
        self.executable
    }

    pub fn unpacked(&self) -> bool {
        self.unpacked
    }

    pub fn integrity(&self) -> Option<&IntegrityPayload> {
        self.integrity.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stat {
    File(FileInfo),
    Directory,
    Link,
}

impl FileNode {
    /// Check the stored fields and turn them into a [`FileInfo`].
    ///
    /// `header_span` is added to the stored offset. With `load_integrity` set
    /// a usable integrity descriptor is mandatory.
    pub fn file_info(&self, path: &str, header_span: u64, load_integrity: bool) -> Result<FileInfo> {
        let size = self.size.ok_or_else(|| AsarError::malformed(path, "missing size"))?;
        let mut info = FileInfo {
            size,
            ..Default::default()
        };

        if self.is_unpacked() {
            info.unpacked = true;
            return Ok(info);
        }

        let offset = self
            .offset
            .as_deref()
            .and_then(|offset| offset.parse::<u64>().ok())
            .ok_or_else(|| AsarError::malformed(path, "missing or invalid offset"))?;
        info.offset = offset
            .checked_add(header_span)
            .ok_or_else(|| AsarError::malformed(path, "offset overflows"))?;
        info.executable = self.executable.unwrap_or(false);

        if load_integrity {
            let raw = self.integrity.as_ref().ok_or_else(|| SecurityFailure::MissingIntegrity {
                target: path.to_string(),
            })?;
            info.integrity = Some(raw.to_payload(path)?);
        }

        Ok(info)
    }
}

impl RawIntegrity {
    fn to_payload(&self, path: &str) -> std::result::Result<IntegrityPayload, SecurityFailure> {
        let malformed = |reason| SecurityFailure::MalformedIntegrity {
            target: path.to_string(),
            reason,
        };

        let algorithm = self.algorithm.as_deref().ok_or_else(|| malformed("missing algorithm"))?;
        let algorithm = HashAlgorithm::parse(algorithm).ok_or_else(|| SecurityFailure::UnsupportedAlgorithm {
            target: path.to_string(),
            algorithm: algorithm.to_string(),
        })?;
        let hash = self.hash.clone().ok_or_else(|| malformed("missing hash"))?;
        let block_size = self
            .block_size
            .filter(|size| *size > 0)
            .and_then(|size| u32::try_from(size).ok())
            .ok_or_else(|| malformed("block size must be a positive integer"))?;
        let blocks = self
            .blocks
            .as_ref()
            .ok_or_else(|| malformed("missing blocks"))?
            .iter()
            .map(|block| match block {
                Value::String(block) => Ok(block.clone()),
                _ => Err(malformed("block hash is not a string")),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(IntegrityPayload {
            algorithm,
            hash,
            block_size,
            blocks,
        })
    }
}
