use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SecurityFailure;

/// Block size used by the reference packer.
pub const DEFAULT_BLOCK_SIZE: u32 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "SHA256")]
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA256",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SHA256" => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Integrity descriptor of a file (or of a whole header).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityPayload {
    pub algorithm: HashAlgorithm,
    pub hash: String,
    pub block_size: u32,
    pub blocks: Vec<String>,
}

impl IntegrityPayload {
    /// Fails only on a zero `block_size`.
    pub fn compute(data: &[u8], block_size: u32) -> std::io::Result<Self> {
        Self::from_reader(data, block_size)
    }

    /// Hash everything `reader` yields, split into `block_size` blocks.
    pub fn from_reader<R>(mut reader: R, block_size: u32) -> std::io::Result<Self>
    where
        R: Read,
    {
        if block_size == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "block size must be greater than zero",
            ));
        }
        let block_size = block_size as usize;
        let mut whole = Sha256::new();
        let mut blocks = Vec::new();
        let mut buf = vec![0u8; block_size];
        loop {
            let filled = read_full(&mut reader, &mut buf)?;
            whole.update(&buf[..filled]);
            if filled > 0 || blocks.is_empty() {
                blocks.push(hex::encode(Sha256::digest(&buf[..filled])));
            }
            if filled < block_size {
                break;
            }
        }

        Ok(Self {
            algorithm: HashAlgorithm::Sha256,
            hash: hex::encode(whole.finalize()),
            block_size: block_size as u32,
            blocks,
        })
    }

    /// Descriptor for a raw header string, hashed as one block.
    pub fn for_header(header: &str) -> Self {
        let hash = hex::encode(Sha256::digest(header.as_bytes()));
        Self {
            algorithm: HashAlgorithm::Sha256,
            blocks: vec![hash.clone()],
            hash,
            block_size: header.len().max(1) as u32,
        }
    }

    /// Descriptor for a header known only by its hex digest.
    pub fn from_header_hash(algorithm: HashAlgorithm, hash: impl Into<String>) -> Self {
        let hash = hash.into();
        Self {
            algorithm,
            blocks: vec![hash.clone()],
            hash,
            block_size: 0,
        }
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[inline]
fn digest_matches(expected: &str, actual: &[u8]) -> bool {
    expected.eq_ignore_ascii_case(&hex::encode(actual))
}

/// Incremental block verifier, fed while content is being copied.
pub struct BlockVerifier<'a> {
    target: String,
    payload: &'a IntegrityPayload,
    whole: Sha256,
    block: Sha256,
    block_filled: usize,
    block_index: usize,
}

impl<'a> BlockVerifier<'a> {
    pub fn new(target: impl Into<String>, payload: &'a IntegrityPayload) -> Result<Self, SecurityFailure> {
        let target = target.into();
        if payload.block_size == 0 {
            return Err(SecurityFailure::MalformedIntegrity {
                target,
                reason: "block size must be positive",
            });
        }
        Ok(Self {
            target,
            payload,
            whole: Sha256::new(),
            block: Sha256::new(),
            block_filled: 0,
            block_index: 0,
        })
    }

    pub fn update(&mut self, mut data: &[u8]) -> Result<(), SecurityFailure> {
        self.whole.update(data);
        let block_size = self.payload.block_size as usize;
        while !data.is_empty() {
            let take = (block_size - self.block_filled).min(data.len());
            self.block.update(&data[..take]);
            self.block_filled += take;
            data = &data[take..];
            if self.block_filled == block_size {
                self.finish_block()?;
            }
        }
        Ok(())
    }

    fn finish_block(&mut self) -> Result<(), SecurityFailure> {
        let digest = self.block.finalize_reset();
        let index = self.block_index;
        let Some(expected) = self.payload.blocks.get(index) else {
            return Err(SecurityFailure::BlockCountMismatch {
                target: self.target.clone(),
                expected: self.payload.blocks.len(),
                found: index + 1,
            });
        };
        if !digest_matches(expected, &digest) {
            return Err(SecurityFailure::BlockMismatch {
                target: self.target.clone(),
                index,
            });
        }
        self.block_index += 1;
        self.block_filled = 0;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), SecurityFailure> {
        let payload = self.payload;
        let blocks = &payload.blocks;
        if self.block_filled > 0 || self.block_index == 0 {
            self.finish_block()?;
        } else if blocks.len() == self.block_index + 1
            && digest_matches(&blocks[self.block_index], &Sha256::digest(b""))
        {
            // some packers emit a trailing digest of the empty block
            self.block_index += 1;
        }

        if self.block_index != blocks.len() {
            return Err(SecurityFailure::BlockCountMismatch {
                target: self.target,
                expected: blocks.len(),
                found: self.block_index,
            });
        }
        if !digest_matches(&payload.hash, &self.whole.finalize()) {
            return Err(SecurityFailure::HashMismatch { target: self.target });
        }
        Ok(())
    }
}

/// Validate `content` block by block and as a whole against `payload`.
pub fn validate(target: &str, content: &[u8], payload: &IntegrityPayload) -> Result<(), SecurityFailure> {
    let mut verifier = BlockVerifier::new(target, payload)?;
    verifier.update(content)?;
    verifier.finish()
}

/// Validate the raw header string, hashed as a single block.
pub fn validate_header(target: &str, header: &str, payload: &IntegrityPayload) -> Result<(), SecurityFailure> {
    if !digest_matches(&payload.hash, &Sha256::digest(header.as_bytes())) {
        return Err(SecurityFailure::HashMismatch {
            target: target.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
struct HeaderIntegrityEntry {
    algorithm: String,
    hash: String,
}

/// Trusted header hashes for a set of archives, keyed by the archive's path
/// relative to the application resources.
///
/// ```json
/// { "Resources/app.asar": { "algorithm": "SHA256", "hash": "..." } }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegrityManifest(HashMap<String, HeaderIntegrityEntry>);

impl IntegrityManifest {
    pub fn from_reader<R: Read>(reader: R) -> serde_json::Result<Self> {
        serde_json::from_reader(reader)
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(std::io::Error::other)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Header descriptor for `key`. A missing or unusable entry is a security
    /// failure: the archive was expected to be validated.
    pub fn header_integrity(&self, key: &str) -> Result<IntegrityPayload, SecurityFailure> {
        let entry = self.0.get(key).ok_or_else(|| SecurityFailure::MissingIntegrity {
            target: key.to_string(),
        })?;
        let algorithm =
            HashAlgorithm::parse(&entry.algorithm).ok_or_else(|| SecurityFailure::UnsupportedAlgorithm {
                target: key.to_string(),
                algorithm: entry.algorithm.clone(),
            })?;
        Ok(IntegrityPayload::from_header_hash(algorithm, entry.hash.clone()))
    }
}
