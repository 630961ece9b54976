use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::asar::{self, FileNode, Node};
use crate::error::WriteError;
use crate::integrity::{DEFAULT_BLOCK_SIZE, IntegrityPayload};
use crate::pickle::PickleWriter;

type Result<T> = std::result::Result<T, WriteError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileOptions {
    executable: bool,
    unpacked: bool,
}

impl FileOptions {
    pub fn executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    /// Describe the file in the header but leave its bytes out of the archive.
    pub fn unpacked(mut self, unpacked: bool) -> Self {
        self.unpacked = unpacked;
        self
    }
}

enum Content {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

struct PendingFile {
    content: Content,
    size: u64,
    integrity: IntegrityPayload,
    options: FileOptions,
}

/// Build an archive in memory and write it out in one go.
///
/// Files get their offsets in the order they were added.
pub struct AsarWriter {
    root: Node,
    files: IndexMap<String, PendingFile>,
    block_size: u32,
}

impl Default for AsarWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AsarWriter {
    pub fn new() -> Self {
        Self {
            root: Node::empty_dir(),
            files: IndexMap::new(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Block size of the integrity descriptors of files added afterwards.
    pub fn with_block_size(mut self, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(WriteError::InvalidBlockSize);
        }
        self.block_size = block_size;
        Ok(self)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Add a directory, creating missing parents. Adding an existing
    /// directory again is a no-op.
    pub fn add_dir(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.parent_of(path)?;
        match parent.get(&name) {
            Some(Node::Directory { .. }) => Ok(()),
            Some(_) => Err(WriteError::Duplicate(path.to_string())),
            None => {
                parent.insert(name, Node::empty_dir());
                Ok(())
            }
        }
    }

    pub fn add_link(&mut self, path: &str, target: &str) -> Result<()> {
        self.insert(path, Node::Link {
            link: target.to_string(),
        })
    }

    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>, options: FileOptions) -> Result<()> {
        let data = data.into();
        let integrity = IntegrityPayload::compute(&data, self.block_size)?;
        self.add_pending(path, PendingFile {
            size: data.len() as u64,
            content: Content::Bytes(data),
            integrity,
            options,
        })
    }

    /// Add a file from disk. It is hashed now and copied by [`finish`](Self::finish).
    pub fn add_file_from_path(&mut self, path: &str, source: impl AsRef<Path>, options: FileOptions) -> Result<()> {
        let source = source.as_ref();
        let file = File::open(source)?;
        let size = file.metadata()?.len();
        let integrity = IntegrityPayload::from_reader(BufReader::new(file), self.block_size)?;
        self.add_pending(path, PendingFile {
            content: Content::Path(source.to_path_buf()),
            size,
            integrity,
            options,
        })
    }

    fn add_pending(&mut self, path: &str, file: PendingFile) -> Result<()> {
        let key = normalize(path)?;
        self.insert(&key, Node::File(FileNode::default()))?;
        self.files.insert(key, file);
        Ok(())
    }

    fn insert(&mut self, path: &str, node: Node) -> Result<()> {
        let (parent, name) = self.parent_of(path)?;
        if parent.contains_key(&name) {
            return Err(WriteError::Duplicate(path.to_string()));
        }
        parent.insert(name, node);
        Ok(())
    }

    /// Children map of the parent of `path`, created as needed, and the last
    /// segment of `path`.
    fn parent_of(&mut self, path: &str) -> Result<(&mut IndexMap<String, Node>, String)> {
        let key = normalize(path)?;
        let mut segments: Vec<&str> = key.split('/').collect();
        let name = segments.pop().unwrap_or_default().to_string();

        let mut node = &mut self.root;
        for segment in segments {
            let Node::Directory { files } = node else {
                return Err(WriteError::ParentNotDirectory(path.to_string()));
            };
            node = files.entry(segment.to_string()).or_insert_with(Node::empty_dir);
        }
        match node {
            Node::Directory { files } => Ok((files, name)),
            _ => Err(WriteError::ParentNotDirectory(path.to_string())),
        }
    }

    fn file_node_mut(&mut self, path: &str) -> Option<&mut FileNode> {
        let mut node = &mut self.root;
        for segment in path.split('/') {
            let Node::Directory { files } = node else {
                return None;
            };
            node = files.get_mut(segment)?;
        }
        match node {
            Node::File(file) => Some(file),
            _ => None,
        }
    }

    /// Write the archive and return the descriptor of its header, to be
    /// published through a trusted channel.
    pub fn finish<W>(mut self, mut out: W) -> Result<IntegrityPayload>
    where
        W: Write,
    {
        let files = std::mem::take(&mut self.files);
        let mut offset = 0u64;
        for (path, file) in &files {
            let node = if file.options.unpacked {
                FileNode::unpacked(file.size, file.options.executable, Some(&file.integrity))
            } else {
                let node = FileNode::packed(file.size, offset, file.options.executable, Some(&file.integrity));
                offset += file.size;
                node
            };
            if let Some(slot) = self.file_node_mut(path) {
                *slot = node;
            }
        }

        let json = serde_json::to_string(&self.root.to_value())?;
        let mut header = PickleWriter::new();
        header.write_string(&json);
        let header = header.into_bytes();
        let header_size = u32::try_from(header.len()).map_err(|_| WriteError::HeaderTooLarge(header.len()))?;
        let mut size = PickleWriter::new();
        size.write_u32(header_size);

        out.write_all(&size.into_bytes())?;
        out.write_all(&header)?;
        for file in files.values().filter(|file| !file.options.unpacked) {
            match &file.content {
                Content::Bytes(data) => out.write_all(data)?,
                Content::Path(source) => {
                    let copied = std::io::copy(&mut File::open(source)?.take(file.size), &mut out)?;
                    if copied != file.size {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("{} shrank while packing", source.display()),
                        )
                        .into());
                    }
                }
            }
        }
        out.flush()?;

        Ok(IntegrityPayload::for_header(&json))
    }
}

fn normalize(path: &str) -> Result<String> {
    let segments: Vec<&str> = asar::split_path(path).collect();
    if segments.is_empty() || segments.iter().any(|segment| *segment == "." || *segment == "..") {
        return Err(WriteError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}
