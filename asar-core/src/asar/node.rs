use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use crate::error::HeaderError;
use crate::integrity::IntegrityPayload;

/// A node of the header tree.
///
/// The JSON shapes are told apart by their keys: `files` marks a directory,
/// `link` a link, anything else is a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Directory { files: IndexMap<String, Node> },
    Link { link: String },
    File(FileNode),
}

/// File fields as stored in the header. They are only checked when the entry
/// is queried, so one bad entry does not make the whole archive unreadable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileNode {
    pub(crate) size: Option<u64>,
    pub(crate) offset: Option<String>,
    pub(crate) executable: Option<bool>,
    pub(crate) unpacked: Option<bool>,
    pub(crate) integrity: Option<RawIntegrity>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RawIntegrity {
    pub(crate) algorithm: Option<String>,
    pub(crate) hash: Option<String>,
    pub(crate) block_size: Option<i64>,
    pub(crate) blocks: Option<Vec<Value>>,
}

impl Node {
    pub fn empty_dir() -> Self {
        Node::Directory { files: IndexMap::new() }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Node::Link { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    pub(crate) fn from_value(path: &str, value: Value) -> Result<Self, HeaderError> {
        let Value::Object(mut map) = value else {
            return Err(HeaderError::InvalidNode {
                path: path.to_string(),
                reason: "node is not an object",
            });
        };

        if let Some(files) = map.remove("files") {
            let Value::Object(files) = files else {
                return Err(HeaderError::InvalidNode {
                    path: path.to_string(),
                    reason: "`files` is not an object",
                });
            };
            let mut children = IndexMap::with_capacity(files.len());
            for (name, child) in files {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}/{name}")
                };
                let node = Node::from_value(&child_path, child)?;
                children.insert(name, node);
            }
            return Ok(Node::Directory { files: children });
        }

        if let Some(link) = map.remove("link") {
            let Value::String(link) = link else {
                return Err(HeaderError::InvalidNode {
                    path: path.to_string(),
                    reason: "`link` is not a string",
                });
            };
            return Ok(Node::Link { link });
        }

        Ok(Node::File(FileNode::from_map(&map)))
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Node::Directory { files } => {
                let files: Map<String, Value> =
                    files.iter().map(|(name, node)| (name.clone(), node.to_value())).collect();
                json!({ "files": files })
            }
            Node::Link { link } => json!({ "link": link }),
            Node::File(file) => file.to_value(),
        }
    }
}

impl FileNode {
    pub fn packed(size: u64, offset: u64, executable: bool, integrity: Option<&IntegrityPayload>) -> Self {
        Self {
            size: Some(size),
            offset: Some(offset.to_string()),
            executable: Some(executable),
            unpacked: None,
            integrity: integrity.map(RawIntegrity::from),
        }
    }

    pub fn unpacked(size: u64, executable: bool, integrity: Option<&IntegrityPayload>) -> Self {
        Self {
            size: Some(size),
            offset: None,
            executable: Some(executable),
            unpacked: Some(true),
            integrity: integrity.map(RawIntegrity::from),
        }
    }

    pub fn is_unpacked(&self) -> bool {
        self.unpacked.unwrap_or(false)
    }

    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            size: map.get("size").and_then(Value::as_u64),
            offset: map.get("offset").and_then(Value::as_str).map(str::to_string),
            executable: map.get("executable").and_then(Value::as_bool),
            unpacked: map.get("unpacked").and_then(Value::as_bool),
            integrity: map.get("integrity").and_then(Value::as_object).map(RawIntegrity::from_map),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(size) = self.size {
            map.insert("size".into(), size.into());
        }
        if let Some(offset) = &self.offset {
            map.insert("offset".into(), offset.clone().into());
        }
        if self.executable == Some(true) {
            map.insert("executable".into(), true.into());
        }
        if self.unpacked == Some(true) {
            map.insert("unpacked".into(), true.into());
        }
        if let Some(integrity) = &self.integrity {
            map.insert("integrity".into(), integrity.to_value());
        }
        Value::Object(map)
    }
}

impl RawIntegrity {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            algorithm: map.get("algorithm").and_then(Value::as_str).map(str::to_string),
            hash: map.get("hash").and_then(Value::as_str).map(str::to_string),
            block_size: map.get("blockSize").and_then(Value::as_i64),
            blocks: map.get("blocks").and_then(Value::as_array).cloned(),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(algorithm) = &self.algorithm {
            map.insert("algorithm".into(), algorithm.clone().into());
        }
        if let Some(hash) = &self.hash {
            map.insert("hash".into(), hash.clone().into());
        }
        if let Some(block_size) = self.block_size {
            map.insert("blockSize".into(), block_size.into());
        }
        if let Some(blocks) = &self.blocks {
            map.insert("blocks".into(), Value::Array(blocks.clone()));
        }
        Value::Object(map)
    }
}

impl From<&IntegrityPayload> for RawIntegrity {
    fn from(value: &IntegrityPayload) -> Self {
        Self {
            algorithm: Some(value.algorithm.as_str().to_string()),
            hash: Some(value.hash.clone()),
            block_size: Some(value.block_size as i64),
            blocks: Some(value.blocks.iter().cloned().map(Value::String).collect()),
        }
    }
}
