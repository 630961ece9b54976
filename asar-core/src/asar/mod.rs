mod entry;
mod node;

use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{AsarError, Result};

pub use entry::*;
pub use node::*;

/// Bound on link redirections while resolving one path. Matches the POSIX
/// `ELOOP` limit.
pub const MAX_LINK_DEPTH: usize = 40;

#[inline]
fn is_separator(c: char) -> bool {
    c == '/' || (cfg!(windows) && c == '\\')
}

/// Split a virtual path into its non-empty segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(is_separator).filter(|segment| !segment.is_empty())
}

/// Turn a virtual path into a relative filesystem path.
///
/// Every segment must be a plain file name: `.`, `..`, separators and drive
/// or root prefixes are rejected, so the result never leaves the directory
/// it is joined onto.
pub fn relative_fs_path(path: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for segment in split_path(path) {
        let mut components = Path::new(segment).components();
        let plain = matches!(components.next(), Some(Component::Normal(name)) if name == segment)
            && components.next().is_none()
            && !segment.contains(['/', '\\']);
        if !plain {
            return Err(AsarError::malformed(path, "unsafe path segment"));
        }
        out.push(segment);
    }
    Ok(out)
}

/// Parsed archive header: the directory tree and the size of the preamble.
#[derive(Debug, Clone)]
pub struct AsarHeader {
    root: Node,
    span: u64,
}

impl AsarHeader {
    pub fn new(root: Node, span: u64) -> Self {
        Self { root, span }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Bytes before the payload region: the two pickles, `8 + S`.
    pub fn span(&self) -> u64 {
        self.span
    }

    /// Find the node at `path`.
    ///
    /// Links in intermediate segments are followed; a link at the end of the
    /// path is returned as is. `None` means not found, including link chains
    /// deeper than [`MAX_LINK_DEPTH`].
    pub fn resolve(&self, path: &str) -> Option<&Node> {
        self.resolve_at_depth(path, 0)
    }

    fn resolve_at_depth(&self, path: &str, depth: usize) -> Option<&Node> {
        let mut node = &self.root;
        for segment in split_path(path) {
            node = self.children_at_depth(node, depth)?.get(segment)?;
        }
        Some(node)
    }

    fn children_at_depth<'a>(&'a self, node: &'a Node, depth: usize) -> Option<&'a IndexMap<String, Node>> {
        match node {
            Node::Directory { files } => Some(files),
            Node::Link { link } => {
                if depth >= MAX_LINK_DEPTH {
                    tracing::warn!("Too many levels of links while resolving `{link}`");
                    return None;
                }
                match self.resolve_at_depth(link, depth + 1)? {
                    Node::Directory { files } => Some(files),
                    _ => None,
                }
            }
            Node::File(_) => None,
        }
    }

    /// Children of `node`, following a link to a directory.
    pub fn children<'a>(&'a self, node: &'a Node) -> Option<&'a IndexMap<String, Node>> {
        self.children_at_depth(node, 0)
    }

    /// Resolve `path` and keep following while the result is a link.
    /// Returns the path of the final node along with it.
    pub fn dereference(&self, path: &str) -> Option<(String, &Node)> {
        let mut path = path.to_string();
        for _ in 0..=MAX_LINK_DEPTH {
            match self.resolve(&path)? {
                Node::Link { link } => path = link.clone(),
                node => return Some((path, node)),
            }
        }
        tracing::warn!("Too many levels of links while dereferencing `{path}`");
        None
    }

    /// Names of the entries in the directory at `path`.
    pub fn readdir(&self, path: &str) -> Option<Vec<String>> {
        let node = self.resolve(path)?;
        Some(self.children(node)?.keys().cloned().collect())
    }

    /// Link target of the node at `path`, or `path` itself.
    pub fn realpath(&self, path: &str) -> Option<String> {
        match self.resolve(path)? {
            Node::Link { link } => Some(link.clone()),
            _ => Some(path.to_string()),
        }
    }

    /// Every node below the root in depth-first order, with its full path.
    /// Links are listed but not followed.
    pub fn entries(&self) -> Vec<(String, &Node)> {
        let mut out = Vec::new();
        if let Node::Directory { files } = &self.root {
            collect_entries("", files, &mut out);
        }
        out
    }
}

fn collect_entries<'a>(prefix: &str, files: &'a IndexMap<String, Node>, out: &mut Vec<(String, &'a Node)>) {
    for (name, node) in files {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        out.push((path.clone(), node));
        if let Node::Directory { files } = node {
            collect_entries(&path, files, out);
        }
    }
}
