use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::asar::{self, AsarHeader, FileInfo, Node, Stat};
use crate::error::{AsarError, HeaderError, Result};
use crate::integrity::{self, IntegrityPayload};
use crate::read::{self, entry::EntryReader, source::ArchiveSource, source::Backend, source::ReadAt};
use crate::temp::TemporaryFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Integrity is checked only when a trusted header descriptor was given.
    #[default]
    Auto,
    /// Every file must carry a usable integrity descriptor.
    Enforce,
}

#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    backend: Backend,
    validation: ValidationMode,
    header_integrity: Option<IntegrityPayload>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn mmap(mut self, enabled: bool) -> Self {
        self.backend = if enabled { Backend::Mmap } else { Backend::File };
        self
    }

    pub fn validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    /// Trusted descriptor of the header, obtained from outside the archive.
    /// Setting one makes header and file integrity checks mandatory.
    pub fn header_integrity(mut self, integrity: IntegrityPayload) -> Self {
        self.header_integrity = Some(integrity);
        self
    }

    pub fn open(self, path: impl AsRef<Path>) -> Result<Archive> {
        Archive::open_with(path, self)
    }
}

/// An opened archive. Safe to share between threads.
pub struct Archive {
    path: PathBuf,
    header: AsarHeader,
    header_validated: bool,
    load_integrity: bool,
    source: Arc<ArchiveSource>,
    external_files: Mutex<HashMap<String, TemporaryFile>>,
}

impl Archive {
    pub fn builder() -> ArchiveBuilder {
        ArchiveBuilder::new()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ArchiveBuilder::default())
    }

    fn open_with(path: impl AsRef<Path>, options: ArchiveBuilder) -> Result<Self> {
        // symlinks are kept: `.unpacked` sits next to the path as given
        let path = path.as_ref();
        let (file, path) = match std::path::absolute(path).and_then(|abs| Ok((File::open(&abs)?, abs))) {
            Ok(opened) => opened,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Opening {}: {e}", path.display());
                }
                return Err(HeaderError::IO(e).into());
            }
        };

        let mut reader = BufReader::new(&file);
        let (json, header_size) = read::read_header_json(&mut reader).inspect_err(|e| {
            tracing::error!("Failed to read header from {}: {e}", path.display());
        })?;

        let header_validated = match &options.header_integrity {
            Some(integrity) => {
                integrity::validate_header(&path.display().to_string(), &json, integrity)?;
                true
            }
            None => false,
        };

        let raw = read::parse_header(json, header_size).inspect_err(|e| {
            tracing::error!("Failed to parse header from {}: {e}", path.display());
        })?;
        drop(reader);

        let source = ArchiveSource::open(file, options.backend)?;
        tracing::debug!(
            "Opened {} ({:?}, header span {}, validated: {header_validated})",
            path.display(),
            options.backend,
            raw.header.span()
        );

        Ok(Self {
            path,
            header: raw.header,
            header_validated,
            load_integrity: header_validated || options.validation == ValidationMode::Enforce,
            source: Arc::new(source),
            external_files: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &AsarHeader {
        &self.header
    }

    pub fn header_span(&self) -> u64 {
        self.header.span()
    }

    pub fn header_validated(&self) -> bool {
        self.header_validated
    }

    /// Whether file integrity descriptors are loaded and checked.
    pub fn integrity_enforced(&self) -> bool {
        self.load_integrity
    }

    pub fn backend(&self) -> Backend {
        self.source.backend()
    }

    /// Size of the archive file in bytes.
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn resolve(&self, path: &str) -> Option<&Node> {
        self.header.resolve(path)
    }

    pub fn entries(&self) -> Vec<(String, &Node)> {
        self.header.entries()
    }

    pub fn readdir(&self, path: &str) -> Option<Vec<String>> {
        self.header.readdir(path)
    }

    pub fn realpath(&self, path: &str) -> Option<String> {
        self.header.realpath(path)
    }

    /// File metadata at `path`, following links. `Ok(None)` if nothing is
    /// there.
    pub fn file_info(&self, path: &str) -> Result<Option<FileInfo>> {
        Ok(self.lookup(path)?.map(|(_, info)| info))
    }

    fn lookup(&self, path: &str) -> Result<Option<(String, FileInfo)>> {
        let Some((real, node)) = self.header.dereference(path) else {
            return Ok(None);
        };
        match node {
            Node::File(file) => {
                let info = file.file_info(&real, self.header.span(), self.load_integrity)?;
                Ok(Some((real, info)))
            }
            _ => Err(AsarError::NotAFile(path.to_string())),
        }
    }

    pub fn stat(&self, path: &str) -> Result<Option<Stat>> {
        let Some(node) = self.header.resolve(path) else {
            return Ok(None);
        };
        Ok(Some(match node {
            Node::Link { .. } => Stat::Link,
            Node::Directory { .. } => Stat::Directory,
            Node::File(file) => Stat::File(file.file_info(path, self.header.span(), self.load_integrity)?),
        }))
    }

    /// Location of an unpacked entry: `<archive>.unpacked/<path>`. Paths
    /// that would leave that directory are `MalformedEntry`.
    pub fn unpacked_path(&self, path: &str) -> Result<PathBuf> {
        let relative = asar::relative_fs_path(path)?;
        let mut dir = OsString::from(self.path.as_os_str());
        dir.push(".unpacked");
        Ok(PathBuf::from(dir).join(relative))
    }

    /// Stream a packed entry's bytes.
    pub fn open_entry(&self, info: &FileInfo) -> Result<EntryReader> {
        if info.unpacked() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "unpacked entries are not stored in the archive",
            )
            .into());
        }
        self.check_range(info)?;
        Ok(EntryReader::new(Arc::clone(&self.source), info.offset(), info.size()))
    }

    fn check_range(&self, info: &FileInfo) -> Result<()> {
        let file_size = self.source.len();
        match info.offset().checked_add(info.size()) {
            Some(end) if end <= file_size => Ok(()),
            _ => Err(AsarError::InvalidEntryRange {
                offset: info.offset(),
                size: info.size(),
                file_size,
            }),
        }
    }

    /// Whole content of the file at `path`, verified when integrity is
    /// enforced.
    pub fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some((real, info)) = self.lookup(path)? else {
            return Ok(None);
        };
        if info.unpacked() {
            return Ok(Some(std::fs::read(self.unpacked_path(&real)?)?));
        }

        self.check_range(&info)?;
        let mut data = vec![0u8; info.size() as usize];
        self.source.read_exact_at(info.offset(), &mut data)?;
        if let Some(integrity) = info.integrity() {
            integrity::validate(&real, &data, integrity)?;
        }
        Ok(Some(data))
    }

    /// Give the file at `path` a real filesystem path.
    ///
    /// Unpacked entries already have one. Packed entries are copied to a
    /// temporary file that lives as long as the archive; repeated calls return
    /// the same file.
    pub fn copy_file_out(&self, path: &str) -> Result<Option<PathBuf>> {
        let key = asar::split_path(path).collect::<Vec<_>>().join("/");
        if let Some(file) = self.external_files.lock().get(&key) {
            return Ok(Some(file.path().to_path_buf()));
        }

        let Some((real, info)) = self.lookup(path)? else {
            return Ok(None);
        };
        if info.unpacked() {
            return self.unpacked_path(&real).map(Some);
        }

        // copy without holding the lock; a racing copy of the same path is
        // dropped below
        let reader = self.open_entry(&info)?;
        let extension = Path::new(&key).extension().and_then(|ext| ext.to_str());
        let file = TemporaryFile::from_reader(
            reader,
            info.size(),
            extension,
            info.integrity().map(|integrity| (real.as_str(), integrity)),
        )?;
        if info.executable() {
            file.set_executable()?;
        }
        tracing::debug!("Copied `{key}` out of {} to {}", self.path.display(), file.path().display());

        let mut external_files = self.external_files.lock();
        let file = external_files.entry(key).or_insert(file);
        Ok(Some(file.path().to_path_buf()))
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("header_span", &self.header.span())
            .field("header_validated", &self.header_validated)
            .field("load_integrity", &self.load_integrity)
            .field("backend", &self.source.backend())
            .finish()
    }
}
