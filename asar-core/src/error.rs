pub type Result<T> = std::result::Result<T, AsarError>;

#[derive(Debug, thiserror::Error)]
pub enum AsarError {
    #[error("Upstream IO Error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Failed to read archive header: {0}")]
    HeaderRead(#[from] HeaderError),
    #[error("Malformed entry `{path}`: {reason}")]
    MalformedEntry { path: String, reason: &'static str },
    #[error("Entry not found: `{0}`")]
    NotFound(String),
    #[error("Entry `{0}` is not a file")]
    NotAFile(String),

    #[error("Invalid entry range: offset={offset}, size={size}, file_size={file_size}")]
    InvalidEntryRange { offset: u64, size: u64, file_size: u64 },

    #[error(transparent)]
    Security(#[from] SecurityFailure),

    #[error("Failed to build rayon thread pool: {0}")]
    ThreadPoolBuild(String),
}

impl AsarError {
    /// Whether this error comes from an integrity check. Callers must not
    /// recover from it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AsarError::Security(_))
    }

    pub(crate) fn malformed(path: &str, reason: &'static str) -> Self {
        AsarError::MalformedEntry {
            path: path.to_string(),
            reason,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("Unexpected end of header: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("Invalid pickle: {0}")]
    InvalidPickle(&'static str),
    #[error("Header is not valid UTF-8")]
    InvalidUtf8,
    #[error("Header is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Header root is not a JSON object")]
    NotAnObject,
    #[error("Invalid node at `{path}`: {reason}")]
    InvalidNode { path: String, reason: &'static str },
    #[error("Upstream IO Error: {0}")]
    IO(#[from] std::io::Error),
}

/// An integrity check failed or integrity metadata is unusable.
///
/// A caller that receives one must stop using the archive, see
/// [`SecurityFailure::abort`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityFailure {
    #[error("Integrity hash mismatch for `{target}`")]
    HashMismatch { target: String },
    #[error("Integrity block {index} mismatch for `{target}`")]
    BlockMismatch { target: String, index: usize },
    #[error("Integrity block count mismatch for `{target}`: expected {expected}, found {found}")]
    BlockCountMismatch {
        target: String,
        expected: usize,
        found: usize,
    },
    #[error("Unsupported integrity algorithm `{algorithm}` for `{target}`")]
    UnsupportedAlgorithm { target: String, algorithm: String },
    #[error("Missing integrity for `{target}`")]
    MissingIntegrity { target: String },
    #[error("Malformed integrity for `{target}`: {reason}")]
    MalformedIntegrity { target: String, reason: &'static str },
}

impl SecurityFailure {
    /// Log the failure and terminate the process.
    pub fn abort(&self) -> ! {
        tracing::error!("{self}");
        eprintln!("FATAL: {self}");
        std::process::abort()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Upstream IO Error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Invalid archive path `{0}`")]
    InvalidPath(String),
    #[error("Parent of `{0}` is not a directory")]
    ParentNotDirectory(String),
    #[error("Entry `{0}` already exists")]
    Duplicate(String),
    #[error("Block size must be greater than zero")]
    InvalidBlockSize,
    #[error("Header too large: {0} bytes")]
    HeaderTooLarge(usize),
    #[error("Failed to serialize header: {0}")]
    Json(#[from] serde_json::Error),
}
