use std::io::{Read, Write};
use std::path::Path;

use tempfile::TempPath;

use crate::error::Result;
use crate::integrity::{BlockVerifier, IntegrityPayload};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A packed entry copied out to the filesystem. The file is deleted on drop.
#[derive(Debug)]
pub struct TemporaryFile {
    path: TempPath,
}

impl TemporaryFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy exactly `size` bytes of `reader` into a new temporary file whose
    /// name ends with `extension`. With `integrity` set the bytes are verified
    /// while they are copied.
    pub fn from_reader<R>(
        mut reader: R,
        size: u64,
        extension: Option<&str>,
        integrity: Option<(&str, &IntegrityPayload)>,
    ) -> Result<Self>
    where
        R: Read,
    {
        let suffix = extension.map(|ext| format!(".{ext}")).unwrap_or_default();
        let mut file = tempfile::Builder::new().prefix("asar").suffix(&suffix).tempfile()?;

        copy_verified(&mut reader, &mut file, size, integrity)?;
        file.flush()?;

        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    /// Mark the file executable (`chmod 0755`). No-op where there is no such bit.
    pub fn set_executable(&self) -> std::io::Result<()> {
        set_executable(&self.path)
    }
}

/// Copy exactly `size` bytes from `reader` to `writer`, feeding them through
/// a block verifier when `integrity` is set.
pub(crate) fn copy_verified<R, W>(
    reader: &mut R,
    writer: &mut W,
    size: u64,
    integrity: Option<(&str, &IntegrityPayload)>,
) -> Result<()>
where
    R: Read,
    W: Write,
{
    let mut verifier = match integrity {
        Some((target, payload)) => Some(BlockVerifier::new(target, payload)?),
        None => None,
    };

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    while copied < size {
        let want = (size - copied).min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("entry ended after {copied} of {size} bytes"),
            )
            .into());
        }
        if let Some(verifier) = verifier.as_mut() {
            verifier.update(&buf[..n])?;
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
    if let Some(verifier) = verifier {
        verifier.finish()?;
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub(crate) fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
