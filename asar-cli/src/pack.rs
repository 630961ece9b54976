use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use asar_core::write::{AsarWriter, FileOptions};
use indexmap::IndexMap;

use crate::PackCommand;

enum Input {
    Dir,
    File { source: PathBuf, executable: bool },
    Link { target: String },
}

pub fn package(cmd: &PackCommand) -> anyhow::Result<()> {
    let inputs = collect_inputs(&cmd.input)?;
    if inputs.is_empty() {
        anyhow::bail!("No input files found");
    }

    // create output writer
    if let Some(parent) = cmd.output.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut output_option = OpenOptions::new();
    if cmd.r#override {
        output_option.create(true).truncate(true);
    } else {
        output_option.create_new(true);
    }
    output_option.write(true);
    let output_file = output_option
        .open(&cmd.output)
        .with_context(|| format!("Failed to create `{}`", cmd.output.display()))?;

    let mut writer = AsarWriter::new();
    if let Some(block_size) = cmd.block_size {
        writer = writer.with_block_size(block_size)?;
    }

    let mut unpacked_dir = OsString::from(cmd.output.as_os_str());
    unpacked_dir.push(".unpacked");
    let unpacked_dir = PathBuf::from(unpacked_dir);

    for (name, input) in &inputs {
        match input {
            Input::Dir => writer.add_dir(name)?,
            Input::Link { target } => writer.add_link(name, target)?,
            Input::File { source, executable } => {
                let unpacked = cmd.unpack.iter().any(|suffix| name.ends_with(suffix.as_str()));
                if unpacked {
                    let dest = unpacked_dir.join(name);
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(source, &dest)
                        .with_context(|| format!("Failed to copy `{}` to `{}`", source.display(), dest.display()))?;
                    tracing::debug!("Unpacked {name}");
                } else {
                    tracing::debug!("Packing {name}");
                }
                let options = FileOptions::default().executable(*executable).unpacked(unpacked);
                writer
                    .add_file_from_path(name, source, options)
                    .with_context(|| format!("Failed to add `{}`", source.display()))?;
            }
        }
    }

    let file_count = writer.file_count();
    let header_integrity = writer.finish(BufWriter::new(output_file))?;

    println!("Packed {file_count} files");
    println!("Output file: {}", cmd.output.display());
    println!("Header hash ({}): {}", header_integrity.algorithm.as_str(), header_integrity.hash);

    Ok(())
}

/// Walk the input directory into archive paths, keeping walk order.
fn collect_inputs(input_dir: &Path) -> anyhow::Result<IndexMap<String, Input>> {
    let mut inputs = IndexMap::new();

    if !input_dir.is_dir() {
        anyhow::bail!("Input directory does not exist: {}", input_dir.display());
    }
    let root = input_dir.canonicalize()?;

    for entry in walkdir::WalkDir::new(&root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let name = archive_name(&root, entry.path())?;
        let file_type = entry.file_type();

        let input = if file_type.is_symlink() {
            match link_target(&root, entry.path()) {
                Some(target) => Input::Link { target },
                None => {
                    tracing::warn!("Skipping `{name}`: link points outside the input directory");
                    continue;
                }
            }
        } else if file_type.is_dir() {
            Input::Dir
        } else {
            Input::File {
                source: entry.path().to_path_buf(),
                executable: is_executable(&entry.metadata()?),
            }
        };
        inputs.insert(name, input);
    }

    Ok(inputs)
}

fn archive_name(root: &Path, path: &Path) -> anyhow::Result<String> {
    let relative = path.strip_prefix(root)?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

/// Target of the link at `path` relative to `root`, if it stays inside.
fn link_target(root: &Path, path: &Path) -> Option<String> {
    let target = path.canonicalize().ok()?;
    let relative = target.strip_prefix(root).ok()?;
    Some(relative.to_string_lossy().replace('\\', "/"))
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}
