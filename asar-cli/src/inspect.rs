use std::io::Write;

use anyhow::Context;
use asar_core::asar::{Node, Stat};

use crate::{CatCommand, CopyOutCommand, ListCommand, OpenArgs, StatCommand};

pub fn list(cmd: &ListCommand, open: &OpenArgs) -> anyhow::Result<()> {
    let archive = open.open(&cmd.input)?;
    let mut out = std::io::stdout().lock();

    for (path, node) in archive.entries() {
        if !cmd.long {
            writeln!(out, "{path}")?;
            continue;
        }
        match node {
            Node::Directory { .. } => writeln!(out, "d {:>12}  {path}", "-")?,
            Node::Link { link } => writeln!(out, "l {:>12}  {path} -> {link}", "-")?,
            Node::File(_) => match archive.stat(&path) {
                Ok(Some(Stat::File(info))) => {
                    let flags = format!(
                        "{}{}",
                        if info.executable() { "x" } else { "" },
                        if info.unpacked() { "u" } else { "" }
                    );
                    writeln!(out, "f {:>12}  {path} {flags}", info.size())?;
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => writeln!(out, "? {:>12}  {path} ({e})", "-")?,
            },
        }
    }
    Ok(())
}

pub fn stat(cmd: &StatCommand, open: &OpenArgs) -> anyhow::Result<()> {
    let archive = open.open(&cmd.input)?;
    let stat = archive
        .stat(&cmd.path)?
        .with_context(|| format!("`{}` not found in archive", cmd.path))?;

    let value = match stat {
        Stat::Directory => serde_json::json!({
            "type": "directory",
            "entries": archive.readdir(&cmd.path).unwrap_or_default(),
        }),
        Stat::Link => serde_json::json!({
            "type": "link",
            "target": archive.realpath(&cmd.path),
        }),
        Stat::File(info) => serde_json::json!({
            "type": "file",
            "size": info.size(),
            "offset": (!info.unpacked()).then_some(info.offset()),
            "executable": info.executable(),
            "unpacked": info.unpacked(),
            "integrity": info.integrity(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub fn cat(cmd: &CatCommand, open: &OpenArgs) -> anyhow::Result<()> {
    let archive = open.open(&cmd.input)?;
    let data = archive
        .read_file(&cmd.path)?
        .with_context(|| format!("`{}` not found in archive", cmd.path))?;

    match &cmd.output {
        Some(output) => {
            std::fs::write(output, &data).with_context(|| format!("Failed to write `{}`", output.display()))?
        }
        None => std::io::stdout().lock().write_all(&data)?,
    }
    Ok(())
}

pub fn copy_out(cmd: &CopyOutCommand, open: &OpenArgs) -> anyhow::Result<()> {
    let archive = open.open(&cmd.input)?;
    let path = archive
        .copy_file_out(&cmd.path)?
        .with_context(|| format!("`{}` not found in archive", cmd.path))?;
    println!("{}", path.display());

    // temporary copies go away with the archive
    eprintln!("Press Enter to clean up.");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    drop(archive);
    Ok(())
}
