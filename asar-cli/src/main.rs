mod inspect;
mod pack;
mod unpack;

use std::path::{Path, PathBuf};

use anyhow::Context;
use asar_core::integrity::{HashAlgorithm, IntegrityManifest, IntegrityPayload};
use asar_core::read::source::Backend;
use asar_core::{Archive, AsarError, SecurityFailure, ValidationMode};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Print debug logs (-vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(flatten)]
    open: OpenArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the entries of an archive
    List(ListCommand),
    /// Show the metadata of one entry
    Stat(StatCommand),
    /// Print the content of a file
    Cat(CatCommand),
    /// Copy a file out to a temporary path and print it
    CopyOut(CopyOutCommand),
    /// Extract an archive to a directory
    Extract(ExtractCommand),
    /// Pack a directory into an archive
    Pack(PackCommand),
}

/// How archives are opened.
#[derive(Debug, Args)]
struct OpenArgs {
    /// Trusted SHA256 of the archive header, in hex
    #[arg(long, global = true, conflicts_with = "integrity_manifest")]
    header_hash: Option<String>,
    /// JSON file of trusted header hashes keyed by archive name
    #[arg(long, global = true)]
    integrity_manifest: Option<PathBuf>,
    /// Key to look up in the integrity manifest, defaults to the archive file name
    #[arg(long, global = true, requires = "integrity_manifest")]
    manifest_key: Option<String>,
    /// Require an integrity descriptor on every file
    #[arg(long, global = true)]
    enforce_integrity: bool,
    /// Read through the file handle instead of a memory map
    #[arg(long, global = true)]
    no_mmap: bool,
}

#[derive(Debug, Args)]
struct ListCommand {
    /// Input archive path
    input: PathBuf,
    /// Show kind, size and flags
    #[arg(short, long)]
    long: bool,
}

#[derive(Debug, Args)]
struct StatCommand {
    input: PathBuf,
    /// Path inside the archive
    path: String,
}

#[derive(Debug, Args)]
struct CatCommand {
    input: PathBuf,
    path: String,
    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CopyOutCommand {
    input: PathBuf,
    path: String,
}

#[derive(Debug, Args)]
struct ExtractCommand {
    /// Input archive path
    input: PathBuf,
    /// Output directory path
    output: Option<PathBuf>,
    /// Extract one file at a time
    #[arg(long)]
    sequential: bool,
    /// Number of worker threads
    #[arg(short, long, conflicts_with = "sequential")]
    threads: Option<usize>,
    /// Override existing files
    #[arg(long)]
    r#override: bool,
    /// Keep going when an entry fails
    #[arg(long)]
    ignore_error: bool,
}

#[derive(Debug, Args)]
struct PackCommand {
    /// Input directory
    input: PathBuf,
    /// Output archive path
    output: PathBuf,
    /// Leave files ending with this suffix out of the archive, in `<output>.unpacked`
    #[arg(long, value_name = "SUFFIX")]
    unpack: Vec<String>,
    /// Integrity block size in bytes
    #[arg(long)]
    block_size: Option<u32>,
    /// Override an existing output file
    #[arg(long)]
    r#override: bool,
}

impl OpenArgs {
    fn open(&self, input: &Path) -> anyhow::Result<Archive> {
        let mut builder = Archive::builder()
            .backend(if self.no_mmap { Backend::File } else { Backend::Mmap })
            .validation(if self.enforce_integrity {
                ValidationMode::Enforce
            } else {
                ValidationMode::Auto
            });

        if let Some(hash) = &self.header_hash {
            builder = builder.header_integrity(IntegrityPayload::from_header_hash(HashAlgorithm::Sha256, hash));
        } else if let Some(manifest) = &self.integrity_manifest {
            let manifest = IntegrityManifest::from_path(manifest)
                .with_context(|| format!("Failed to load integrity manifest `{}`", manifest.display()))?;
            let key = match &self.manifest_key {
                Some(key) => key.clone(),
                None => input
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
            };
            builder = builder.header_integrity(manifest.header_integrity(&key)?);
        }

        builder
            .open(input)
            .with_context(|| format!("Failed to open archive `{}`", input.display()))
    }
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let default_filter = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_filter.into())
        .from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .finish()
        .try_init()?;
    Ok(())
}

/// The integrity failure behind `err`, if any.
fn security_failure(err: &anyhow::Error) -> Option<&SecurityFailure> {
    err.chain().find_map(|cause| {
        if let Some(failure) = cause.downcast_ref::<SecurityFailure>() {
            return Some(failure);
        }
        match cause.downcast_ref::<AsarError>() {
            Some(AsarError::Security(failure)) => Some(failure),
            _ => None,
        }
    })
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::List(cmd) => inspect::list(cmd, &cli.open),
        Command::Stat(cmd) => inspect::stat(cmd, &cli.open),
        Command::Cat(cmd) => inspect::cat(cmd, &cli.open),
        Command::CopyOut(cmd) => inspect::copy_out(cmd, &cli.open),
        Command::Extract(cmd) => unpack::extract(cmd, &cli.open),
        Command::Pack(cmd) => pack::package(cmd),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let result = run(&cli);
    if let Err(e) = &result
        && let Some(failure) = security_failure(e)
    {
        failure.abort();
    }
    result
}
