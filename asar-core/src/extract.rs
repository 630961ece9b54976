use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::archive::Archive;
use crate::asar::{self, Node};
use crate::error::{AsarError, Result};
use crate::temp;

type EntryFilter = dyn Fn(&str, &Node) -> bool + Send + Sync;

#[derive(Debug, Clone)]
pub enum ExtractEvent {
    Start {
        total: usize,
    },
    FileStart {
        path: String,
    },
    FileDone {
        path: String,
        error: Option<String>,
    },
    Finish {
        extracted: usize,
        skipped: usize,
        failed: usize,
    },
    Aborted,
}

#[derive(Debug)]
pub struct ExtractReport {
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractMode {
    #[default]
    Parallel,
    Sequential,
}

pub struct ExtractBuilder<'a> {
    archive: &'a Archive,
    output_dir: PathBuf,
    mode: ExtractMode,
    threads: Option<usize>,
    overwrite: bool,
    continue_on_error: bool,
    filter: Option<Arc<EntryFilter>>,
    on_event: Option<Arc<dyn Fn(ExtractEvent) + Send + Sync>>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl<'a> ExtractBuilder<'a> {
    pub fn new(archive: &'a Archive, output_dir: impl AsRef<Path>) -> Self {
        Self {
            archive,
            output_dir: output_dir.as_ref().to_path_buf(),
            mode: ExtractMode::default(),
            threads: None,
            overwrite: false,
            continue_on_error: false,
            filter: None,
            on_event: None,
            cancel_flag: None,
        }
    }

    pub fn mode(mut self, mode: ExtractMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.mode = if enabled {
            ExtractMode::Parallel
        } else {
            ExtractMode::Sequential
        };
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Keep going after a failed entry. Integrity failures always stop.
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, &Node) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn on_event<F>(mut self, on_event: F) -> Self
    where
        F: Fn(ExtractEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(on_event));
        self
    }

    pub fn cancel_flag(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    pub fn run(self) -> Result<ExtractReport> {
        if !self.output_dir.exists() {
            std::fs::create_dir_all(&self.output_dir)?;
        }

        let mut tasks: Vec<(String, &Node)> = Vec::new();
        let mut skipped = 0usize;
        let mut rejected: Vec<(String, String)> = Vec::new();

        for (path, node) in self.archive.entries() {
            if let Some(filter) = &self.filter
                && !filter(&path, node)
            {
                skipped += 1;
                continue;
            }
            match node {
                // directories are created up front so file tasks never race on them
                Node::Directory { .. } => match self.entry_out_path(&path, node) {
                    Ok(out_path) => std::fs::create_dir_all(out_path)?,
                    Err(e) => {
                        tracing::warn!("Skipping `{path}`: {e}");
                        if !self.continue_on_error {
                            return Err(e);
                        }
                        rejected.push((path, e.to_string()));
                    }
                },
                Node::Link { .. } if !cfg!(unix) => {
                    tracing::warn!("Skipping link `{path}`: not supported on this platform");
                    skipped += 1;
                }
                _ => tasks.push((path, node)),
            }
        }

        self.emit(ExtractEvent::Start { total: tasks.len() });

        if self.should_abort() {
            self.emit(ExtractEvent::Aborted);
            return Ok(ExtractReport {
                extracted: 0,
                skipped,
                failed: rejected.len(),
                errors: rejected,
            });
        }

        let errors: Mutex<Vec<(String, String)>> = Mutex::new(rejected);
        let first_error: Mutex<Option<AsarError>> = Mutex::new(None);
        let stop = AtomicBool::new(false);
        let extracted = AtomicUsize::new(0);

        let process = |(path, node): &(String, &Node)| {
            if stop.load(Ordering::Relaxed) || self.should_abort() {
                return;
            }
            self.emit(ExtractEvent::FileStart { path: path.clone() });
            let result = self.extract_one(path, node);
            self.emit(ExtractEvent::FileDone {
                path: path.clone(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });
            match result {
                Ok(()) => {
                    extracted.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    errors.lock().push((path.clone(), e.to_string()));
                    if e.is_fatal() || !self.continue_on_error {
                        stop.store(true, Ordering::Relaxed);
                        // a security failure wins over whatever else went wrong
                        let mut first_error = first_error.lock();
                        if e.is_fatal() || first_error.is_none() {
                            *first_error = Some(e);
                        }
                    }
                }
            }
        };

        match self.mode {
            ExtractMode::Sequential => tasks.iter().for_each(process),
            ExtractMode::Parallel => match self.threads {
                Some(n) => {
                    let pool = rayon::ThreadPoolBuilder::new()
                        .num_threads(n)
                        .build()
                        .map_err(|e| AsarError::ThreadPoolBuild(e.to_string()))?;
                    pool.install(|| tasks.par_iter().for_each(process));
                }
                None => tasks.par_iter().for_each(process),
            },
        }

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }
        if self.should_abort() {
            self.emit(ExtractEvent::Aborted);
        }

        let extracted = extracted.into_inner();
        let errors = errors.into_inner();
        let failed = errors.len();
        self.emit(ExtractEvent::Finish {
            extracted,
            skipped,
            failed,
        });

        Ok(ExtractReport {
            extracted,
            skipped,
            failed,
            errors,
        })
    }

    fn emit(&self, event: ExtractEvent) {
        if let Some(on_event) = &self.on_event {
            on_event(event);
        }
    }

    fn should_abort(&self) -> bool {
        if let Some(flag) = &self.cancel_flag {
            return flag.load(Ordering::Relaxed);
        }
        false
    }

    /// Destination of a virtual path, always below the output directory.
    fn out_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.output_dir.join(asar::relative_fs_path(path)?))
    }

    /// Destination of a walked entry. A name holding a separator joins into a
    /// path that resolves to some other node, or to none.
    fn entry_out_path(&self, path: &str, node: &Node) -> Result<PathBuf> {
        match self.archive.resolve(path) {
            Some(resolved) if std::ptr::eq(resolved, node) => self.out_path(path),
            _ => Err(AsarError::MalformedEntry {
                path: path.to_string(),
                reason: "entry name contains a separator",
            }),
        }
    }

    fn extract_one(&self, path: &str, node: &Node) -> Result<()> {
        let out_path = self.entry_out_path(path, node)?;
        if let Some(parent) = out_path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        match node {
            Node::Link { link } => self.extract_link(link, &out_path),
            Node::File(_) => self.extract_file(path, &out_path),
            Node::Directory { .. } => Ok(()),
        }
    }

    fn extract_file(&self, path: &str, out_path: &Path) -> Result<()> {
        let info = self
            .archive
            .file_info(path)?
            .ok_or_else(|| AsarError::NotFound(path.to_string()))?;

        let mut open_options = OpenOptions::new();
        if self.overwrite {
            open_options.create(true).write(true).truncate(true);
        } else {
            open_options.create_new(true).write(true);
        }

        if info.unpacked() {
            let source = self.archive.unpacked_path(path)?;
            let mut reader = std::fs::File::open(&source)?;
            let mut file = open_options.open(out_path)?;
            std::io::copy(&mut reader, &mut file)?;
        } else {
            let mut reader = self.archive.open_entry(&info)?;
            let mut file = open_options.open(out_path)?;
            let integrity = info.integrity().map(|integrity| (path, integrity));
            if let Err(e) = temp::copy_verified(&mut reader, &mut file, info.size(), integrity) {
                drop(file);
                let _ = std::fs::remove_file(out_path);
                return Err(e);
            }
            file.flush()?;
        }

        if info.executable() {
            temp::set_executable(out_path)?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn extract_link(&self, link: &str, out_path: &Path) -> Result<()> {
        let target = self.out_path(link)?;
        let base = out_path.parent().unwrap_or(self.output_dir.as_path());
        let relative = pathdiff::diff_paths(&target, base).unwrap_or(target);
        if self.overwrite && out_path.symlink_metadata().is_ok() {
            std::fs::remove_file(out_path)?;
        }
        std::os::unix::fs::symlink(relative, out_path)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn extract_link(&self, _link: &str, _out_path: &Path) -> Result<()> {
        Ok(())
    }
}

impl Archive {
    pub fn extractor(&self, output_dir: impl AsRef<Path>) -> ExtractBuilder<'_> {
        ExtractBuilder::new(self, output_dir)
    }
}
