//! Parallel extraction of (codestream, file) work items using Rayon.
//!
//! # Design
//!
//! - `ExtractionWorker` runs the extraction tool for one `WorkItem`
//! - `ParallelExecutor` runs all items on a fixed-width thread pool and stops
//!   at the first failure
//! - Progress is counted by `ProgressReporter`
//!
//! Workers never touch the codestream table: each returns an `ItemOutcome`
//! that the driver applies once every item has finished.

use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::codestream::{Codestream, ExtSymbols, FileData, VMLINUX};
use crate::config::Layout;
use crate::extractor::backend::{BackendError, ExtractorBackend, InvocationContext};
use crate::extractor::make::CompilerCommandSource;
use crate::extractor::normalize::strip_provenance;
use crate::extractor::symbols::find_module;
use crate::extractor::{ExtractError, ExtractResult};
use crate::templates::TemplateRenderer;

/// Default number of concurrent extractions.
pub const DEFAULT_WORKERS: usize = 4;

/// One (codestream, file) pair to extract.
#[derive(Debug, Clone, Copy)]
pub struct WorkItem<'a> {
    /// 1-based position, only used for progress output
    pub index: usize,
    pub fname: &'a str,
    pub cs: &'a str,
    pub codestream: &'a Codestream,
    pub file: &'a FileData,
}

/// Result of a successfully extracted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub cs: String,
    pub fname: String,
    pub ext_symbols: ExtSymbols,
}

/// Progress reporter for parallel extraction.
///
/// Thread-safe progress tracking using atomic operations.
#[derive(Debug)]
pub struct ProgressReporter {
    /// Current count of completed items
    completed: Arc<AtomicUsize>,
    /// Total number of items
    total: usize,
}

impl ProgressReporter {
    pub fn new(total: usize) -> Self {
        Self {
            completed: Arc::new(AtomicUsize::new(0)),
            total,
        }
    }

    /// Report that one more item has been completed.
    ///
    /// Returns the new count of completed items.
    pub fn report_progress(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get current progress (completed, total).
    pub fn get_progress(&self) -> (usize, usize) {
        (self.completed.load(Ordering::SeqCst), self.total)
    }
}

/// Runs the extraction tool for single work items.
///
/// Shared by all pool threads. The only shared mutable state is the make
/// lock, held while the compiler command is prepared.
pub struct ExtractionWorker<'a> {
    layout: &'a Layout,
    backend: &'a dyn ExtractorBackend,
    commands: &'a dyn CompilerCommandSource,
    templates: &'a dyn TemplateRenderer,
    /// Module the livepatch targets, used for files without their own module
    default_module: &'a str,
    make_lock: Mutex<()>,
    progress: ProgressReporter,
}

impl<'a> ExtractionWorker<'a> {
    pub fn new(
        layout: &'a Layout,
        backend: &'a dyn ExtractorBackend,
        commands: &'a dyn CompilerCommandSource,
        templates: &'a dyn TemplateRenderer,
        default_module: &'a str,
        total: usize,
    ) -> Self {
        Self {
            layout,
            backend,
            commands,
            templates,
            default_module,
            make_lock: Mutex::new(()),
            progress: ProgressReporter::new(total),
        }
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Extract one item.
    pub fn process(&self, item: &WorkItem<'_>) -> ExtractResult<ItemOutcome> {
        let (_, total) = self.progress.get_progress();
        let idx = format!("({}/{})", item.index, total);
        info!("{:>15} {:<15} {}", idx, item.cs, item.fname);

        let kernel = &item.codestream.kernel;
        let sdir = self.layout.sdir(item.cs, kernel);
        let odir = self.layout.odir(item.cs, kernel);

        let out_dir = self.layout.work_dir(item.cs, item.fname, self.backend.name());
        fs::create_dir_all(&out_dir)
            .map_err(|e| ExtractError::io(format!("creating {}", out_dir.display()), e))?;
        link_source(&sdir.join(item.fname), &out_dir)?;

        let compiler_cmd = {
            // make may regenerate fixdep, which fails when run concurrently
            let _guard = self.make_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.commands
                .compiler_command(item.cs, item.fname, &odir, &out_dir)?
        };

        let ctx = InvocationContext {
            cs: item.cs,
            fname: item.fname,
            symbols: item.file.symbols.join(","),
            out_dir: &out_dir,
            file: item.file,
            compiler_cmd: &compiler_cmd,
            symvers: self.layout.symvers(item.cs, kernel),
            ipa_clones_dir: self
                .layout
                .ipa_clones_dir(item.cs, self.layout.reference_arch()),
            patched_obj: self.patched_object(item),
            sdir: sdir.clone(),
            odir: odir.clone(),
        };
        let invocation = self.backend.command_args(&ctx);

        let log = out_dir.join(format!("{}.out.txt", self.backend.name()));
        self.backend
            .run(&invocation, &odir, &log)
            .map_err(|e| self.tool_error(item, &log, e))?;

        let ext_symbols = self.backend.symbol_report(&out_dir)?;

        let lp_out = out_dir.join(self.backend.output_file(item.fname));
        let src = fs::read_to_string(&lp_out)
            .map_err(|e| ExtractError::io(format!("reading {}", lp_out.display()), e))?;
        fs::write(&lp_out, strip_provenance(&src, &sdir))
            .map_err(|e| ExtractError::io(format!("writing {}", lp_out.display()), e))?;

        self.templates
            .render_makefile(item.cs, item.codestream, item.fname)?;

        let (done, total) = (self.progress.report_progress(), self.progress.total);
        debug!("{}:{} done ({}/{})", item.cs, item.fname, done, total);

        Ok(ItemOutcome {
            cs: item.cs.to_string(),
            fname: item.fname.to_string(),
            ext_symbols,
        })
    }

    /// Prebuilt object of the reference architecture that contains the file.
    fn patched_object(&self, item: &WorkItem<'_>) -> PathBuf {
        let module = if item.file.module.is_empty() {
            self.default_module
        } else {
            item.file.module.as_str()
        };
        let arch = self.layout.reference_arch();
        let kernel = &item.codestream.kernel;

        if module == VMLINUX {
            return self.layout.vmlinux_path(item.cs, kernel, arch);
        }

        let modules_dir = self.layout.modules_dir(item.cs, kernel, arch);
        match item.codestream.modules.get(module) {
            Some(rel) => modules_dir.join(rel),
            None => find_module(&modules_dir, module)
                .unwrap_or_else(|| modules_dir.join(format!("{}.ko", module))),
        }
    }

    fn tool_error(&self, item: &WorkItem<'_>, log: &Path, err: BackendError) -> ExtractError {
        match err {
            BackendError::ExitCode { code } => ExtractError::ToolFailed {
                tool: self.backend.tool_name().to_string(),
                cs: item.cs.to_string(),
                file: item.fname.to_string(),
                code,
                log: log.to_path_buf(),
            },
            BackendError::Io(e) => {
                ExtractError::io(format!("running {}", self.backend.tool_name()), e)
            }
            other => ExtractError::Config(other.to_string()),
        }
    }
}

/// Make the codestream's source file visible under its own name in `out_dir`.
fn link_source(src: &Path, out_dir: &Path) -> ExtractResult<()> {
    let Some(name) = src.file_name() else {
        return Err(ExtractError::Config(format!(
            "Invalid source file {}",
            src.display()
        )));
    };
    let dest = out_dir.join(name);
    if fs::symlink_metadata(&dest).is_ok() {
        fs::remove_file(&dest)
            .map_err(|e| ExtractError::io(format!("removing {}", dest.display()), e))?;
    }

    #[cfg(unix)]
    let result = std::os::unix::fs::symlink(src, &dest);
    #[cfg(not(unix))]
    let result = fs::copy(src, &dest).map(|_| ());

    result.map_err(|e| ExtractError::io(format!("linking {}", src.display()), e))
}

/// Executor for parallel item extraction.
#[derive(Debug, Clone, Copy)]
pub struct ParallelExecutor {
    worker_count: usize,
}

impl ParallelExecutor {
    /// Create an executor running at most `worker_count` items at once.
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run `job` over all items and return the results in item order.
    ///
    /// Returns as soon as possible after the first failure; items already
    /// running are allowed to finish, no new ones are started.
    pub fn execute<T, R, F>(&self, items: &[T], job: F) -> ExtractResult<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> ExtractResult<R> + Sync,
    {
        if items.len() <= 1 || self.worker_count == 1 {
            return items.iter().map(&job).collect();
        }

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_count)
            .thread_name(|i| format!("extractor-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                warn!("Failed to create thread pool: {}. Processing sequentially.", e);
                return items.iter().map(&job).collect();
            }
        };

        pool.install(|| items.par_iter().map(&job).collect())
    }
}
