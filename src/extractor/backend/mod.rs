//! Extraction tool backends.
//!
//! This module provides the Strategy pattern for the external tools that
//! turn a kernel source file into a self-contained livepatch source. Each
//! backend knows how to build its command line and how to read the
//! externalized symbol report it leaves behind.
//!
//! # Supported Tools
//!
//! - **klp-ccp**: `klp-ccp --pol-cmd-... --compiler=... -i <syms> -o <out> -- <cc args>`
//! - **clang-extract**: `clang-extract <cc args> -DCE_EXTRACT_FUNCTIONS=<syms> ...`
//!
//! # Design
//!
//! Backends are stateless once built and are shared by all workers.

mod ccp;
mod ce;

pub use ccp::CcpBackend;
pub use ce::CeBackend;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::codestream::{ExtSymbols, FileData};
use crate::extractor::{ExtractError, ExtractResult};

/// Result type for a single backend invocation.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors from running an extraction tool.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Extraction tool not found: {0}")]
    NotAvailable(String),

    #[error("Exit code {}", .code.map_or_else(|| "none (killed by signal)".to_string(), |c| c.to_string()))]
    ExitCode { code: Option<i32> },

    #[error("Empty command line")]
    EmptyCommand,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a backend needs to build the command line of one work item.
#[derive(Debug, Clone)]
pub struct InvocationContext<'a> {
    pub cs: &'a str,
    pub fname: &'a str,
    /// Functions to extract, comma separated
    pub symbols: String,
    /// Isolated working directory of the item
    pub out_dir: &'a Path,
    pub file: &'a FileData,
    /// Compiler invocation extracted from `make -sn`
    pub compiler_cmd: &'a str,
    pub sdir: PathBuf,
    pub odir: PathBuf,
    pub symvers: PathBuf,
    /// ipa-clones directory of the reference architecture
    pub ipa_clones_dir: PathBuf,
    /// Prebuilt object of the reference architecture the file ends up in
    pub patched_obj: PathBuf,
}

impl InvocationContext<'_> {
    /// Compiler invocation split into arguments.
    pub fn compiler_args(&self) -> impl Iterator<Item = &str> {
        self.compiler_cmd.split_whitespace()
    }

    /// ipa-clones dump of the file being extracted.
    pub fn ipa_clones_dump(&self) -> PathBuf {
        self.ipa_clones_dir
            .join(format!("{}.000i.ipa-clones", self.fname))
    }
}

/// Command line and extra environment of one tool run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
    /// Program followed by its arguments
    pub args: Vec<String>,
    /// Variables added to the inherited environment
    pub env: Vec<(String, String)>,
}

/// Trait for extraction tool backends (Strategy pattern).
///
/// Implementors must be thread-safe: one instance is shared by every worker.
pub trait ExtractorBackend: Send + Sync {
    /// Short name, also used as the output directory name (`ccp`, `ce`).
    fn name(&self) -> &'static str;

    /// Tool name used in messages.
    fn tool_name(&self) -> &'static str;

    /// Check if the tool can be executed.
    fn is_available(&self) -> bool;

    /// Build the command line for one work item.
    fn command_args(&self, ctx: &InvocationContext<'_>) -> Invocation;

    /// Name of the generated livepatch source inside the work directory.
    fn output_file(&self, fname: &str) -> String;

    /// Location of the externalized symbol report inside the work directory.
    fn report_path(&self, out_dir: &Path) -> PathBuf;

    /// Parse the externalized symbol report.
    fn parse_report(&self, contents: &str) -> Result<ExtSymbols, String>;

    /// Read the externalized symbol report a run left in `out_dir`.
    fn symbol_report(&self, out_dir: &Path) -> ExtractResult<ExtSymbols> {
        let path = self.report_path(out_dir);
        let contents = fs::read_to_string(&path).map_err(|e| ExtractError::SymbolReport {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        self.parse_report(&contents)
            .map_err(|reason| ExtractError::SymbolReport { path, reason })
    }

    /// Run the tool with `cwd` as working directory, logging to `log`.
    fn run(&self, invocation: &Invocation, cwd: &Path, log: &Path) -> BackendResult<()> {
        run_logged(invocation, cwd, log)
    }
}

/// Tools supported by `--backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum BackendKind {
    /// klp-ccp
    Ccp,
    /// clang-extract
    Ce,
}

impl BackendKind {
    /// Directory and config name of the backend.
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Ccp => "ccp",
            BackendKind::Ce => "ce",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ccp" | "klp-ccp" => Ok(BackendKind::Ccp),
            "ce" | "clang-extract" => Ok(BackendKind::Ce),
            other => Err(format!("Unknown backend '{}', expected ccp or ce", other)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Livepatch source name for a file: `bsc1_net_sched_sch_qfq.c`.
pub fn lp_out_file(bsc: &str, fname: &str) -> String {
    format!("{}_{}", bsc, fname.replace(['/', '-'], "_"))
}

/// Run a command with stdout and stderr appended to a log file.
///
/// The command line is written to the log first, one argument per line.
pub fn run_logged(invocation: &Invocation, cwd: &Path, log: &Path) -> BackendResult<()> {
    let (program, args) = invocation
        .args
        .split_first()
        .ok_or(BackendError::EmptyCommand)?;

    let mut file = File::create(log)?;
    writeln!(file, "{}", invocation.args.join("\n"))?;
    file.flush()?;
    let stderr = file.try_clone()?;

    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(file))
        .stderr(Stdio::from(stderr))
        .status()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotAvailable(program.clone())
            } else {
                BackendError::Io(e)
            }
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(BackendError::ExitCode {
            code: status.code(),
        })
    }
}

/// Check if a command exists, either as a path or in `PATH`.
pub fn command_exists(command: &str) -> bool {
    if command.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(command).is_file();
    }

    std::process::Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
