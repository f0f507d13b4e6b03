//! Command handlers for the klpgen CLI.
//!
//! Each submodule handles a specific CLI command or command group.
//! The main dispatch logic remains in main.rs.

pub mod check_syms;
pub mod completions;
pub mod config;
pub mod diff;
pub mod extract;
pub mod groups;

use anyhow::{Context, Result};
use regex::Regex;
use std::path::PathBuf;

use klpgen::extractor::{BackendKind, CcpBackend, CeBackend, ExtractorBackend};
use klpgen::{Config, Workspace};

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub work_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

/// Open the livepatch `bsc` using the configured directories.
pub fn open_workspace(config: &Config, globals: &GlobalArgs, bsc: &str) -> Result<Workspace> {
    let work_dir = config.work_dir(globals.work_dir.as_deref())?;
    let data_dir = config.data_dir(globals.data_dir.as_deref());
    let ws = Workspace::open(
        &work_dir,
        bsc,
        data_dir.as_deref(),
        &config.extraction.reference_arch,
    )?;
    Ok(ws)
}

/// Compile the codestream filter; an empty filter selects everything.
pub fn parse_filter(filter: Option<&str>) -> Result<Option<Regex>> {
    match filter.filter(|f| !f.is_empty()) {
        Some(f) => Regex::new(f)
            .map(Some)
            .with_context(|| format!("Invalid codestream filter '{}'", f)),
        None => Ok(None),
    }
}

/// Backend from the command line, or the configured default.
pub fn resolve_backend_kind(config: &Config, flag: Option<BackendKind>) -> Result<BackendKind> {
    match flag {
        Some(kind) => Ok(kind),
        None => config
            .extraction
            .backend
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e)),
    }
}

/// Backend used to locate existing output; its tool is never run.
pub fn output_backend(kind: BackendKind, ws: &Workspace) -> Box<dyn ExtractorBackend> {
    match kind {
        BackendKind::Ccp => Box::new(CcpBackend::new(
            ws.layout.bsc(),
            "klp-ccp",
            "",
            "",
            ws.conf.module.as_str(),
        )),
        BackendKind::Ce => Box::new(CeBackend::new(ws.layout.bsc(), "clang-extract")),
    }
}
