//! Extract command handler
//!
//! Uses the PipelineDriver facade to run every stage:
//! 1. Open the livepatch and select codestreams
//! 2. Apply patches (optional)
//! 3. Extract all (codestream, file) pairs in parallel
//! 4. Group codestreams with equal output
//! 5. Check externalized symbols on every architecture

use anyhow::{bail, Result};

use klpgen::extractor::{
    BackendKind, CcpBackend, CeBackend, ExtractorBackend, MakeCommand, NmSymbolTable,
    PipelineDriver, PipelineOptions,
};
use klpgen::patches::QuiltPatches;
use klpgen::templates::PlainTemplates;
use klpgen::Config;

use super::{open_workspace, parse_filter, resolve_backend_kind, GlobalArgs};

/// Run the extraction pipeline for livepatch `bsc`.
#[cfg(not(tarpaulin_include))]
pub fn handle(
    globals: &GlobalArgs,
    bsc: &str,
    filter: Option<&str>,
    apply_patches: bool,
    backend: Option<BackendKind>,
    workers: Option<usize>,
    avoid_ext: &str,
) -> Result<()> {
    let config = Config::load()?;
    let mut ws = open_workspace(&config, globals, bsc)?;
    let kind = resolve_backend_kind(&config, backend)?;

    let backend: Box<dyn ExtractorBackend> = match kind {
        BackendKind::Ccp => Box::new(CcpBackend::new(
            ws.layout.bsc(),
            config.ccp_path()?,
            config.ccp_pol_path()?,
            avoid_ext,
            ws.conf.module.as_str(),
        )),
        BackendKind::Ce => Box::new(CeBackend::new(ws.layout.bsc(), config.ce_path())),
    };
    if !backend.is_available() {
        bail!(
            "{} is not installed. Install it or use --backend to select another tool.",
            backend.tool_name()
        );
    }

    let patches = if apply_patches {
        Some(QuiltPatches::open(&ws.layout.patches_dir())?)
    } else {
        None
    };

    let commands = MakeCommand::new(&config.tools.compiler);
    let templates = PlainTemplates::new(ws.layout.clone(), ws.conf.clone(), kind.name());
    let nm = NmSymbolTable;
    let options = PipelineOptions::default()
        .filter(parse_filter(filter)?)
        .workers(workers.unwrap_or(config.extraction.workers));

    let mut driver = PipelineDriver::new(backend.as_ref(), &commands, &templates, &nm, options);
    if let Some(patches) = &patches {
        driver = driver.with_patches(patches);
    }

    let summary = driver.run(&mut ws)?;

    println!(
        "Extracted {} file(s) into {} group(s).",
        summary.items,
        summary.groups.len()
    );
    if !summary.missing.is_empty() {
        println!(
            "{} symbol(s) missing on other architectures, see {}",
            summary.missing.count(),
            ws.layout.missing_syms_path().display()
        );
    }

    Ok(())
}
