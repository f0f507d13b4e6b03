//! Groups command handler

use anyhow::Result;

use klpgen::extractor::service::{group_codestreams, select_codestreams};
use klpgen::extractor::BackendKind;
use klpgen::Config;

use super::{open_workspace, output_backend, parse_filter, resolve_backend_kind, GlobalArgs};

/// Regroup codestreams from the output of a previous extraction.
#[cfg(not(tarpaulin_include))]
pub fn handle(
    globals: &GlobalArgs,
    bsc: &str,
    filter: Option<&str>,
    backend: Option<BackendKind>,
) -> Result<()> {
    let config = Config::load()?;
    let ws = open_workspace(&config, globals, bsc)?;
    let backend = output_backend(resolve_backend_kind(&config, backend)?, &ws);

    let filter = parse_filter(filter)?;
    let selected = select_codestreams(&ws, filter.as_ref())?;
    let labels = group_codestreams(&ws.layout, backend.as_ref(), &ws.codestreams, &selected)?;

    for label in labels {
        println!("{}", label);
    }

    Ok(())
}
