//! Diff command handler

use anyhow::Result;

use klpgen::extractor::group::load_outputs;
use klpgen::extractor::{diff_codestreams, BackendKind, OutputNormalizer};
use klpgen::Config;

use super::{open_workspace, output_backend, resolve_backend_kind, GlobalArgs};

/// Print the unified diff between the outputs of two codestreams.
#[cfg(not(tarpaulin_include))]
pub fn handle(
    globals: &GlobalArgs,
    bsc: &str,
    backend: Option<BackendKind>,
    cs1: &str,
    cs2: &str,
) -> Result<()> {
    let config = Config::load()?;
    let ws = open_workspace(&config, globals, bsc)?;
    let backend = output_backend(resolve_backend_kind(&config, backend)?, &ws);

    let normalizer = OutputNormalizer::new(ws.layout.data_dir());
    let selected = [cs1.to_string(), cs2.to_string()];
    let outputs = load_outputs(
        &ws.layout,
        backend.as_ref(),
        &normalizer,
        &ws.codestreams,
        &selected,
    )?;

    let diff = diff_codestreams(&outputs, cs1, cs2)?;
    if diff.is_empty() {
        println!("{} and {} have the same output.", cs1, cs2);
    } else {
        print!("{}", diff);
    }

    Ok(())
}
