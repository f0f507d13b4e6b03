//! Check-syms command handler

use anyhow::Result;

use klpgen::extractor::service::{select_codestreams, validate_symbols, write_missing_symbols};
use klpgen::extractor::NmSymbolTable;
use klpgen::Config;

use super::{open_workspace, parse_filter, GlobalArgs};

/// Validate the persisted externalized symbols on every architecture.
#[cfg(not(tarpaulin_include))]
pub fn handle(globals: &GlobalArgs, bsc: &str, filter: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let ws = open_workspace(&config, globals, bsc)?;

    let filter = parse_filter(filter)?;
    let selected = select_codestreams(&ws, filter.as_ref())?;

    let missing = validate_symbols(&ws.layout, &ws.conf, &NmSymbolTable, &ws.codestreams, &selected);
    write_missing_symbols(&ws.layout, &missing)?;

    if missing.is_empty() {
        println!("All externalized symbols found on every architecture.");
    } else {
        println!(
            "{} symbol(s) missing, see {}",
            missing.count(),
            ws.layout.missing_syms_path().display()
        );
    }

    Ok(())
}
