//! Cross-architecture symbol validation.
//!
//! A livepatch built for one architecture may reference symbols that do not
//! exist in the same object on another architecture (different config,
//! different inlining). Every externalized symbol is looked up in the
//! prebuilt object of each target architecture; gaps are collected in a
//! [`MissingSymbolReport`] and never fail the run.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::codestream::{Codestream, VMLINUX};
use crate::config::Layout;
use crate::extractor::{ExtractError, ExtractResult};

/// `<addr> <type> <name>`. Undefined symbols carry no address and never match.
///
/// Addresses are matched as words: s390x tables can carry addresses that
/// do not end in a digit.
static NM_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\w+\s+(\w)\s+(\S+)$").ok());

/// Symbol types that only reference a symbol defined elsewhere.
const UNDEFINED_TYPES: [&str; 3] = ["U", "w", "v"];

/// Provider of the raw symbol table of an object file.
pub trait SymbolTableSource: Send + Sync {
    /// Text in `nm` format for the object at `object`.
    fn read_symbols(&self, object: &Path) -> ExtractResult<String>;
}

/// Reads symbol tables with `nm`.
#[derive(Debug, Clone, Default)]
pub struct NmSymbolTable;

impl SymbolTableSource for NmSymbolTable {
    fn read_symbols(&self, object: &Path) -> ExtractResult<String> {
        let output = Command::new("nm")
            .arg(object)
            .output()
            .map_err(|e| ExtractError::io(format!("running nm on {}", object.display()), e))?;

        if !output.status.success() {
            return Err(ExtractError::io(
                format!("running nm on {}", object.display()),
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Symbol names defined in an `nm` listing.
pub fn parse_symbol_table(listing: &str) -> HashSet<String> {
    let Some(nm_line) = NM_LINE.as_ref() else {
        return HashSet::new();
    };
    listing
        .lines()
        .filter_map(|line| nm_line.captures(line.trim_end()))
        .filter(|caps| !UNDEFINED_TYPES.contains(&&caps[1]))
        .map(|caps| caps[2].to_string())
        .collect()
}

/// Parsed symbol tables, loaded at most once per object for a run.
#[derive(Debug, Default)]
pub struct SymbolTableCache {
    tables: Mutex<HashMap<PathBuf, Arc<HashSet<String>>>>,
}

impl SymbolTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbol table of `object`, loading it through `source` on first use.
    pub fn get_or_load(
        &self,
        source: &dyn SymbolTableSource,
        object: &Path,
    ) -> ExtractResult<Arc<HashSet<String>>> {
        if let Some(table) = self.lock().get(object) {
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(parse_symbol_table(&source.read_symbols(object)?));
        debug!("Loaded {} symbols from {}", table.len(), object.display());
        self.lock()
            .insert(object.to_path_buf(), Arc::clone(&table));
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<HashSet<String>>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Symbols absent from an architecture's object: arch -> object -> codestream -> symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissingSymbolReport {
    entries: BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>,
}

impl MissingSymbolReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record symbols missing from `object` of `cs` on `arch`.
    pub fn add<I, S>(&mut self, arch: &str, object: &str, cs: &str, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut symbols = symbols.into_iter().map(Into::into).peekable();
        if symbols.peek().is_none() {
            return;
        }
        self.entries
            .entry(arch.to_string())
            .or_default()
            .entry(object.to_string())
            .or_default()
            .entry(cs.to_string())
            .or_default()
            .extend(symbols);
    }

    /// Symbols recorded for one (arch, object, codestream).
    pub fn get(&self, arch: &str, object: &str, cs: &str) -> Option<&[String]> {
        self.entries
            .get(arch)?
            .get(object)?
            .get(cs)
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of missing (arch, object, codestream, symbol) entries.
    pub fn count(&self) -> usize {
        self.entries
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Pretty JSON, as written to the `missing_syms` file.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Checks externalized symbols against the objects of every target architecture.
pub struct CrossArchSymbolValidator<'a> {
    layout: &'a Layout,
    source: &'a dyn SymbolTableSource,
    /// Architectures the livepatch supports
    lp_archs: &'a [String],
    cache: SymbolTableCache,
}

impl<'a> CrossArchSymbolValidator<'a> {
    pub fn new(layout: &'a Layout, source: &'a dyn SymbolTableSource, lp_archs: &'a [String]) -> Self {
        Self {
            layout,
            source,
            lp_archs,
            cache: SymbolTableCache::new(),
        }
    }

    /// Architectures checked for a codestream: its own, restricted to the
    /// ones the livepatch supports.
    pub fn target_archs<'c>(&self, codestream: &'c Codestream) -> Vec<&'c str> {
        codestream
            .archs
            .iter()
            .filter(|arch| self.lp_archs.contains(arch))
            .map(String::as_str)
            .collect()
    }

    /// Check the symbols of every object of `cs`, adding gaps to `report`.
    pub fn validate<'o>(
        &self,
        cs: &str,
        codestream: &Codestream,
        objects: impl IntoIterator<Item = (&'o str, &'o [String])>,
        report: &mut MissingSymbolReport,
    ) {
        let archs = self.target_archs(codestream);
        for (object, symbols) in objects {
            if symbols.is_empty() {
                continue;
            }
            for arch in &archs {
                let missing = self.missing_symbols(cs, codestream, arch, object, symbols);
                report.add(arch, object, cs, missing);
            }
        }
    }

    fn missing_symbols<'s>(
        &self,
        cs: &str,
        codestream: &Codestream,
        arch: &str,
        object: &str,
        symbols: &'s [String],
    ) -> Vec<&'s String> {
        let Some(path) = self.object_path(cs, codestream, arch, object) else {
            warn!("{}: object {} not found for {}", cs, object, arch);
            return symbols.iter().collect();
        };

        match self.cache.get_or_load(self.source, &path) {
            Ok(table) => symbols.iter().filter(|s| !table.contains(*s)).collect(),
            Err(e) => {
                warn!("{}: could not read symbols of {}: {}", cs, path.display(), e);
                symbols.iter().collect()
            }
        }
    }

    /// Prebuilt object of `object` for `arch`.
    pub fn object_path(
        &self,
        cs: &str,
        codestream: &Codestream,
        arch: &str,
        object: &str,
    ) -> Option<PathBuf> {
        if object == VMLINUX {
            let path = self.layout.vmlinux_path(cs, &codestream.kernel, arch);
            return path.is_file().then_some(path);
        }

        let modules_dir = self.layout.modules_dir(cs, &codestream.kernel, arch);
        if let Some(rel) = codestream.modules.get(object) {
            let path = modules_dir.join(rel);
            if path.is_file() {
                return Some(path);
            }
        }
        find_module(&modules_dir, object)
    }
}

/// Search `<mod>.ko` below `dir`; `-` and `_` are interchangeable in module names.
pub fn find_module(dir: &Path, module: &str) -> Option<PathBuf> {
    let wanted = format!("{}.ko", module.replace('-', "_"));
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .find(|e| e.file_name().to_string_lossy().replace('-', "_") == wanted)
        .map(|e| e.into_path())
}
