//! Externalized symbol accounting.
//!
//! The tracker aggregates, per codestream and per output object, every
//! symbol the extraction tool externalized for any of the codestream's files.
//! It is filled from worker outcomes after the extraction barrier, so it needs
//! no synchronization.

use std::collections::BTreeMap;

use crate::codestream::{CodestreamTable, ExtSymbols};

/// Externalized symbols of all codestreams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTracker {
    /// codestream -> object -> symbols, in first-seen order without duplicates
    entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl SymbolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracker from the symbols persisted in a codestream table.
    pub fn from_table(table: &CodestreamTable) -> Self {
        let mut tracker = Self::new();
        for (cs, codestream) in table.iter() {
            for file in codestream.files.values() {
                tracker.record(cs, &file.ext_symbols);
            }
        }
        tracker
    }

    /// Add the symbols one file of `cs` externalized.
    pub fn record(&mut self, cs: &str, ext_symbols: &ExtSymbols) {
        let objects = self.entries.entry(cs.to_string()).or_default();
        for (object, symbols) in ext_symbols {
            let known = objects.entry(object.clone()).or_default();
            for sym in symbols {
                if !known.contains(sym) {
                    known.push(sym.clone());
                }
            }
        }
    }

    /// Objects and their symbols for one codestream.
    pub fn objects(&self, cs: &str) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .get(cs)
            .into_iter()
            .flat_map(|objects| objects.iter().map(|(o, s)| (o.as_str(), s.as_slice())))
    }

    /// Total number of distinct (codestream, object, symbol) entries.
    pub fn symbol_count(&self) -> usize {
        self.entries
            .values()
            .flat_map(|objects| objects.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.symbol_count() == 0
    }
}
