//! PipelineDriver facade for a full extraction run.
//!
//! # Workflow
//!
//! 1. Select codestreams (filter)
//! 2. Wipe previous output and apply patches per codestream
//! 3. Extract every (codestream, file) pair in parallel
//! 4. Persist externalized symbols, render per-codestream livepatch files
//! 5. Group codestreams with equal output
//! 6. Per codestream: remove patches, validate symbols on every
//!    architecture, render build manifests
//! 7. Write the missing-symbol report

use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::codestream::{CodestreamTable, CodestreamVersion};
use crate::config::{Layout, LivepatchConf, Workspace};
use crate::patches::PatchSet;
use crate::templates::TemplateRenderer;

use super::backend::ExtractorBackend;
use super::group::{group_equal, group_labels, load_outputs};
use super::make::CompilerCommandSource;
use super::normalize::OutputNormalizer;
use super::symbols::{CrossArchSymbolValidator, MissingSymbolReport, SymbolTableSource};
use super::tracker::SymbolTracker;
use super::worker::{ExtractionWorker, ParallelExecutor, WorkItem, DEFAULT_WORKERS};
use super::{ExtractError, ExtractResult};

/// Options of one run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Only codestreams matching this expression are processed
    pub filter: Option<Regex>,
    /// Maximum number of concurrent extractions
    pub workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            filter: None,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl PipelineOptions {
    pub fn filter(mut self, filter: Option<Regex>) -> Self {
        self.filter = filter;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Number of extracted (codestream, file) pairs
    pub items: usize,
    /// Group labels, one per group
    pub groups: Vec<String>,
    pub missing: MissingSymbolReport,
}

/// Drives all pipeline stages for one livepatch.
///
/// Facade pattern - the collaborators are injected so tests can replace the
/// external tools.
pub struct PipelineDriver<'a> {
    backend: &'a dyn ExtractorBackend,
    commands: &'a dyn CompilerCommandSource,
    patches: Option<&'a dyn PatchSet>,
    templates: &'a dyn TemplateRenderer,
    symbols: &'a dyn SymbolTableSource,
    options: PipelineOptions,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(
        backend: &'a dyn ExtractorBackend,
        commands: &'a dyn CompilerCommandSource,
        templates: &'a dyn TemplateRenderer,
        symbols: &'a dyn SymbolTableSource,
        options: PipelineOptions,
    ) -> Self {
        Self {
            backend,
            commands,
            patches: None,
            templates,
            symbols,
            options,
        }
    }

    /// Apply `patches` to every selected codestream around extraction.
    pub fn with_patches(mut self, patches: &'a dyn PatchSet) -> Self {
        self.patches = Some(patches);
        self
    }

    /// Run the whole pipeline, updating the codestream table of `ws`.
    ///
    /// On failure every codestream patched so far is restored before the
    /// error is returned.
    pub fn run(&self, ws: &mut Workspace) -> ExtractResult<RunSummary> {
        let layout = ws.layout.clone();
        info!("Work directory: {}", layout.bsc_path().display());

        let selected = select_codestreams(ws, self.options.filter.as_ref())?;

        // Codestreams whose source tree is currently patched
        let mut patched = Vec::new();
        let result = self
            .prepare(&layout, &ws.codestreams, &selected, &mut patched)
            .and_then(|()| self.run_stages(ws, &layout, &selected, &mut patched));

        if result.is_err() {
            self.remove_patches_best_effort(&layout, &ws.codestreams, &patched);
        }
        result
    }

    /// Wipe previous output and apply patches, recording patched codestreams.
    fn prepare(
        &self,
        layout: &Layout,
        table: &CodestreamTable,
        selected: &[String],
        patched: &mut Vec<String>,
    ) -> ExtractResult<()> {
        for cs in selected {
            let tool_dir = layout.tool_dir(cs, self.backend.name());
            if tool_dir.exists() {
                fs::remove_dir_all(&tool_dir)
                    .map_err(|e| ExtractError::io(format!("removing {}", tool_dir.display()), e))?;
            }
            self.apply_patches(layout, table, cs)?;
            patched.push(cs.clone());
        }
        Ok(())
    }

    fn run_stages(
        &self,
        ws: &mut Workspace,
        layout: &Layout,
        selected: &[String],
        patched: &mut Vec<String>,
    ) -> ExtractResult<RunSummary> {
        let outcomes = {
            let items = work_items(&ws.codestreams, selected);
            info!("Generating livepatches for {} file(s)...", items.len());

            let worker = ExtractionWorker::new(
                layout,
                self.backend,
                self.commands,
                self.templates,
                &ws.conf.module,
                items.len(),
            );
            ParallelExecutor::new(self.options.workers).execute(&items, |item| worker.process(item))?
        };
        let items = outcomes.len();

        let mut tracker = SymbolTracker::new();
        for outcome in outcomes {
            tracker.record(&outcome.cs, &outcome.ext_symbols);
            if let Some(file) = ws
                .codestreams
                .get_mut(&outcome.cs)
                .and_then(|codestream| codestream.files.get_mut(&outcome.fname))
            {
                file.ext_symbols = outcome.ext_symbols;
            }
        }
        ws.flush_codestreams()?;

        for cs in selected {
            if let Some(codestream) = ws.codestreams.get(cs) {
                self.templates.render_codestream(cs, codestream)?;
            }
        }

        let groups = group_codestreams(layout, self.backend, &ws.codestreams, selected)?;

        self.templates.render_commit_msg()?;

        info!("Checking the externalized symbols in other architectures...");
        let validator = CrossArchSymbolValidator::new(layout, self.symbols, &ws.conf.archs);
        let mut missing = MissingSymbolReport::new();
        for cs in selected {
            let Some(codestream) = ws.codestreams.get(cs) else {
                continue;
            };
            if let Some(pos) = patched.iter().position(|p| p == cs) {
                patched.remove(pos);
                if let Some(patches) = self.patches {
                    patches.remove(cs, &layout.sdir(cs, &codestream.kernel))?;
                }
            }
            validator.validate(cs, codestream, tracker.objects(cs), &mut missing);
            self.templates.render_kbuild(cs, codestream)?;
        }

        write_missing_symbols(layout, &missing)?;

        Ok(RunSummary {
            items,
            groups,
            missing,
        })
    }

    fn apply_patches(&self, layout: &Layout, table: &CodestreamTable, cs: &str) -> ExtractResult<()> {
        let (Some(patches), Some(codestream)) = (self.patches, table.get(cs)) else {
            return Ok(());
        };
        patches.apply(cs, &layout.sdir(cs, &codestream.kernel))
    }

    fn remove_patches_best_effort(&self, layout: &Layout, table: &CodestreamTable, selected: &[String]) {
        let Some(patches) = self.patches else {
            return;
        };
        for cs in selected {
            let Some(codestream) = table.get(cs) else {
                continue;
            };
            if let Err(e) = patches.remove(cs, &layout.sdir(cs, &codestream.kernel)) {
                warn!("{}: failed to remove patches: {}", cs, e);
            }
        }
    }
}

/// Codestreams of `ws` matching `filter`, in table order.
///
/// Fails when nothing matches or a selected id is malformed.
pub fn select_codestreams(ws: &Workspace, filter: Option<&Regex>) -> ExtractResult<Vec<String>> {
    let selected = ws.select(filter);
    if selected.is_empty() {
        return Err(ExtractError::Config(match filter {
            Some(re) => format!("No codestreams match the filter '{}'", re.as_str()),
            None => "No codestreams to process".to_string(),
        }));
    }

    for cs in &selected {
        cs.parse::<CodestreamVersion>()
            .map_err(|e| ExtractError::Config(e.to_string()))?;
    }

    info!("Working on codestreams: {}", selected.join(" "));
    Ok(selected)
}

/// All (codestream, file) pairs of the selected codestreams, numbered from 1.
fn work_items<'t>(table: &'t CodestreamTable, selected: &[String]) -> Vec<WorkItem<'t>> {
    let mut items = Vec::new();
    for (cs, codestream) in table.iter() {
        if !selected.iter().any(|s| s == cs) {
            continue;
        }
        for (fname, file) in codestream.files.iter() {
            items.push(WorkItem {
                index: items.len() + 1,
                fname,
                cs,
                codestream,
                file,
            });
        }
    }
    items
}

/// Group the selected codestreams by their existing output and write the
/// labels to the backend's groups file.
pub fn group_codestreams(
    layout: &Layout,
    backend: &dyn ExtractorBackend,
    table: &CodestreamTable,
    selected: &[String],
) -> ExtractResult<Vec<String>> {
    let normalizer = OutputNormalizer::new(layout.data_dir());
    let outputs = load_outputs(layout, backend, &normalizer, table, selected)?;
    let labels = group_labels(&group_equal(&outputs));

    let path = layout.groups_path(backend.name());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ExtractError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(&path, labels.join("\n"))
        .map_err(|e| ExtractError::io(format!("writing {}", path.display()), e))?;

    info!("Grouping codestreams for each file processed by {}:", backend.tool_name());
    for label in &labels {
        info!("\t{}", label);
    }

    Ok(labels)
}

/// Validate the externalized symbols persisted in the codestream table.
pub fn validate_symbols(
    layout: &Layout,
    conf: &LivepatchConf,
    source: &dyn SymbolTableSource,
    table: &CodestreamTable,
    selected: &[String],
) -> MissingSymbolReport {
    let tracker = SymbolTracker::from_table(table);
    let validator = CrossArchSymbolValidator::new(layout, source, &conf.archs);
    let mut missing = MissingSymbolReport::new();
    for cs in selected {
        if let Some(codestream) = table.get(cs) {
            validator.validate(cs, codestream, tracker.objects(cs), &mut missing);
        }
    }
    missing
}

/// Write `missing_syms` when the report is not empty, otherwise remove the
/// report of an earlier run.
pub fn write_missing_symbols(layout: &Layout, missing: &MissingSymbolReport) -> ExtractResult<()> {
    let path = layout.missing_syms_path();
    if missing.is_empty() {
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| ExtractError::io(format!("removing {}", path.display()), e))?;
        }
        return Ok(());
    }

    let json = missing.to_json().map_err(|source| ExtractError::Json {
        path: path.clone(),
        source,
    })?;
    write_report(&path, &json)?;

    warn!("Symbols not found:");
    warn!("{}", json);
    Ok(())
}

fn write_report(path: &Path, json: &str) -> ExtractResult<()> {
    fs::write(path, json).map_err(|e| ExtractError::io(format!("writing {}", path.display()), e))
}
