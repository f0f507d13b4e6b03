//! Grouping of codestreams by generated output.
//!
//! Codestreams whose normalized livepatch sources are identical can share
//! one livepatch. Two codestreams are equal when they have the same number
//! of files, the same file at every position and the same normalized
//! content at every position. The comparison is positional: the same files
//! enumerated in a different order make two codestreams different.

use std::fs;

use crate::codestream::{CodestreamTable, OrderedMap};
use crate::config::Layout;
use crate::extractor::backend::ExtractorBackend;
use crate::extractor::classify::{classify_codestreams, natural_sort};
use crate::extractor::normalize::OutputNormalizer;
use crate::extractor::{ExtractError, ExtractResult};

/// Normalized livepatch source of one (codestream, file) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedOutput {
    pub fname: String,
    pub content: String,
}

impl GeneratedOutput {
    pub fn new(fname: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            fname: fname.into(),
            content: content.into(),
        }
    }
}

/// Generated outputs of every codestream, files in enumeration order.
pub type CodestreamOutputs = OrderedMap<Vec<GeneratedOutput>>;

/// Read and normalize the generated sources of the selected codestreams.
pub fn load_outputs(
    layout: &Layout,
    backend: &dyn ExtractorBackend,
    normalizer: &OutputNormalizer,
    table: &CodestreamTable,
    selected: &[String],
) -> ExtractResult<CodestreamOutputs> {
    let mut outputs = CodestreamOutputs::new();

    for cs in selected {
        let Some(codestream) = table.get(cs) else {
            return Err(ExtractError::Config(format!(
                "Codestream {} not found in codestreams.json",
                cs
            )));
        };

        let mut files = Vec::with_capacity(codestream.files.len());
        for fname in codestream.files.keys() {
            let path = layout
                .work_dir(cs, fname, backend.name())
                .join(backend.output_file(fname));
            let src = fs::read_to_string(&path)
                .map_err(|e| ExtractError::io(format!("reading {}", path.display()), e))?;
            files.push(GeneratedOutput::new(fname, normalizer.normalize(&src, fname)));
        }
        outputs.insert(cs.as_str(), files);
    }

    Ok(outputs)
}

/// Partition codestreams into groups with identical outputs.
///
/// Every codestream ends up in exactly one group. Groups appear in the order
/// of their first member in `outputs`; members are naturally sorted.
pub fn group_equal(outputs: &CodestreamOutputs) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut processed: Vec<&str> = Vec::new();
    let mut to_process: Vec<(&str, &Vec<GeneratedOutput>)> = outputs.iter().collect();
    to_process.reverse();

    while let Some((cs, files)) = to_process.pop() {
        if processed.contains(&cs) {
            continue;
        }

        let mut group = vec![cs.to_string()];
        for &(candidate, candidate_files) in to_process.iter().rev() {
            if !processed.contains(&candidate) && same_outputs(files, candidate_files) {
                processed.push(candidate);
                group.push(candidate.to_string());
            }
        }

        natural_sort(&mut group);
        groups.push(group);
    }

    groups
}

fn same_outputs(a: &[GeneratedOutput], b: &[GeneratedOutput]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

/// One label per group: its range tokens joined by spaces.
pub fn group_labels(groups: &[Vec<String>]) -> Vec<String> {
    groups
        .iter()
        .map(|group| classify_codestreams(group).join(" "))
        .collect()
}

/// Unified diff of the normalized outputs of two codestreams, file by file.
pub fn diff_codestreams(
    outputs: &CodestreamOutputs,
    left: &str,
    right: &str,
) -> ExtractResult<String> {
    let missing = |cs: &str| ExtractError::Config(format!("No output loaded for codestream {}", cs));
    let left_files = outputs.get(left).ok_or_else(|| missing(left))?;
    let right_files = outputs.get(right).ok_or_else(|| missing(right))?;

    if left_files.len() != right_files.len() {
        return Err(ExtractError::FileCountMismatch {
            left: left.to_string(),
            right: right.to_string(),
            left_count: left_files.len(),
            right_count: right_files.len(),
        });
    }

    let mut out = String::new();
    for (l, r) in left_files.iter().zip(right_files) {
        if l.content == r.content {
            continue;
        }
        let diff = similar::TextDiff::from_lines(&l.content, &r.content)
            .unified_diff()
            .header(
                &format!("{}/{}", left, l.fname),
                &format!("{}/{}", right, r.fname),
            )
            .to_string();
        out.push_str(&diff);
    }

    Ok(out)
}
