//! Normalization of generated livepatch sources.
//!
//! Two codestreams can produce sources that differ only in text that carries
//! no meaning: config headers, compiler version markers, absolute paths that
//! leak through macro expansions, debug line numbers. [`OutputNormalizer`]
//! removes those so equal outputs compare equal. Every rule is a pure
//! deletion, so applying the normalizer to its own output changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::path::Path;

/// Patterns removed from every generated source, independent of the file.
static NOISE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // kconfig.h is force-included by the build system
        r#"#include ".+kconfig\.h""#,
        // Since 15.4 klp-ccp includes a compiler-version.h header
        r#"#include ".+compiler-version\.h""#,
        // Differ between compiler versions even for long expanded macros
        r"\.lineno = \d+,",
        // klpr_trace is currently buggy in klp-ccp
        r"(?m)^.*klpr_trace.*$",
        // clang-extract leaves comments about itself
        r"(?m)^.*clang-extract: .*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// RT variants introduce a definition for `__auto_type`.
const AUTO_TYPE_DEFINE: &str = "#define __auto_type int\n";

/// Strips text that varies without semantic meaning from generated sources.
#[derive(Debug, Clone)]
pub struct OutputNormalizer {
    data_root: String,
}

impl OutputNormalizer {
    /// Create a normalizer for outputs generated from kernels under `data_root`.
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            data_root: data_root.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// Normalize the generated source of `fname`.
    pub fn normalize(&self, src: &str, fname: &str) -> String {
        let leaked_path = self.leaked_path_pattern(fname);

        // Deleting text can splice two lines together; repeat until stable
        let mut current = src.to_string();
        loop {
            let next = self.pass(&current, leaked_path.as_ref());
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn pass(&self, src: &str, leaked_path: Option<&Regex>) -> String {
        let mut out = src.replace(AUTO_TYPE_DEFINE, "");
        for re in NOISE_PATTERNS.iter() {
            if let Cow::Owned(replaced) = re.replace_all(&out, "") {
                out = replaced;
            }
        }
        // Codestream names end up in paths inside expanded macros
        if let Some(re) = leaked_path {
            if let Cow::Owned(replaced) = re.replace_all(&out, "") {
                out = replaced;
            }
        }
        out
    }

    fn leaked_path_pattern(&self, fname: &str) -> Option<Regex> {
        if self.data_root.is_empty() {
            return None;
        }
        Regex::new(&format!(
            "{}.+{}",
            regex::escape(&self.data_root),
            regex::escape(fname)
        ))
        .ok()
    }
}

/// Remove the local source tree prefix from provenance comments.
///
/// The extraction tools annotate copied code with comments such as
/// `/* from /data/15.4u12/usr/src/linux-5.14/net/sched/sch_qfq.c:12 */`.
/// Only comment lines are touched; code is left as is.
pub fn strip_provenance(src: &str, sdir: &Path) -> String {
    let needle = format!("from {}/", sdir.display());
    src.split_inclusive('\n')
        .map(|line| {
            if is_comment_line(line) && line.contains(&needle) {
                Cow::Owned(line.replace(&needle, "from "))
            } else {
                Cow::Borrowed(line)
            }
        })
        .collect()
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("/*") || trimmed.starts_with('*') || trimmed.starts_with("//")
}
