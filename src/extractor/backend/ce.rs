//! clang-extract backend implementation.
//!
//! clang-extract takes the compiler invocation directly and is configured
//! through `-DCE_*` options. Externalized symbols are listed in the
//! `libcextract.dsc` description file it writes next to the output.

use super::{command_exists, lp_out_file, ExtractorBackend, Invocation, InvocationContext};
use crate::codestream::{ExtSymbols, VMLINUX};
use std::path::{Path, PathBuf};

const DSC_FILE: &str = "libcextract.dsc";
const PROTOTYPE_HEADER: &str = "proto.h";

/// Backend for clang-extract.
#[derive(Debug, Clone)]
pub struct CeBackend {
    bsc: String,
    ce_path: PathBuf,
}

impl CeBackend {
    pub fn new(bsc: impl Into<String>, ce_path: impl Into<PathBuf>) -> Self {
        Self {
            bsc: bsc.into(),
            ce_path: ce_path.into(),
        }
    }
}

impl ExtractorBackend for CeBackend {
    fn name(&self) -> &'static str {
        "ce"
    }

    fn tool_name(&self) -> &'static str {
        "clang-extract"
    }

    fn is_available(&self) -> bool {
        command_exists(&self.ce_path.to_string_lossy())
    }

    fn command_args(&self, ctx: &InvocationContext<'_>) -> Invocation {
        let out_dir = ctx.out_dir;
        let define = |name: &str, value: &Path| format!("-DCE_{}={}", name, value.display());

        // clang-extract takes the place of the compiler
        let mut args = vec![self.ce_path.to_string_lossy().into_owned()];
        args.extend(ctx.compiler_args().map(str::to_string));
        args.extend([
            define("DEBUGINFO_PATH", &ctx.patched_obj),
            define("SYMVERS_PATH", &ctx.symvers),
            define("OUTPUT_FILE", &out_dir.join(self.output_file(ctx.fname))),
            define(
                "OUTPUT_FUNCTION_PROTOTYPE_HEADER",
                &out_dir.join(PROTOTYPE_HEADER),
            ),
            "-DCE_KEEP_INCLUDES".to_string(),
            "-DCE_RENAME_SYMBOLS".to_string(),
            format!("-DCE_EXTRACT_FUNCTIONS={}", ctx.symbols),
            define("DSC_OUTPUT", &self.report_path(out_dir)),
            "-DCE_LATE_EXTERNALIZE".to_string(),
            define("IPACLONES_PATH", &ctx.ipa_clones_dir),
        ]);

        Invocation {
            args,
            env: Vec::new(),
        }
    }

    fn output_file(&self, fname: &str) -> String {
        lp_out_file(&self.bsc, fname)
    }

    fn report_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(DSC_FILE)
    }

    fn parse_report(&self, contents: &str) -> Result<ExtSymbols, String> {
        let mut lines = contents.lines();
        // First line names the generated file
        lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| "empty description file".to_string())?;

        let mut syms = ExtSymbols::new();
        for line in lines {
            let Some(entry) = line.trim().strip_prefix('#') else {
                continue;
            };
            if entry.is_empty() {
                continue;
            }

            let (sym, object) = match entry.split_once(':') {
                Some((sym, module)) if !module.is_empty() => (sym, module),
                Some((sym, _)) => (sym, VMLINUX),
                None => (entry, VMLINUX),
            };
            syms.entry(object.to_string())
                .or_default()
                .push(sym.to_string());
        }

        Ok(syms)
    }
}
