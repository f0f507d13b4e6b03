//! Compiler command preparation.
//!
//! The extraction tools need the exact compiler invocation kbuild would use
//! for a file. It is obtained by a dry run of `make` in the codestream's
//! object tree. Make may regenerate `fixdep` while doing so, which is not
//! safe to do concurrently; callers serialize [`CompilerCommandSource`]
//! calls behind a single lock.

use regex::Regex;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::extractor::{ExtractError, ExtractResult};

/// Source of compiler invocations for (codestream, file) pairs.
pub trait CompilerCommandSource: Send + Sync {
    /// Compiler flags used to build `fname` in codestream `cs`.
    ///
    /// `odir` is the kernel object tree, `out_dir` the item's work directory
    /// where diagnostics may be left.
    fn compiler_command(
        &self,
        cs: &str,
        fname: &str,
        odir: &Path,
        out_dir: &Path,
    ) -> ExtractResult<String>;
}

/// `make -sn` based command source.
#[derive(Debug, Clone)]
pub struct MakeCommand {
    cc: String,
}

impl MakeCommand {
    pub fn new(cc: impl Into<String>) -> Self {
        Self { cc: cc.into() }
    }

    /// Arguments of the dry run for one file.
    pub fn make_args(&self, cs: &str, fname: &str) -> Vec<String> {
        let object = Path::new(fname).with_extension("o");
        vec![
            "-sn".to_string(),
            format!("CC={}", self.cc),
            format!("KLP_CS={}", cs),
            format!("HOSTCC={}", self.cc),
            "WERROR=0".to_string(),
            "CFLAGS_REMOVE_objtool=-Werror".to_string(),
            object.to_string_lossy().into_owned(),
        ]
    }
}

impl CompilerCommandSource for MakeCommand {
    fn compiler_command(
        &self,
        cs: &str,
        fname: &str,
        odir: &Path,
        out_dir: &Path,
    ) -> ExtractResult<String> {
        let make_failed = |message: String| ExtractError::MakeFailed {
            cs: cs.to_string(),
            file: fname.to_string(),
            message,
        };

        let output = Command::new("make")
            .args(self.make_args(cs, fname))
            .current_dir(odir)
            .output()
            .map_err(|e| make_failed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let log = out_dir.join("make.out.txt");
        fs::write(&log, format!("{}{}", stdout, stderr))
            .map_err(|e| ExtractError::io(format!("writing {}", log.display()), e))?;

        if !output.status.success() {
            return Err(make_failed(format!(
                "exit status {}, see {}",
                output.status,
                log.display()
            )));
        }

        debug!("make -sn for {}:{} produced {} bytes", cs, fname, stdout.len());

        extract_compiler_command(&stdout, fname).ok_or_else(|| {
            ExtractError::CompilerCommandNotFound {
                cs: cs.to_string(),
                file: fname.to_string(),
            }
        })
    }
}

/// Find the compiler flags of `fname` in the output of `make -sn`.
///
/// Kbuild writes the dependency file of `dir/name.c` to `dir/.name.o.d`, so
/// the invocation is anchored on `-Wp,-MD,dir/.name.o.d` (`-MMD` on some
/// trees) and runs up to the source file name.
pub fn extract_compiler_command(make_output: &str, fname: &str) -> Option<String> {
    let path = Path::new(fname);
    let stem = path.file_stem()?.to_string_lossy();
    let dep_file = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => format!("{}/.{}.o.d", dir.display(), stem),
        None => format!(".{}.o.d", stem),
    };

    ["-MD", "-MMD"].iter().find_map(|flag| {
        let pattern = format!(
            r"(?m)(-Wp,{},{}\s+-nostdinc\s+-isystem.*{})(?:;|$)",
            flag,
            regex::escape(&dep_file),
            regex::escape(fname)
        );
        Regex::new(&pattern)
            .ok()?
            .captures(make_output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}
