//! Livepatch auxiliary files.
//!
//! After extraction the pipeline asks a [`TemplateRenderer`] for the files
//! that turn the generated sources into a buildable livepatch: the list of
//! patched functions, build files and the commit message. [`PlainTemplates`]
//! writes them from plain format strings.

use chrono::Datelike;
use std::fs;
use std::path::{Path, PathBuf};

use crate::codestream::{Codestream, VMLINUX};
use crate::config::{Layout, LivepatchConf};
use crate::extractor::backend::lp_out_file;
use crate::extractor::{ExtractError, ExtractResult};

/// Renders the non-source files of a livepatch.
pub trait TemplateRenderer: Send + Sync {
    /// Build file next to one extracted source, called by the worker.
    fn render_makefile(&self, cs: &str, codestream: &Codestream, fname: &str) -> ExtractResult<()>;

    /// Livepatch directory of a codestream: function list and sources.
    fn render_codestream(&self, cs: &str, codestream: &Codestream) -> ExtractResult<()>;

    /// `Kbuild.inc` of a codestream.
    fn render_kbuild(&self, cs: &str, codestream: &Codestream) -> ExtractResult<()>;

    /// `commit.msg` of the livepatch.
    fn render_commit_msg(&self) -> ExtractResult<()>;
}

/// Format-string based renderer.
#[derive(Debug, Clone)]
pub struct PlainTemplates {
    layout: Layout,
    conf: LivepatchConf,
    /// Backend whose output is rendered (`ccp` or `ce`)
    tool: String,
}

impl PlainTemplates {
    pub fn new(layout: Layout, conf: LivepatchConf, tool: impl Into<String>) -> Self {
        Self {
            layout,
            conf,
            tool: tool.into(),
        }
    }

    fn generated_source(&self, cs: &str, fname: &str) -> PathBuf {
        self.layout
            .work_dir(cs, fname, &self.tool)
            .join(lp_out_file(self.layout.bsc(), fname))
    }

    /// Names of the livepatch sources of a codestream, one per file.
    ///
    /// A single-file livepatch is named `livepatch_<bsc>.c`.
    pub fn lp_file_names(&self, codestream: &Codestream) -> Vec<(String, String)> {
        let bsc = self.layout.bsc();
        if codestream.files.len() == 1 {
            return codestream
                .files
                .keys()
                .map(|f| (f.to_string(), format!("livepatch_{}.c", bsc)))
                .collect();
        }
        codestream
            .files
            .keys()
            .map(|f| (f.to_string(), format!("{}_{}", bsc, basename(f))))
            .collect()
    }

    /// Lines of `patched_funcs.csv`.
    pub fn patched_funcs(&self, codestream: &Codestream) -> String {
        let mut out = String::new();
        for file in codestream.files.values() {
            let module = if file.module.is_empty() {
                self.conf.module_name()
            } else {
                file.module.replace('-', "_")
            };
            let conf = if file.conf.is_empty() {
                &self.conf.conf
            } else {
                &file.conf
            };
            let guard = if conf.is_empty() {
                String::new()
            } else {
                format!(" IS_ENABLED({})", conf)
            };

            for func in &file.symbols {
                out.push_str(&format!("{} {} klpp_{}{}\n", module, func, func, guard));
            }
        }
        out
    }

    /// Contents of `commit.msg`.
    pub fn commit_msg(&self, year: i32) -> String {
        let bsc = self.layout.bsc();
        let cve = if self.conf.cve.is_empty() {
            "CVE-XXXX-XXXX"
        } else {
            &self.conf.cve
        };

        let mut msg = format!("Fix for {} ({})\n\nLive patch for {}.", cve, bsc, cve);
        let commits = commit_lines(&self.conf.commits);
        if commits.is_empty() {
            msg.push('\n');
        } else {
            msg.push_str(" Upstream commits:\n");
            for line in commits {
                msg.push_str(&format!("  {}\n", line));
            }
        }
        if self.conf.module != VMLINUX {
            msg.push_str(&format!("\nPatched module: {}\n", self.conf.module_name()));
        }
        msg.push_str(&format!("\nCopyright (C) {} SUSE\n", year));
        msg
    }
}

impl TemplateRenderer for PlainTemplates {
    fn render_makefile(&self, cs: &str, codestream: &Codestream, fname: &str) -> ExtractResult<()> {
        let work_dir = self.layout.work_dir(cs, fname, &self.tool);
        let object = Path::new(&lp_out_file(self.layout.bsc(), fname)).with_extension("o");
        let contents = format!(
            "KDIR := {kdir}\n\
             MOD_DIR := $(shell pwd)\n\
             obj-m := {obj}\n\
             \n\
             ccflags-y += -Wno-unused-function\n\
             \n\
             modules:\n\
             \tmake -C $(KDIR) M=$(MOD_DIR) modules\n\
             \n\
             clean:\n\
             \tmake -C $(KDIR) M=$(MOD_DIR) clean\n",
            kdir = self.layout.odir(cs, &codestream.kernel).display(),
            obj = object.display(),
        );
        write_file(&work_dir.join("Makefile"), &contents)
    }

    fn render_codestream(&self, cs: &str, codestream: &Codestream) -> ExtractResult<()> {
        let lp_dir = self.layout.lp_dir(cs);
        fs::create_dir_all(&lp_dir)
            .map_err(|e| ExtractError::io(format!("creating {}", lp_dir.display()), e))?;

        write_file(&lp_dir.join("patched_funcs.csv"), &self.patched_funcs(codestream))?;

        for (fname, lp_name) in self.lp_file_names(codestream) {
            let src = self.generated_source(cs, &fname);
            let dest = lp_dir.join(lp_name);
            fs::copy(&src, &dest).map_err(|e| {
                ExtractError::io(
                    format!("copying {} to {}", src.display(), dest.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    fn render_kbuild(&self, cs: &str, codestream: &Codestream) -> ExtractResult<()> {
        let mut contents = format!("# {} ({})\n", cs, codestream.kernel);
        for (_, lp_name) in self.lp_file_names(codestream) {
            let obj = Path::new(&lp_name).with_extension("o");
            contents.push_str(&format!("livepatch-y += {}\n", obj.display()));
            contents.push_str(&format!("CFLAGS_{} += -Werror\n", obj.display()));
        }
        write_file(&self.layout.lp_dir(cs).join("Kbuild.inc"), &contents)
    }

    fn render_commit_msg(&self) -> ExtractResult<()> {
        let year = chrono::Local::now().year();
        write_file(&self.layout.bsc_path().join("commit.msg"), &self.commit_msg(year))
    }
}

fn basename(fname: &str) -> String {
    Path::new(fname)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| fname.to_string())
}

/// `branch: commit` lines from the `commits` entry of `conf.json`.
fn commit_lines(commits: &serde_json::Value) -> Vec<String> {
    match commits {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(branch, value)| match value {
                serde_json::Value::String(s) => format!("{}: {}", branch, s),
                other => format!("{}: {}", branch, other),
            })
            .collect(),
        serde_json::Value::Array(list) => list
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect(),
        serde_json::Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn write_file(path: &Path, contents: &str) -> ExtractResult<()> {
    fs::write(path, contents)
        .map_err(|e| ExtractError::io(format!("writing {}", path.display()), e))
}
