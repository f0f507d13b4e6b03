//! Livepatch state and directory layout.
//!
//! A livepatch lives in `<work>/bsc<N>/` and is described by two JSON files:
//! `conf.json` (target module, config guard, supported architectures) and
//! `codestreams.json` (the codestream table). Paths into the extracted kernels
//! are derived from the data directory.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codestream::{CodestreamTable, VMLINUX};
use crate::extractor::{ExtractError, ExtractResult};

/// Contents of `conf.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivepatchConf {
    /// Module being patched (`vmlinux` for the core kernel)
    #[serde(default = "default_module", rename = "mod")]
    pub module: String,
    /// Config guard of the patched code, e.g. `CONFIG_TUN`
    #[serde(default)]
    pub conf: String,
    /// Architectures the livepatch supports
    #[serde(default = "default_lp_archs")]
    pub archs: Vec<String>,
    #[serde(default)]
    pub cve: String,
    /// Upstream commits per branch, kept as-is
    #[serde(default)]
    pub commits: serde_json::Value,
    /// Data directory recorded at setup time
    #[serde(default)]
    pub data: Option<String>,
}

fn default_module() -> String {
    VMLINUX.to_string()
}

fn default_lp_archs() -> Vec<String> {
    vec![
        "x86_64".to_string(),
        "ppc64le".to_string(),
        "s390x".to_string(),
    ]
}

impl Default for LivepatchConf {
    fn default() -> Self {
        Self {
            module: default_module(),
            conf: String::new(),
            archs: default_lp_archs(),
            cve: String::new(),
            commits: serde_json::Value::Null,
            data: None,
        }
    }
}

impl LivepatchConf {
    /// Module name as used by kallsyms and `LP_MODULE` (`snd-pcm` -> `snd_pcm`).
    pub fn module_name(&self) -> String {
        self.module.replace('-', "_")
    }
}

/// Directory layout of one livepatch and of the extracted kernels it uses.
#[derive(Debug, Clone)]
pub struct Layout {
    bsc: String,
    bsc_path: PathBuf,
    data: PathBuf,
    reference_arch: String,
}

impl Layout {
    /// `bsc` may be given as `1234` or `bsc1234`.
    pub fn new(work_dir: &Path, bsc: &str, data: &Path, reference_arch: &str) -> Self {
        let bsc = if bsc.starts_with("bsc") {
            bsc.to_string()
        } else {
            format!("bsc{}", bsc)
        };
        Self {
            bsc_path: work_dir.join(&bsc),
            bsc,
            data: data.to_path_buf(),
            reference_arch: reference_arch.to_string(),
        }
    }

    pub fn bsc(&self) -> &str {
        &self.bsc
    }

    pub fn bsc_path(&self) -> &Path {
        &self.bsc_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data
    }

    pub fn reference_arch(&self) -> &str {
        &self.reference_arch
    }

    pub fn conf_path(&self) -> PathBuf {
        self.bsc_path.join("conf.json")
    }

    pub fn codestreams_path(&self) -> PathBuf {
        self.bsc_path.join("codestreams.json")
    }

    /// `<bsc>/c/<cs>/<arch>`
    pub fn cs_dir(&self, cs: &str) -> PathBuf {
        self.bsc_path.join("c").join(cs).join(&self.reference_arch)
    }

    /// Output directory of one extraction tool for a codestream.
    pub fn tool_dir(&self, cs: &str, tool: &str) -> PathBuf {
        self.cs_dir(cs).join(tool)
    }

    /// Isolated working directory for one (codestream, file) pair.
    pub fn work_dir(&self, cs: &str, fname: &str, tool: &str) -> PathBuf {
        let base = Path::new(fname)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| fname.to_string());
        self.tool_dir(cs, tool).join(format!("work_{}", base))
    }

    /// Directory receiving the rendered livepatch of a codestream.
    pub fn lp_dir(&self, cs: &str) -> PathBuf {
        self.cs_dir(cs).join("lp")
    }

    pub fn patches_dir(&self) -> PathBuf {
        self.bsc_path.join("fixes")
    }

    pub fn groups_path(&self, tool: &str) -> PathBuf {
        self.bsc_path.join(tool).join("groups")
    }

    pub fn missing_syms_path(&self) -> PathBuf {
        self.bsc_path.join("missing_syms")
    }

    /// Kernel source tree of a codestream.
    pub fn sdir(&self, cs: &str, kernel: &str) -> PathBuf {
        self.data
            .join(cs)
            .join("usr")
            .join("src")
            .join(format!("linux-{}", kernel))
    }

    /// Kernel object tree of a codestream (reference architecture).
    pub fn odir(&self, cs: &str, kernel: &str) -> PathBuf {
        self.data
            .join(cs)
            .join("usr")
            .join("src")
            .join(format!("linux-{}-obj", kernel))
            .join(&self.reference_arch)
            .join("default")
    }

    pub fn symvers(&self, cs: &str, kernel: &str) -> PathBuf {
        self.odir(cs, kernel).join("Module.symvers")
    }

    pub fn arch_dir(&self, cs: &str, arch: &str) -> PathBuf {
        self.data.join(cs).join(arch)
    }

    pub fn vmlinux_path(&self, cs: &str, kernel: &str, arch: &str) -> PathBuf {
        self.arch_dir(cs, arch)
            .join("boot")
            .join(format!("vmlinux-{}-default", kernel))
    }

    pub fn modules_dir(&self, cs: &str, kernel: &str, arch: &str) -> PathBuf {
        self.arch_dir(cs, arch)
            .join("lib")
            .join("modules")
            .join(format!("{}-default", kernel))
    }

    pub fn ipa_clones_dir(&self, cs: &str, arch: &str) -> PathBuf {
        self.arch_dir(cs, arch).join("ipa-clones")
    }
}

/// Everything a run needs to know about one livepatch.
///
/// The codestream table is owned here for the whole run; workers only read
/// it, and their results are applied back once extraction is finished.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub layout: Layout,
    pub conf: LivepatchConf,
    pub codestreams: CodestreamTable,
}

impl Workspace {
    /// Open an existing livepatch directory.
    ///
    /// Fails with a configuration error when `conf.json` or
    /// `codestreams.json` is missing, or when no data directory is known.
    pub fn open(
        work_dir: &Path,
        bsc: &str,
        data_dir: Option<&Path>,
        reference_arch: &str,
    ) -> ExtractResult<Self> {
        // The data dir is only needed for paths, resolve it after conf.json
        let probe = Layout::new(work_dir, bsc, Path::new(""), reference_arch);
        if !probe.bsc_path().is_dir() {
            return Err(ExtractError::Config(format!(
                "{} does not exist. Run setup first",
                probe.bsc_path().display()
            )));
        }

        let conf: LivepatchConf = read_json(&probe.conf_path(), "conf.json")?;
        let codestreams: CodestreamTable = read_json(&probe.codestreams_path(), "codestreams.json")?;
        if codestreams.is_empty() {
            return Err(ExtractError::Config(
                "codestreams.json doesn't list any codestream".to_string(),
            ));
        }

        let data = data_dir
            .map(Path::to_path_buf)
            .or_else(|| conf.data.as_ref().map(PathBuf::from))
            .ok_or_else(|| {
                ExtractError::Config("--data-dir or KLP_DATA_DIR should be defined".to_string())
            })?;

        Ok(Self {
            layout: Layout::new(work_dir, bsc, &data, reference_arch),
            conf,
            codestreams,
        })
    }

    /// Write the codestream table back to `codestreams.json`.
    pub fn flush_codestreams(&self) -> ExtractResult<()> {
        let path = self.layout.codestreams_path();
        let json = serde_json::to_string_pretty(&self.codestreams).map_err(|source| {
            ExtractError::Json {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, json)
            .map_err(|e| ExtractError::io(format!("writing {}", path.display()), e))
    }

    /// Codestream ids matching the filter, in table order.
    pub fn select(&self, filter: Option<&Regex>) -> Vec<String> {
        self.codestreams
            .keys()
            .filter(|cs| filter.map_or(true, |re| re.is_match(cs)))
            .map(str::to_string)
            .collect()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, name: &str) -> ExtractResult<T> {
    if !path.is_file() {
        return Err(ExtractError::Config(format!("{} file not found", name)));
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| ExtractError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&contents).map_err(|source| ExtractError::Json {
        path: path.to_path_buf(),
        source,
    })
}
