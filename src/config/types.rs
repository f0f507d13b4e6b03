//! Configuration type definitions and defaults

use serde::{Deserialize, Serialize};

/// User settings stored in `~/.config/klpgen/config.toml`.
///
/// Every section is optional; environment variables and command line flags
/// take priority over what is stored here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// Work and data directory locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding one `bsc<N>` directory per livepatch (`KLP_WORK_DIR`)
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Directory holding the extracted kernels per codestream (`KLP_DATA_DIR`)
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// klp-ccp binary (`KLP_CCP_PATH`)
    #[serde(default)]
    pub ccp_path: Option<String>,
    /// Directory with the klp-ccp policy scripts (`KLP_CCP_POL_PATH`)
    #[serde(default)]
    pub ccp_pol_path: Option<String>,
    /// clang-extract binary (`KLP_CE_PATH`)
    #[serde(default)]
    pub ce_path: Option<String>,
    /// Compiler handed to `make -sn` when preparing compiler commands
    #[serde(default = "default_compiler")]
    pub compiler: String,
}

pub fn default_compiler() -> String {
    "gcc".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ccp_path: None,
            ccp_pol_path: None,
            ce_path: None,
            compiler: default_compiler(),
        }
    }
}

/// Extraction pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Backend used when `--backend` is not given ("ccp" or "ce")
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Number of concurrent extraction tool invocations
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Architecture the extraction tool runs against
    #[serde(default = "default_reference_arch")]
    pub reference_arch: String,
}

pub fn default_backend() -> String {
    "ccp".to_string()
}

pub fn default_workers() -> usize {
    4
}

pub fn default_reference_arch() -> String {
    "x86_64".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            workers: default_workers(),
            reference_arch: default_reference_arch(),
        }
    }
}

impl ExtractionConfig {
    /// Validate extraction settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("extraction.workers must be at least 1".to_string());
        }
        if !matches!(self.backend.as_str(), "ccp" | "ce") {
            return Err(format!(
                "extraction.backend must be \"ccp\" or \"ce\", got \"{}\"",
                self.backend
            ));
        }
        if self.reference_arch.is_empty() {
            return Err("extraction.reference_arch must not be empty".to_string());
        }
        Ok(())
    }
}
