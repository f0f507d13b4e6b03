//! Configuration management for klpgen
//!
//! Two layers live here:
//! - [`Config`]: user settings from `~/.config/klpgen/config.toml`, overridden
//!   by `KLP_*` environment variables and command line flags
//! - [`Workspace`]: the state of one livepatch (`conf.json`,
//!   `codestreams.json`) plus the directory layout derived from it

mod livepatch;
mod types;

pub use livepatch::*;
pub use types::*;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the work directory
pub const ENV_WORK_DIR: &str = "KLP_WORK_DIR";
/// Environment variable overriding the data directory
pub const ENV_DATA_DIR: &str = "KLP_DATA_DIR";
/// Environment variable overriding the klp-ccp binary
pub const ENV_CCP_PATH: &str = "KLP_CCP_PATH";
/// Environment variable overriding the klp-ccp policy scripts directory
pub const ENV_CCP_POL_PATH: &str = "KLP_CCP_POL_PATH";
/// Environment variable overriding the clang-extract binary
pub const ENV_CE_PATH: &str = "KLP_CE_PATH";

/// Name of the directory below `~/.config` holding `config.toml`
const CONFIG_DIR_NAME: &str = "klpgen";

impl Config {
    /// `~/.config/klpgen/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// `~/.config/klpgen`
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join(CONFIG_DIR_NAME))
    }

    /// Load the user configuration; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load and validate `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        if let Err(e) = config.extraction.validate() {
            bail!("Invalid config {}: {}", path.display(), e);
        }
        Ok(config)
    }

    /// Write the configuration to `~/.config/klpgen/config.toml`.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Write the configuration to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Resolve the work directory: flag, then `KLP_WORK_DIR`, then config.
    pub fn work_dir(&self, flag: Option<&Path>) -> Result<PathBuf> {
        let dir = resolve_setting(flag, std::env::var(ENV_WORK_DIR).ok(), self.paths.work_dir.as_deref())
            .ok_or_else(|| anyhow::anyhow!("--work-dir or {} should be defined", ENV_WORK_DIR))?;
        if !dir.is_dir() {
            bail!("Work dir should be a directory: {}", dir.display());
        }
        Ok(dir)
    }

    /// Resolve the data directory: flag, then `KLP_DATA_DIR`, then config.
    ///
    /// Returns `None` when nothing is configured; `conf.json` may still carry it.
    pub fn data_dir(&self, flag: Option<&Path>) -> Option<PathBuf> {
        resolve_setting(flag, std::env::var(ENV_DATA_DIR).ok(), self.paths.data_dir.as_deref())
    }

    /// Resolve the klp-ccp binary, falling back to `~/kgr/ccp/build/klp-ccp`.
    pub fn ccp_path(&self) -> Result<PathBuf> {
        let path = resolve_setting(None, std::env::var(ENV_CCP_PATH).ok(), self.tools.ccp_path.as_deref())
            .or_else(|| dirs::home_dir().map(|h| h.join("kgr").join("ccp").join("build").join("klp-ccp")))
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        if !path.is_file() {
            bail!(
                "klp-ccp not found at {}. Please set {} to a valid klp-ccp binary",
                path.display(),
                ENV_CCP_PATH
            );
        }
        Ok(path)
    }

    /// Resolve the klp-ccp policy scripts, falling back to `~/kgr/scripts/ccp-pol`.
    pub fn ccp_pol_path(&self) -> Result<PathBuf> {
        let path = resolve_setting(
            None,
            std::env::var(ENV_CCP_POL_PATH).ok(),
            self.tools.ccp_pol_path.as_deref(),
        )
        .or_else(|| dirs::home_dir().map(|h| h.join("kgr").join("scripts").join("ccp-pol")))
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        if !path.is_dir() {
            bail!(
                "ccp-pol not found at {}. Please set {} to a valid ccp-pol directory",
                path.display(),
                ENV_CCP_POL_PATH
            );
        }
        Ok(path)
    }

    /// Resolve the clang-extract binary, falling back to `clang-extract` in PATH.
    pub fn ce_path(&self) -> PathBuf {
        resolve_setting(None, std::env::var(ENV_CE_PATH).ok(), self.tools.ce_path.as_deref())
            .unwrap_or_else(|| PathBuf::from("clang-extract"))
    }
}

/// Pick the first configured value: command line flag, environment, config file.
///
/// Empty environment values count as unset.
pub fn resolve_setting(
    flag: Option<&Path>,
    env_value: Option<String>,
    configured: Option<&str>,
) -> Option<PathBuf> {
    if let Some(flag) = flag {
        return Some(flag.to_path_buf());
    }
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(value));
    }
    configured
        .filter(|v| !v.is_empty())
        .map(expand_home)
}

/// Expand a leading `~/` to the home directory.
fn expand_home(dir: &str) -> PathBuf {
    if let Some(stripped) = dir.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(dir)
}
