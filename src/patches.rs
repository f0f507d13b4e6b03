//! Applying the livepatch's kernel fixes to codestream source trees.
//!
//! Fixes live in `<bsc>/fixes`, either directly (one series for every
//! codestream) or in a per-codestream subdirectory. They are applied with
//! `quilt` before extraction and popped again afterwards.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::extractor::{ExtractError, ExtractResult};

/// Patch series applied to a codestream's source tree around extraction.
pub trait PatchSet: Send + Sync {
    fn apply(&self, cs: &str, sdir: &Path) -> ExtractResult<()>;
    fn remove(&self, cs: &str, sdir: &Path) -> ExtractResult<()>;
}

/// `quilt` based patch set, logging to `<fixes>/quilt.log`.
#[derive(Debug)]
pub struct QuiltPatches {
    dir: PathBuf,
    log: Mutex<File>,
}

impl QuiltPatches {
    /// Open the fixes directory and truncate its log.
    pub fn open(patches_dir: &Path) -> ExtractResult<Self> {
        if !patches_dir.is_dir() {
            return Err(ExtractError::Config(
                "--apply-patches specified without patches. Run get-patches!".to_string(),
            ));
        }

        let log_path = patches_dir.join("quilt.log");
        let log = File::create(&log_path)
            .map_err(|e| ExtractError::io(format!("creating {}", log_path.display()), e))?;

        Ok(Self {
            dir: patches_dir.to_path_buf(),
            log: Mutex::new(log),
        })
    }

    /// Series directory of a codestream.
    pub fn series_dir(&self, cs: &str) -> PathBuf {
        let per_cs = self.dir.join(cs);
        if per_cs.is_dir() {
            per_cs
        } else {
            self.dir.clone()
        }
    }

    fn quilt(&self, cs: &str, sdir: &Path, action: &str) -> ExtractResult<()> {
        let series = self.series_dir(cs);
        debug!("quilt {} -a in {} ({})", action, sdir.display(), series.display());

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(log, "# {}: quilt {} -a", cs, action)
            .map_err(|e| ExtractError::io("writing quilt.log", e))?;
        let stdout = log
            .try_clone()
            .map_err(|e| ExtractError::io("opening quilt.log", e))?;
        let stderr = log
            .try_clone()
            .map_err(|e| ExtractError::io("opening quilt.log", e))?;

        let status = Command::new("quilt")
            .args([action, "-a"])
            .current_dir(sdir)
            .env("QUILT_PATCHES", &series)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .map_err(|e| ExtractError::io(format!("running quilt {}", action), e))?;

        // 2: nothing to push or pop
        match status.code() {
            Some(0) | Some(2) => Ok(()),
            code => Err(ExtractError::ToolFailed {
                tool: "quilt".to_string(),
                cs: cs.to_string(),
                file: action.to_string(),
                code,
                log: self.dir.join("quilt.log"),
            }),
        }
    }
}

impl PatchSet for QuiltPatches {
    fn apply(&self, cs: &str, sdir: &Path) -> ExtractResult<()> {
        self.quilt(cs, sdir, "push")
    }

    fn remove(&self, cs: &str, sdir: &Path) -> ExtractResult<()> {
        self.quilt(cs, sdir, "pop")?;
        // quilt leaves its bookkeeping behind
        let pc = sdir.join(".pc");
        if pc.is_dir() {
            fs::remove_dir_all(&pc)
                .map_err(|e| ExtractError::io(format!("removing {}", pc.display()), e))?;
        }
        Ok(())
    }
}
