//! Scan host configuration stored as TOML (default `scan.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::CoordinatorSettings;
use crate::core::batch::DEFAULT_ITERATIONS;
use crate::core::classifier::FatalPolicy;

/// Host configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values that work with the bundled probe command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    /// What to do when a test case hits an upstream/transport failure.
    pub fatal_policy: FatalPolicy,

    /// Iterations used by the CLI when `--iterations` is not given.
    pub default_iterations: u32,

    /// Directory for JSON batch reports. Reports are not written when unset.
    pub reports_dir: Option<PathBuf>,

    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Command run once per test case (e.g. `["python3","probe.py"]`).
    pub command: Vec<String>,

    /// Wall-clock budget for a single test case in seconds.
    pub timeout_secs: u64,

    /// Truncate captured probe stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "probe.py".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fatal_policy: FatalPolicy::AbortBatch,
            default_iterations: DEFAULT_ITERATIONS,
            reports_dir: None,
            probe: ProbeConfig::default(),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_iterations == 0 {
            return Err(anyhow!("default_iterations must be > 0"));
        }
        if self.probe.timeout_secs == 0 {
            return Err(anyhow!("probe.timeout_secs must be > 0"));
        }
        if self.probe.output_limit_bytes == 0 {
            return Err(anyhow!("probe.output_limit_bytes must be > 0"));
        }
        if self.probe.command.is_empty() || self.probe.command[0].trim().is_empty() {
            return Err(anyhow!("probe.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            fatal_policy: self.fatal_policy,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ScanConfig::default()`.
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    if !path.exists() {
        let cfg = ScanConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ScanConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Write the default config to `path`, leaving an existing file alone unless
/// `force` is set. Returns whether the file was written.
///
/// The file is staged next to `path` and renamed into place.
pub fn init_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        debug!(path = %path.display(), "config already present");
        return Ok(false);
    }
    let mut contents =
        toml::to_string_pretty(&ScanConfig::default()).context("serialize default config")?;
    contents.push('\n');

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    let staged = path.with_extension("toml.tmp");
    fs::write(&staged, contents).with_context(|| format!("stage {}", staged.display()))?;
    fs::rename(&staged, path).with_context(|| format!("install {}", path.display()))?;
    debug!(path = %path.display(), force, "default config written");
    Ok(true)
}
