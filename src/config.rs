//! Devirtualization settings: cost table, driver thresholds, and call addressing.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::LOG_TARGET;
use crate::mir::MethodLoadKind;

const CONFIG_BASENAMES: &[&str] = &["devirt.yaml", "devirt.yml"];

/// Relative costs the pass uses to score guards and savings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostTable {
    /// Materialising a type constant from another type's reference table.
    pub load_foreign_type: u64,
    /// The compare-and-branch of a devirtualization guard.
    pub devirt_check: u64,
    /// Materialising the compiled method's own type.
    pub load_self_type: u64,
    /// Saved by replacing an indirect dispatch with a direct call.
    pub baseline_invoke_savings: u64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            load_foreign_type: 4,
            devirt_check: 2,
            load_self_type: 1,
            baseline_invoke_savings: 5,
        }
    }
}

/// Limits the speculation driver applies before committing to a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverThresholds {
    /// Sites whose guard cost exceeds this are left alone.
    pub max_cost: u64,
    /// Sites whose profit is below this are left alone.
    pub min_profit: u64,
}

impl Default for DriverThresholds {
    fn default() -> Self {
        Self {
            max_cost: 16,
            min_profit: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevirtConfig {
    pub enabled: bool,
    /// Emit per-site decisions at `info` rather than `debug`.
    pub verbose: bool,
    pub costs: CostTable,
    pub driver: DriverThresholds,
    pub method_load_kind: MethodLoadKind,
}

impl Default for DevirtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verbose: false,
            costs: CostTable::default(),
            driver: DriverThresholds::default(),
            method_load_kind: MethodLoadKind::default(),
        }
    }
}

impl DevirtConfig {
    /// Parse a YAML document. Settings may sit at the top level or under a `devirt` key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed YAML or mistyped fields.
    pub fn from_yaml_str(contents: &str, origin: &str) -> Result<Self> {
        let yaml: serde_yaml::Value = serde_yaml::from_str(contents)
            .map_err(|err| Error::config(format!("failed to parse `{origin}`: {err}")))?;
        let key = serde_yaml::Value::String("devirt".into());
        let section = match yaml {
            serde_yaml::Value::Mapping(ref mapping) if mapping.contains_key(&key) => {
                mapping.get(&key).cloned().unwrap_or(serde_yaml::Value::Null)
            }
            serde_yaml::Value::Mapping(_) => yaml.clone(),
            serde_yaml::Value::Null => return Ok(Self::default()),
            _ => {
                return Err(Error::config(format!(
                    "`{origin}` must contain a mapping of devirtualization settings"
                )));
            }
        };
        if section.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(section).map_err(|err| {
            Error::config(format!(
                "failed to parse devirtualization settings in `{origin}`: {err}"
            ))
        })
    }

    /// Load settings from a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read and [`Error::Config`] when
    /// it cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents, &path.display().to_string())
    }

    /// Walk from `start_dir` towards the filesystem root and load the nearest
    /// `devirt.yaml`/`devirt.yml`. Falls back to defaults when none exists.
    ///
    /// # Errors
    ///
    /// Returns an error when a discovered file cannot be read or parsed.
    pub fn discover(start_dir: &Path) -> Result<Self> {
        match find_config_file(start_dir) {
            Some(path) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    stage = "config.load",
                    path = %path.display()
                );
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut cursor = Some(start_dir.to_path_buf());
    while let Some(dir) = cursor {
        for candidate in CONFIG_BASENAMES {
            let path = dir.join(candidate);
            if path.is_file() {
                return Some(path);
            }
        }
        cursor = dir.parent().map(Path::to_path_buf);
    }
    None
}
