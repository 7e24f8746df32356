use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::models::query_pair::DEFAULT_IGNORED_RULES;
use crate::models::IgnoreSet;
use crate::pairs::{BlockLayout, DEFAULT_MAX_PAIRS, ParseOptions};
use crate::sqlite::DEFAULT_STATEMENT_TIMEOUT;
use crate::verify::{DEFAULT_BATCH_SIZE, VerifyOptions, default_workers};
use crate::wrap::{DEFAULT_EXPECTED_TABLES, DEFAULT_ROOT_MARKER, WrapPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
}

pub fn resolve_runtime_paths(cwd: &Path, out_dir_override: Option<&Path>) -> Result<RuntimePaths> {
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let cwd = normalize_lexical(cwd);
    let out_dir = match out_dir_override {
        Some(path) => resolve_user_path(path, &cwd),
        None => cwd.clone(),
    };

    Ok(RuntimePaths {
        cwd,
        out_dir: normalize_lexical(&out_dir),
    })
}

#[must_use]
pub fn resolve_user_path(path: &Path, base: &Path) -> PathBuf {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    normalize_lexical(&resolved)
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
    #[default]
    Strict,
    Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LayoutName {
    #[default]
    Auto,
    Plain,
    Extended,
}

impl From<LayoutName> for BlockLayout {
    fn from(value: LayoutName) -> Self {
        match value {
            LayoutName::Auto => Self::Auto,
            LayoutName::Plain => Self::Plain,
            LayoutName::Extended => Self::Extended,
        }
    }
}

/// Settings for one `check` run. Every field has a default, so a config file
/// only lists what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    pub database: Option<PathBuf>,
    pub wrap_input: bool,
    pub policy: PolicyName,
    pub expected_tables: usize,
    pub root_marker: String,
    pub max_pairs: Option<usize>,
    pub workers: Option<usize>,
    pub sequential: bool,
    pub batch_size: usize,
    pub statement_timeout_ms: u64,
    pub ignore_rules: Vec<String>,
    pub layout: LayoutName,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            database: None,
            wrap_input: true,
            policy: PolicyName::Strict,
            expected_tables: DEFAULT_EXPECTED_TABLES,
            root_marker: DEFAULT_ROOT_MARKER.to_string(),
            max_pairs: Some(DEFAULT_MAX_PAIRS),
            workers: None,
            sequential: false,
            batch_size: DEFAULT_BATCH_SIZE,
            statement_timeout_ms: u64::try_from(DEFAULT_STATEMENT_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
            ignore_rules: DEFAULT_IGNORED_RULES
                .iter()
                .map(|rule| (*rule).to_string())
                .collect(),
            layout: LayoutName::Auto,
        }
    }
}

impl CheckConfig {
    /// Reads a JSON config file. A relative `database` is taken relative to the
    /// file's own directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        if let (Some(database), Some(parent)) = (config.database.as_ref(), path.parent()) {
            config.database = Some(resolve_user_path(database, parent));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.workers == Some(0) {
            bail!("workers must be at least 1");
        }
        if self.max_pairs == Some(0) {
            bail!("max_pairs must be at least 1");
        }
        if self.policy == PolicyName::Strict && self.root_marker.is_empty() {
            bail!("root_marker must not be empty for the strict policy");
        }
        Ok(())
    }

    #[must_use]
    pub fn ignore_set(&self) -> IgnoreSet {
        IgnoreSet::from_rules(self.ignore_rules.iter().cloned())
    }

    #[must_use]
    pub fn wrap_policy(&self) -> Option<WrapPolicy> {
        if !self.wrap_input {
            return None;
        }
        Some(match self.policy {
            PolicyName::Permissive => WrapPolicy::Permissive,
            PolicyName::Strict => WrapPolicy::Strict {
                expected_tables: self.expected_tables,
                marker: self.root_marker.clone(),
            },
        })
    }

    #[must_use]
    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_ms > 0).then(|| Duration::from_millis(self.statement_timeout_ms))
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.sequential {
            1
        } else {
            self.workers.unwrap_or_else(default_workers)
        }
    }

    #[must_use]
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            max_pairs: self.max_pairs,
            ignore: self.ignore_set(),
            layout: self.layout.into(),
        }
    }

    #[must_use]
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            wrap: self.wrap_policy(),
            workers: self.worker_count(),
            batch_size: self.batch_size,
            ignore: self.ignore_set(),
        }
    }
}

/// Accepts the yes/no spellings of the positional wrap flag.
pub fn parse_flag(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "t" => Ok(true),
        "n" | "no" | "false" | "f" => Ok(false),
        _ => Err(format!("invalid argument: {value}")),
    }
}
