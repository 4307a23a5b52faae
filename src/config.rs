//! YAML configuration for imports.
//!
//! Every field is optional in the file; missing fields take their defaults.
//! Command-line flags are applied on top with [`ImportConfig::merge_cli`].
//!
//! ```yaml
//! source_dialect: postgres
//! target_dialect: google_sql
//! workers: 4
//! batch:
//!   write_limit: 500
//!   retry_limit: 20
//! ```

use crate::context::{ConvertOptions, SYNTHETIC_KEY_NAME};
use crate::dialect::SqlDialect;
use crate::error::ImportError;
use crate::target::TargetDialect;
use crate::writer::BatchConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Source dialect; auto-detected when absent
    pub source_dialect: Option<String>,
    pub target_dialect: TargetDialect,
    /// Worker threads for per-table data files
    pub workers: usize,
    pub batch: BatchConfig,
    pub bad_row_sample_limit: usize,
    pub unexpected_limit: usize,
    /// Name of the synthesized primary key column
    pub synthetic_key: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source_dialect: None,
            target_dialect: TargetDialect::default(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            batch: BatchConfig::default(),
            bad_row_sample_limit: 100,
            unexpected_limit: 100,
            synthetic_key: SYNTHETIC_KEY_NAME.to_string(),
        }
    }
}

/// Flag values that override the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub source_dialect: Option<String>,
    pub target_dialect: Option<String>,
    pub workers: Option<usize>,
}

impl ImportConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: ImportConfig = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line flags on top of file values
    pub fn merge_cli(&mut self, cli: CliOverrides) -> Result<(), ImportError> {
        if cli.source_dialect.is_some() {
            self.source_dialect = cli.source_dialect;
        }
        if let Some(target) = cli.target_dialect {
            self.target_dialect = target.parse().map_err(ImportError::Config)?;
        }
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ImportError> {
        if self.workers == 0 {
            return Err(ImportError::Config("workers must be at least 1".into()));
        }
        if self.batch.write_limit == 0 || self.batch.bytes_limit == 0 {
            return Err(ImportError::Config(
                "batch limits must be greater than zero".into(),
            ));
        }
        if self.synthetic_key.trim().is_empty() {
            return Err(ImportError::Config("synthetic_key cannot be empty".into()));
        }
        self.source_dialect()?;
        Ok(())
    }

    /// The configured source dialect, if any
    pub fn source_dialect(&self) -> Result<Option<SqlDialect>, ImportError> {
        self.source_dialect
            .as_deref()
            .map(|d| {
                d.parse::<SqlDialect>()
                    .map_err(|_| ImportError::UnknownDialect(d.to_string()))
            })
            .transpose()
    }

    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            synthetic_key: self.synthetic_key.clone(),
            target_dialect: self.target_dialect,
            bad_row_sample_limit: self.bad_row_sample_limit,
            unexpected_limit: self.unexpected_limit,
        }
    }
}
