//! Immutable run configuration.
//!
//! Built once at startup from defaults, an optional TOML file and `LUR_*`
//! environment variables, validated, then shared by reference.

use crate::error::{ProcessingError, Result};
use crate::models::{result_field_name, VariableSpec, VariableType};
use crate::utils::constants::{
    COMPRESSION_SNAPPY, DEFAULT_BUFFER_DISTANCES, DEFAULT_HEARTBEAT_INACTIVITY_SECS,
    DEFAULT_HEARTBEAT_POLL_SECS, DEFAULT_PARTITION_SIZE, DEFAULT_RASTER_WORKERS,
    DEFAULT_ZONE_FIELD, MONITOR_ID_FIELD, ROW_ID_FIELD,
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use validator::Validate;

pub const ENV_PREFIX: &str = "LUR";
pub const DEFAULT_CONFIG_FILE: &str = "lur.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    pub input_folder: PathBuf,
    pub results_folder: PathBuf,

    /// CSV of `id,x,y` monitor locations, relative to the input folder
    #[validate(length(min = 1))]
    pub monitor_file: String,

    /// CSV of `zone,x,y` zone seeds, relative to the input folder
    #[validate(length(min = 1))]
    pub zone_definitions: String,

    #[validate(length(min = 1))]
    pub zone_field: String,

    #[validate(length(min = 1))]
    pub buffer_distances: Vec<u32>,

    #[validate(range(min = 1))]
    pub partition_size: usize,

    #[validate(range(min = 1))]
    pub raster_workers: usize,

    #[serde(default)]
    #[validate(nested)]
    pub variables: Vec<VariableSpec>,

    /// Caps every retry loop; `None` retries until success or cancellation
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[validate(range(min = 1))]
    pub heartbeat_poll_secs: u64,

    #[validate(range(min = 1))]
    pub heartbeat_inactivity_secs: u64,

    pub export_parquet: bool,

    pub compression: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_folder: PathBuf::from("input"),
            results_folder: PathBuf::from("results"),
            monitor_file: "monitors.csv".to_string(),
            zone_definitions: "zoneDef.csv".to_string(),
            zone_field: DEFAULT_ZONE_FIELD.to_string(),
            buffer_distances: DEFAULT_BUFFER_DISTANCES.to_vec(),
            partition_size: DEFAULT_PARTITION_SIZE,
            raster_workers: DEFAULT_RASTER_WORKERS,
            variables: Vec::new(),
            max_attempts: None,
            heartbeat_poll_secs: DEFAULT_HEARTBEAT_POLL_SECS,
            heartbeat_inactivity_secs: DEFAULT_HEARTBEAT_INACTIVITY_SECS,
            export_parquet: true,
            compression: COMPRESSION_SNAPPY.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load defaults, then `path` (or `lur.toml` when present), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&PipelineConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("buffer_distances"),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus the cross-field rules derive cannot express.
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        if self.buffer_distances.contains(&0) {
            return Err(ProcessingError::Config(
                "buffer distances must be positive".to_string(),
            ));
        }

        if self.max_attempts == Some(0) {
            return Err(ProcessingError::Config(
                "max_attempts must be at least 1 when set".to_string(),
            ));
        }

        for spec in &self.variables {
            if spec.kind == VariableType::PointBuffer && spec.sum_field.is_none() {
                return Err(ProcessingError::Config(format!(
                    "point buffer variable '{}' needs a sum_field",
                    spec.path
                )));
            }
            if spec.code().is_empty() {
                return Err(ProcessingError::Config(format!(
                    "cannot derive a field code for variable '{}'",
                    spec.path
                )));
            }
        }

        let mut codes: Vec<String> = self.variables.iter().map(VariableSpec::code).collect();
        codes.sort();
        if let Some(pair) = codes.windows(2).find(|w| w[0] == w[1]) {
            return Err(ProcessingError::Config(format!(
                "variable code '{}' is used twice; set distinct `code` values",
                pair[0]
            )));
        }

        self.check_result_fields()?;

        let cores = num_cpus::get();
        if self.raster_workers > cores {
            warn!(
                "raster_workers ({}) exceeds available cores ({})",
                self.raster_workers, cores
            );
        }

        Ok(())
    }

    /// Every (variable, radius) pair must own a distinct result field that does
    /// not shadow a monitor table field: `N6` at 1500 m and `N61` at 500 m both
    /// name `N61500m`.
    fn check_result_fields(&self) -> Result<()> {
        let mut owners: BTreeMap<String, String> = [ROW_ID_FIELD, MONITOR_ID_FIELD, self.zone_field.as_str()]
            .into_iter()
            .map(|field| (field.to_string(), "the monitor table".to_string()))
            .collect();

        for spec in &self.variables {
            let code = spec.code();
            let radii: Vec<Option<u32>> = if spec.kind == VariableType::Point {
                vec![None]
            } else {
                self.buffer_distances.iter().copied().map(Some).collect()
            };

            for radius in radii {
                let field = result_field_name(&code, radius);
                let owner = match radius {
                    Some(r) => format!("variable '{}' at {} m", code, r),
                    None => format!("variable '{}'", code),
                };
                if let Some(existing) = owners.insert(field.clone(), owner.clone()) {
                    return Err(ProcessingError::Config(format!(
                        "result field '{}' of {} is also produced by {}; choose distinct codes",
                        field, owner, existing
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn monitor_path(&self) -> PathBuf {
        self.input_folder.join(&self.monitor_file)
    }

    pub fn zone_definitions_path(&self) -> PathBuf {
        self.input_folder.join(&self.zone_definitions)
    }

    pub fn heartbeat_poll(&self) -> Duration {
        Duration::from_secs(self.heartbeat_poll_secs)
    }

    pub fn heartbeat_inactivity(&self) -> Duration {
        Duration::from_secs(self.heartbeat_inactivity_secs)
    }

    /// Overrides applied by the CLI before the config is frozen.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        if max_attempts.is_some() {
            self.max_attempts = max_attempts;
        }
        self
    }

    pub fn with_parquet_export(mut self, export: bool) -> Self {
        self.export_parquet = export;
        self
    }
}
