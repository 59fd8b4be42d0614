// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the PLC sampler
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against an embedded JSON schema before being deserialized.
//!
//! ## Configuration Structure
//!
//! - `controller`: How to reach the controller (protocol, address, timeouts)
//! - `acquisition`: Polling cadence and per-read bound
//! - `influxdb`: Optional time-series sink
//! - `visualization`: Optional HTTP read server
//! - `startup`: Reachability probes run before the poller starts
//!
//! Every section is optional; missing values take their defaults.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_plc_sampler::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("10.0.0.12".to_string()), // PLC address
//!     None,                          // PLC port
//!     Some(500),                     // Polling interval
//!     Some(true),                    // Enable the read server
//!     Some(8081),                    // Web port
//!     None,                          // Web address
//!     None,                          // Enable InfluxDB
//! );
//!
//! println!("Polling {} every {} ms", config.controller.address, config.acquisition.interval_ms);
//! ```

pub mod acquisition;
pub mod controller;
pub mod influxdb;
pub mod startup;
pub mod utils;
pub mod visualization;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use acquisition::AcquisitionConfig;
pub use controller::{ControllerConfig, ControllerProtocol};
pub use influxdb::{FieldMapping, InfluxDbConfig, RecordTag};
pub use startup::StartupConfig;
pub use utils::{is_valid_ip_address, output_config_schema, ConfigError};
pub use visualization::VisualizationConfig;

/// JSON schema every configuration file must satisfy
const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Root configuration structure of the sampler.
///
/// The configuration is deserialized from and serialized to YAML using
/// serde. Since JSON is a subset of YAML, a JSON file is accepted as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Controller connection settings.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Polling loop timing.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// InfluxDB sink. Disabled by default.
    #[serde(default)]
    pub influxdb: InfluxDbConfig,

    /// HTTP read server. Disabled by default.
    #[serde(default)]
    pub visualization: VisualizationConfig,

    /// Startup reachability probes.
    #[serde(default)]
    pub startup: StartupConfig,
}

impl Config {
    /// Write `<name>.sample.yaml` with the default values next to `path`
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// A missing file is created with the default values. A file failing
    /// schema validation, deserialization or [`utils::validate_specific_rules`]
    /// produces a sample file next to it and an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        // An empty document means "all defaults"
        let json_value = match serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })? {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            value => value,
        };

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)
            .context("Failed to build the configuration schema validator")?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_json::from_value(json_value) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only arguments that were provided override the loaded values.
    ///
    /// # Parameters
    ///
    /// * `plc_address` - Controller host name or IP address
    /// * `plc_port` - Controller TCP port
    /// * `interval_ms` - Polling interval in milliseconds
    /// * `web_enabled` - Enable or disable the read server
    /// * `web_port` - TCP port for the read server
    /// * `web_address` - Network address for the read server to bind to
    /// * `influxdb_enabled` - Enable or disable the InfluxDB sink
    #[allow(clippy::too_many_arguments)]
    pub fn apply_args(
        &mut self,
        plc_address: Option<String>,
        plc_port: Option<u16>,
        interval_ms: Option<u64>,
        web_enabled: Option<bool>,
        web_port: Option<u16>,
        web_address: Option<String>,
        influxdb_enabled: Option<bool>,
    ) {
        if let Some(address) = plc_address {
            debug!("Overriding PLC address from command line: {}", address);
            self.controller.address = address;
        }
        if let Some(port) = plc_port {
            debug!("Overriding PLC port from command line: {}", port);
            self.controller.port = port;
        }
        if let Some(interval) = interval_ms {
            debug!("Overriding polling interval from command line: {}", interval);
            self.acquisition.interval_ms = interval;
        }

        if let Some(enabled) = web_enabled {
            debug!("Overriding read server enabled from command line: {}", enabled);
            self.visualization.enabled = enabled;
        }
        if let Some(port) = web_port {
            debug!("Overriding port from command line: {}", port);
            self.visualization.port = port;
        }
        if let Some(address) = web_address {
            debug!("Overriding address from command line: {}", address);
            self.visualization.address = address;
        }

        if let Some(enabled) = influxdb_enabled {
            debug!("Overriding InfluxDB enabled from command line: {}", enabled);
            self.influxdb.enabled = enabled;
        }
    }
}
