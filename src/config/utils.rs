// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use base64::Engine;
use log::{debug, warn};
use thiserror::Error;

use super::{Config, CONFIG_SCHEMA};

/// Semantic configuration errors not expressible in the JSON schema
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SSL certificate provided without a key")]
    CertWithoutKey,

    #[error("SSL key provided without a certificate")]
    KeyWithoutCert,

    #[error("Invalid {section} port number: {port}")]
    InvalidPort { section: &'static str, port: u16 },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("influxdb.{field} must not be empty when InfluxDB is enabled")]
    MissingInfluxSetting { field: &'static str },

    #[error("influxdb.fields contains an empty field name")]
    EmptyFieldName,
}

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_plc_sampler --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **SSL Configuration**: a certificate needs a key and vice versa, both valid base64
/// - **Port Range**: controller and read server ports are within 1-65535
/// - **Timing**: `interval_ms` and `read_timeout_ms` are non-zero. A read timeout
///   longer than the interval is accepted with a warning
/// - **InfluxDB**: when enabled, `url`, `org` and `bucket` are set and every
///   mapped field has a name
/// - **Addresses**: a non-IP address only produces a debug message, host names are allowed
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let visualization = &config.visualization;
    match (&visualization.cert, &visualization.key) {
        (Some(_), None) => return Err(ConfigError::CertWithoutKey.into()),
        (None, Some(_)) => return Err(ConfigError::KeyWithoutCert.into()),
        (Some(cert), Some(key)) => {
            base64::engine::general_purpose::STANDARD
                .decode(cert)
                .context("SSL certificate is not valid base64")?;
            base64::engine::general_purpose::STANDARD
                .decode(key)
                .context("SSL key is not valid base64")?;
        }
        (None, None) => {}
    }

    if visualization.port == 0 {
        return Err(ConfigError::InvalidPort {
            section: "visualization",
            port: visualization.port,
        }
        .into());
    }
    if config.controller.port == 0 {
        return Err(ConfigError::InvalidPort {
            section: "controller",
            port: config.controller.port,
        }
        .into());
    }

    if !is_valid_ip_address(&visualization.address) {
        debug!(
            "Potentially invalid address format: {}",
            visualization.address
        );
    }
    if !is_valid_ip_address(&config.controller.address) {
        debug!(
            "Controller address {} is not an IP address, it will be resolved",
            config.controller.address
        );
    }

    let acquisition = &config.acquisition;
    if acquisition.interval_ms == 0 {
        return Err(ConfigError::ZeroDuration {
            field: "acquisition.interval_ms",
        }
        .into());
    }
    if acquisition.read_timeout_ms == 0 {
        return Err(ConfigError::ZeroDuration {
            field: "acquisition.read_timeout_ms",
        }
        .into());
    }
    if acquisition.read_timeout_ms > acquisition.interval_ms {
        warn!(
            "acquisition.read_timeout_ms ({}) exceeds acquisition.interval_ms ({}), slow reads will delay ticks",
            acquisition.read_timeout_ms, acquisition.interval_ms
        );
    }

    let influxdb = &config.influxdb;
    if influxdb.enabled {
        for (field, value) in [
            ("url", &influxdb.url),
            ("org", &influxdb.org),
            ("bucket", &influxdb.bucket),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingInfluxSetting { field }.into());
            }
        }
        if influxdb.fields.iter().any(|mapping| mapping.name.trim().is_empty()) {
            return Err(ConfigError::EmptyFieldName.into());
        }
        if influxdb.timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "influxdb.timeout_ms",
            }
            .into());
        }
    }

    Ok(())
}
