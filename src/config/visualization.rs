// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Read server configuration
//!
//! This module defines the structure for configuring the HTTP server that
//! serves the latest sample.

use serde::{Deserialize, Serialize};

/// Configuration for the read server.
///
/// ### TLS Configuration
///
/// For HTTPS, both `cert` and `key` must be provided as Base64-encoded PEM
/// files. If both are missing, the server operates in plain HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationConfig {
    /// Enable or disable the read server. Default is `false`.
    #[serde(default)]
    pub enabled: bool,

    /// The TCP port the server will listen on.
    ///
    /// Valid range is 1-65535. Default value is 8080.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The network address the server will bind to.
    ///
    /// Can be an IPv4/IPv6 address or a hostname. Default is "127.0.0.1".
    /// Use "0.0.0.0" to bind to all IPv4 interfaces.
    #[serde(default = "default_address")]
    pub address: String,

    /// The server name reported in the `Server` HTTP header.
    #[serde(default = "default_name")]
    pub name: String,

    /// SSL/TLS certificate in PEM format, Base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,

    /// SSL/TLS private key in PEM format, Base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

/// Default server name, `PlcSampler/` followed by the package version.
fn default_name() -> String {
    format!("PlcSampler/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_port(),
            address: default_address(),
            name: default_name(),
            cert: None,
            key: None,
        }
    }
}
