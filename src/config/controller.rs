// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Controller connection configuration
//!
//! This module defines the structures describing how the sampler reaches the
//! industrial controller it reads from.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wire protocol spoken by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerProtocol {
    /// Siemens S7 over ISO-on-TCP, usually on port 102
    #[default]
    S7,
    /// Modbus TCP holding registers, usually on port 502
    Modbus,
}

/// Configuration for the controller connection.
///
/// # Fields
///
/// * `protocol` - Wire protocol (default: `s7`)
/// * `address` - Controller host name or IP address (default: 192.168.33.100)
/// * `port` - Controller TCP port (default: 102)
/// * `rack` / `slot` - S7 CPU location, ignored for Modbus (default: 0 / 1)
/// * `timeout_ms` - Connect and per-exchange timeout (default: 500)
/// * `reconnect_delay_s` - Idle timeout of the connection and delay between
///   startup probes (default: 5). Zero keeps idle connections open, startup
///   probes are then retried every second
///
/// # Example
///
/// ```
/// use rust_plc_sampler::config::{ControllerConfig, ControllerProtocol};
///
/// let controller = ControllerConfig {
///     protocol: ControllerProtocol::Modbus,
///     port: 502,
///     ..ControllerConfig::default()
/// };
/// assert_eq!(controller.address, "192.168.33.100");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Wire protocol spoken by the controller.
    pub protocol: ControllerProtocol,

    /// Host name or IP address of the controller.
    pub address: String,

    /// TCP port of the controller.
    ///
    /// Valid range is 1-65535. Default value is 102, the ISO-on-TCP port.
    pub port: u16,

    /// Rack number of the S7 CPU.
    pub rack: u8,

    /// Slot number of the S7 CPU.
    pub slot: u8,

    /// Timeout in milliseconds for the TCP connect and for each request/response exchange.
    pub timeout_ms: u64,

    /// Delay in seconds between reachability probes while waiting for the
    /// controller, also used as the idle timeout of the connection.
    pub reconnect_delay_s: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            protocol: ControllerProtocol::S7,
            address: "192.168.33.100".to_string(),
            port: 102,
            rack: 0,
            slot: 1,
            timeout_ms: 500,
            reconnect_delay_s: 5,
        }
    }
}

impl ControllerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_s)
    }
}
