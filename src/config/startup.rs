// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Startup probe configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the daemon checks its endpoints before starting the poller.
///
/// By default a single probe is made and an unreachable endpoint aborts the
/// startup. With `wait_for_endpoints` the probes are repeated every
/// `controller.reconnect_delay_s` seconds until they succeed or a shutdown
/// is requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Retry unreachable endpoints instead of failing.
    pub wait_for_endpoints: bool,

    /// Timeout in milliseconds of the TCP reachability probe.
    pub probe_timeout_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            wait_for_endpoints: false,
            probe_timeout_ms: 3000,
        }
    }
}

impl StartupConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
