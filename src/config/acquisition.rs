// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Data acquisition configuration
//!
//! This module defines the timing parameters of the polling loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the polling loop.
///
/// This structure controls how often the controller block is read and how
/// long a single read may take before the tick is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Time interval in milliseconds between two reads.
    ///
    /// The first read happens one interval after the poller starts.
    /// Must be greater than zero.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound in milliseconds for a single read, on top of the link's
    /// own per-exchange timeout. A read exceeding it skips the tick.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    900
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl AcquisitionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
