// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Latest sample cache
//!
//! This module provides the single "latest sample" slot shared between the
//! poller (the only writer), the read endpoint and the heartbeat monitor.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::record::PlcRecord;

/// A decoded record together with the time it was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// The decoded data block
    pub record: PlcRecord,

    /// Wall-clock time at which the record was written into the cache
    pub captured_at: DateTime<Utc>,
}

/// A thread-safe holder of the most recent sample.
///
/// Cloning a `SampleCache` yields another handle to the same slot. Each write
/// replaces the whole [`Sample`] under the write lock, so a reader sees either
/// the previous sample or the new one, never a mix of both.
#[derive(Debug, Clone, Default)]
pub struct SampleCache {
    latest: Arc<RwLock<Option<Sample>>>,
}

impl SampleCache {
    /// Create a new, empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached sample with `record`, stamped with the current time.
    pub fn write(&self, record: PlcRecord) {
        let sample = Sample {
            record,
            captured_at: Utc::now(),
        };

        // The slot only ever holds a fully built value, so a poisoned lock is still consistent.
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *latest = Some(sample);
    }

    /// Get the latest record, if any has been written
    ///
    /// ### Returns
    ///
    /// * `Some(PlcRecord)` if a tick has succeeded at least once
    /// * `None` if no sample has been collected yet
    pub fn read(&self) -> Option<PlcRecord> {
        self.read_sample().map(|sample| sample.record)
    }

    /// Get the latest sample with its capture timestamp
    pub fn read_sample(&self) -> Option<Sample> {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a sample has ever been written
    pub fn has_value(&self) -> bool {
        self.read_sample().is_some()
    }
}
