// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Polling loop
//!
//! The [`Poller`] owns the controller link. Once per interval it reads the
//! data block, decodes it, publishes it in the [`SampleCache`] and, when a
//! sink is attached, forwards the very same record as a point.
//!
//! Errors never stop the loop: a failed or slow read, an undecodable
//! payload or a rejected point is logged and the loop waits for the next
//! tick. Only the stop token ends it.
//!
//! ```text
//! Idle ──open──> Connected ──run──> Ticking ──stop──> Stopping ──close──> Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use super::cache::SampleCache;
use super::record::{PlcRecord, RECORD_SIZE};
use crate::config::Config;
use crate::controller::{self, ControllerLink, LinkError};
use crate::sink::{PointLayout, Sink, SinkError};

/// Data block number (S7) or unit identifier (Modbus) holding the record
pub const DEVICE_INDEX: u16 = 1;

/// Offset of the record inside the device
pub const BYTE_OFFSET: u32 = 0;

/// Lifecycle of a [`Poller`], published on a watch channel.
///
/// A poller only exists once its link is open, so its channel starts at
/// `Connected`. `Idle` is what the daemon reports before the poller is
/// started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Not connected yet
    Idle,
    /// Link open, loop not started
    Connected,
    /// Loop running
    Ticking,
    /// Stop observed, closing the link
    Stopping,
    /// Link closed, terminal
    Stopped,
}

/// Counters returned by [`Poller::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks started
    pub ticks: u64,
    /// Records written into the cache
    pub samples: u64,
    /// Reads that failed or timed out
    pub read_failures: u64,
    /// Payloads too short to decode
    pub decode_failures: u64,
    /// Points the sink failed to store
    pub sink_failures: u64,
}

/// Timing and layout parameters of the loop.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Period between two ticks
    pub interval: Duration,
    /// Upper bound of one read
    pub read_timeout: Duration,
    /// Upper bound of one sink write
    pub sink_timeout: Duration,
    /// How a record is turned into a point
    pub layout: PointLayout,
}

impl PollerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.acquisition.interval(),
            read_timeout: config.acquisition.read_timeout(),
            sink_timeout: config.influxdb.timeout(),
            layout: PointLayout::from(&config.influxdb),
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Periodic reader of the controller data block.
pub struct Poller {
    link: Box<dyn ControllerLink>,
    cache: SampleCache,
    sink: Option<Arc<dyn Sink>>,
    settings: PollerSettings,
    state: watch::Sender<PollerState>,
    stats: TickStats,
}

impl Poller {
    /// Open the controller link described by `config` and build a poller on it.
    ///
    /// # Errors
    ///
    /// The [`LinkError`] raised while connecting. There is no retry here,
    /// reachability is the caller's concern.
    pub async fn open(
        config: &Config,
        cache: SampleCache,
        sink: Option<Arc<dyn Sink>>,
    ) -> Result<Self, LinkError> {
        debug!("Poller state: {:?}", PollerState::Idle);
        let link = controller::connect(&config.controller).await?;
        info!("Connected to PLC at {}", link.endpoint());

        Ok(Self::new(link, cache, sink, PollerSettings::from_config(config)))
    }

    /// Build a poller on an already opened link.
    pub fn new(
        link: Box<dyn ControllerLink>,
        cache: SampleCache,
        sink: Option<Arc<dyn Sink>>,
        settings: PollerSettings,
    ) -> Self {
        let (state, _) = watch::channel(PollerState::Connected);
        Self {
            link,
            cache,
            sink,
            settings,
            state,
            stats: TickStats::default(),
        }
    }

    /// Subscribe to state changes
    pub fn state_receiver(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    fn set_state(&self, state: PollerState) {
        debug!("Poller state: {:?}", state);
        self.state.send_replace(state);
    }

    /// Run the loop until `stop` turns `true` or its sender is dropped.
    ///
    /// The first tick happens one interval after the call. The stop token is
    /// checked between ticks, so an in-flight tick always completes. The link
    /// is closed exactly once before returning.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> TickStats {
        let period = self.settings.interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Polling {} every {:?} (device {}, offset {}, {} bytes)",
            self.link.endpoint(),
            period,
            DEVICE_INDEX,
            BYTE_OFFSET,
            RECORD_SIZE
        );
        self.set_state(PollerState::Ticking);

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        debug!("Stop channel closed, stopping poller");
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        self.set_state(PollerState::Stopping);
        if let Err(e) = self.link.close().await {
            warn!("Failed to close PLC connection: {}", e);
        }
        self.set_state(PollerState::Stopped);

        info!(
            "Poller stopped after {} ticks ({} samples, {} read failures, {} decode failures, {} sink failures)",
            self.stats.ticks,
            self.stats.samples,
            self.stats.read_failures,
            self.stats.decode_failures,
            self.stats.sink_failures
        );
        self.stats
    }

    async fn tick(&mut self) {
        self.stats.ticks += 1;

        let read = tokio::time::timeout(
            self.settings.read_timeout,
            self.link.read_block(DEVICE_INDEX, BYTE_OFFSET, RECORD_SIZE),
        )
        .await;
        let payload = match read {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!("Failed to read data from PLC: {}", e);
                self.stats.read_failures += 1;
                return;
            }
            Err(_) => {
                warn!(
                    "PLC read did not complete within {:?}, skipping tick",
                    self.settings.read_timeout
                );
                self.stats.read_failures += 1;
                return;
            }
        };

        let record = match PlcRecord::decode(&payload) {
            Ok(record) => record,
            Err(e) => {
                warn!("Discarding PLC payload: {}", e);
                self.stats.decode_failures += 1;
                return;
            }
        };

        self.cache.write(record);
        self.stats.samples += 1;
        info!(
            "PLC Data - Tag1: {}, Tag2: {}, Tag3: {}, Tag4: {}",
            record.tag1, record.tag2, record.tag3, record.tag4
        );

        if let Some(sink) = &self.sink {
            let point = self.settings.layout.point(&record, Utc::now());
            let result = match tokio::time::timeout(
                self.settings.sink_timeout,
                sink.write_point(&point),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(self.settings.sink_timeout)),
            };
            if let Err(e) = result {
                warn!("Failed to write data to InfluxDB: {}", e);
                self.stats.sink_failures += 1;
            }
        }
    }
}
