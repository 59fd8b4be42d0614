// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Endpoint reachability probes
//!
//! These probes run once before the poller starts. They only answer "can we
//! talk to it right now"; the link itself handles failures afterwards.

use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Message returned by a healthy InfluxDB v2 `/health` endpoint
pub const INFLUXDB_READY_MESSAGE: &str = "ready for queries and writes";

/// Shortest pause between two probes of a wait loop
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Returned when a wait loop is interrupted by a shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shutdown requested while waiting for {0}")]
pub struct WaitAborted(pub &'static str);

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    message: Option<String>,
}

/// Whether a TCP connection to `address:port` can be opened within `timeout`
pub async fn is_reachable(address: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("{}:{} is not reachable: {}", address, port, e);
            false
        }
        Err(_) => {
            debug!("{}:{} did not answer within {:?}", address, port, timeout);
            false
        }
    }
}

/// Whether the InfluxDB health endpoint answers 200 with the "ready" message
pub async fn is_influxdb_ready(client: &reqwest::Client, health_url: &str) -> bool {
    let response = match client.get(health_url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("InfluxDB health request to {} failed: {}", health_url, e);
            return false;
        }
    };
    if response.status() != reqwest::StatusCode::OK {
        debug!(
            "InfluxDB health endpoint {} answered {}",
            health_url,
            response.status()
        );
        return false;
    }
    match response.json::<HealthResponse>().await {
        Ok(health) => health.message.as_deref() == Some(INFLUXDB_READY_MESSAGE),
        Err(e) => {
            debug!("InfluxDB health body is not valid JSON: {}", e);
            false
        }
    }
}

/// `delay` raised to [`MIN_RETRY_DELAY`]
fn retry_delay(delay: Duration) -> Duration {
    delay.max(MIN_RETRY_DELAY)
}

/// Sleep for `delay`, returning `false` early if a stop is requested meanwhile
async fn pause(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow_and_update() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(retry_delay(delay)) => true,
        changed = stop.changed() => changed.is_ok() && !*stop.borrow(),
    }
}

/// Probe the controller every `delay` until it accepts a TCP connection.
///
/// # Errors
///
/// [`WaitAborted`] when `stop` turns `true` or its sender is dropped.
pub async fn wait_for_controller(
    address: &str,
    port: u16,
    probe_timeout: Duration,
    delay: Duration,
    stop: &mut watch::Receiver<bool>,
) -> Result<(), WaitAborted> {
    loop {
        if is_reachable(address, port, probe_timeout).await {
            info!("PLC is reachable");
            return Ok(());
        }
        info!("Waiting for PLC at {}:{} to become reachable...", address, port);
        if !pause(delay, stop).await {
            return Err(WaitAborted("the PLC"));
        }
    }
}

/// Probe InfluxDB every `delay` until its health endpoint reports ready.
///
/// # Errors
///
/// [`WaitAborted`] when `stop` turns `true` or its sender is dropped.
pub async fn wait_for_influxdb(
    client: &reqwest::Client,
    health_url: &str,
    delay: Duration,
    stop: &mut watch::Receiver<bool>,
) -> Result<(), WaitAborted> {
    loop {
        if is_influxdb_ready(client, health_url).await {
            info!("InfluxDB is accessible and ready");
            return Ok(());
        }
        info!("Waiting for InfluxDB at {} to become accessible...", health_url);
        if !pause(delay, stop).await {
            return Err(WaitAborted("InfluxDB"));
        }
    }
}
