// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Controller link module
//!
//! This module provides the connection to the industrial controller the
//! sampler reads from. The rest of the application only sees the
//! [`ControllerLink`] trait: "read `length` bytes of device `device_index`
//! starting at `byte_offset`".
//!
//! ## Key Components
//!
//! - [`S7Link`]: Siemens S7 client over ISO-on-TCP (port 102), reading data blocks
//! - [`ModbusLink`]: Modbus TCP client reading holding registers
//!
//! Both implementations reconnect lazily: when an exchange fails, or when the
//! connection has been idle for longer than the configured reconnect delay,
//! the socket is dropped and the next read opens a fresh one.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_plc_sampler::config::ControllerConfig;
//! use rust_plc_sampler::controller;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut link = controller::connect(&ControllerConfig::default()).await?;
//! let block = link.read_block(1, 0, 7).await?;
//! link.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod modbus;
pub mod s7;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ControllerConfig, ControllerProtocol};

pub use modbus::ModbusLink;
pub use s7::S7Link;

/// Errors raised by a controller link
#[derive(Debug, Error)]
pub enum LinkError {
    /// The TCP connection to the controller could not be opened
    #[error("failed to connect to controller at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Socket level failure during an exchange
    #[error("controller I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The controller did not answer in time
    #[error("controller {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Malformed, unexpected or unsupported frame
    #[error("controller protocol error: {0}")]
    Protocol(String),

    /// The controller answered but refused the request
    #[error("controller rejected the request (code 0x{code:02X}): {reason}")]
    Rejected { code: u8, reason: &'static str },

    /// Modbus transport failure or exception response
    #[error("modbus error: {0}")]
    Modbus(String),
}

/// Connection parameters shared by the link implementations
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Controller host name or IP address
    pub address: String,
    /// Controller TCP port
    pub port: u16,
    /// S7 rack number
    pub rack: u8,
    /// S7 slot number
    pub slot: u8,
    /// Bound for the TCP connect and for each request/response exchange
    pub timeout: Duration,
    /// A connection idle for longer than this is reopened before the next read.
    /// Zero keeps idle connections open.
    pub idle_timeout: Duration,
}

impl LinkSettings {
    /// `address:port` of the controller
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Whether a connection last used at `last_activity` has to be reopened
    pub fn idle_expired(&self, last_activity: Instant) -> bool {
        !self.idle_timeout.is_zero() && last_activity.elapsed() > self.idle_timeout
    }
}

impl From<&ControllerConfig> for LinkSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            address: config.address.clone(),
            port: config.port,
            rack: config.rack,
            slot: config.slot,
            timeout: Duration::from_millis(config.timeout_ms),
            idle_timeout: Duration::from_secs(config.reconnect_delay_s),
        }
    }
}

/// An open, stateful connection to the controller.
///
/// A link is not reentrant: every method takes `&mut self`, so at most one
/// request is in flight at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControllerLink: Send {
    /// Read `length` bytes of device `device_index` starting at `byte_offset`.
    ///
    /// For S7 controllers the device index is the data block number, for
    /// Modbus controllers it is the unit identifier.
    async fn read_block(
        &mut self,
        device_index: u16,
        byte_offset: u32,
        length: usize,
    ) -> Result<Vec<u8>, LinkError>;

    /// Close the connection. Further reads reopen it.
    async fn close(&mut self) -> Result<(), LinkError>;

    /// Human readable description of the remote endpoint
    fn endpoint(&self) -> String;
}

/// Open the link described by `config`.
///
/// # Errors
///
/// Returns [`LinkError::Connect`] when the controller cannot be reached, or
/// another [`LinkError`] when the protocol handshake fails.
pub async fn connect(config: &ControllerConfig) -> Result<Box<dyn ControllerLink>, LinkError> {
    let settings = LinkSettings::from(config);
    match config.protocol {
        ControllerProtocol::S7 => Ok(Box::new(S7Link::connect(settings).await?)),
        ControllerProtocol::Modbus => Ok(Box::new(ModbusLink::connect(settings).await?)),
    }
}

/// Await `future`, mapping an elapsed `timeout` to [`LinkError::Timeout`].
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> Result<T, LinkError>
where
    F: std::future::Future<Output = Result<T, LinkError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| LinkError::Timeout { operation, timeout })?
}
