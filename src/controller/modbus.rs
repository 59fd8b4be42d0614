// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP controller link
//!
//! For controllers exposing their data block as holding registers. The byte
//! window is mapped onto registers two bytes at a time, high byte first, so
//! byte offset 0 is the high byte of register 0 and byte offset 3 the low
//! byte of register 1. The device index selects the Modbus unit identifier.

use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use log::debug;
use tokio_modbus::prelude::*;

use super::{with_timeout, ControllerLink, LinkError, LinkSettings};

/// Modbus limit on registers per read holding registers request
const MAX_REGISTERS_PER_READ: usize = 125;

/// A Modbus TCP client reading holding registers.
pub struct ModbusLink {
    settings: LinkSettings,
    socket_addr: SocketAddr,
    context: Option<tokio_modbus::client::Context>,
    last_activity: Instant,
}

impl ModbusLink {
    /// Resolve the controller address and open the TCP connection.
    ///
    /// # Errors
    ///
    /// [`LinkError::Connect`] if the address cannot be resolved or the
    /// connection cannot be opened in time.
    pub async fn connect(settings: LinkSettings) -> Result<Self, LinkError> {
        let endpoint = settings.endpoint();
        let socket_addr = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|source| LinkError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| LinkError::Connect {
                endpoint: endpoint.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "address resolved to nothing",
                ),
            })?;

        let mut link = Self {
            settings,
            socket_addr,
            context: None,
            last_activity: Instant::now(),
        };
        link.context = Some(link.establish().await?);
        Ok(link)
    }

    async fn establish(&mut self) -> Result<tokio_modbus::client::Context, LinkError> {
        debug!("Opening Modbus connection to {}", self.socket_addr);
        let endpoint = self.settings.endpoint();
        let context = match tokio::time::timeout(
            self.settings.timeout,
            tcp::connect_slave(self.socket_addr, Slave(1)),
        )
        .await
        {
            Ok(Ok(context)) => context,
            Ok(Err(source)) => return Err(LinkError::Connect { endpoint, source }),
            Err(_) => {
                return Err(LinkError::Connect {
                    endpoint,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", self.settings.timeout),
                    ),
                })
            }
        };
        self.last_activity = Instant::now();
        Ok(context)
    }
}

/// Registers covering `length` bytes from `byte_offset`: (first register, count, bytes to skip)
fn register_window(byte_offset: u32, length: usize) -> Result<(u16, u16, usize), LinkError> {
    let skip = (byte_offset % 2) as usize;
    let count = (skip + length).div_ceil(2);
    if length == 0 || count > MAX_REGISTERS_PER_READ {
        return Err(LinkError::Protocol(format!(
            "cannot read {} bytes in one Modbus request",
            length
        )));
    }
    let first = u16::try_from(byte_offset / 2).map_err(|_| {
        LinkError::Protocol(format!("byte offset {} out of register range", byte_offset))
    })?;
    if usize::from(first) + count > usize::from(u16::MAX) + 1 {
        return Err(LinkError::Protocol(format!(
            "byte window {}+{} out of register range",
            byte_offset, length
        )));
    }
    Ok((first, count as u16, skip))
}

fn registers_to_bytes(registers: &[u16], skip: usize, length: usize) -> Result<Vec<u8>, LinkError> {
    let bytes: Vec<u8> = registers.iter().flat_map(|word| word.to_be_bytes()).collect();
    bytes
        .get(skip..skip + length)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            LinkError::Protocol(format!(
                "controller returned {} registers, {} bytes requested",
                registers.len(),
                length
            ))
        })
}

#[async_trait]
impl ControllerLink for ModbusLink {
    async fn read_block(
        &mut self,
        device_index: u16,
        byte_offset: u32,
        length: usize,
    ) -> Result<Vec<u8>, LinkError> {
        let unit = u8::try_from(device_index).map_err(|_| {
            LinkError::Protocol(format!("Modbus unit id {} out of range", device_index))
        })?;
        let (first, count, skip) = register_window(byte_offset, length)?;

        if self.context.is_some() && self.settings.idle_expired(self.last_activity) {
            debug!(
                "Modbus connection to {} idle for more than {:?}, reconnecting",
                self.socket_addr, self.settings.idle_timeout
            );
            self.context = None;
        }

        let mut context = match self.context.take() {
            Some(context) => context,
            None => self.establish().await?,
        };
        context.set_slave(Slave(unit));

        let response = with_timeout("read", self.settings.timeout, async {
            context
                .read_holding_registers(first, count)
                .await
                .map_err(|e| LinkError::Modbus(e.to_string()))
        })
        .await?;

        // An exception response leaves the connection usable
        self.context = Some(context);
        self.last_activity = Instant::now();

        let registers = response.map_err(|exception| {
            LinkError::Modbus(format!("exception response {:?}", exception))
        })?;
        registers_to_bytes(&registers, skip, length)
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        if let Some(mut context) = self.context.take() {
            debug!("Closing Modbus connection to {}", self.socket_addr);
            context
                .disconnect()
                .await
                .map_err(|e| LinkError::Modbus(e.to_string()))?;
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("modbus://{}", self.settings.endpoint())
    }
}
