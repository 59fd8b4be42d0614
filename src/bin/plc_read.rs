// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use rust_plc_sampler::acquisition::{PlcRecord, BYTE_OFFSET, DEVICE_INDEX, RECORD_SIZE};
use rust_plc_sampler::config::{ControllerConfig, ControllerProtocol};
use rust_plc_sampler::controller;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Protocol {
    S7,
    Modbus,
}

/// One-shot PLC reader: reads the data block once and prints the decoded record
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// PLC address
    #[clap(long, default_value = "192.168.33.100")]
    address: String,

    /// PLC port (102 for S7, usually 502 for Modbus)
    #[clap(long, default_value = "102")]
    port: u16,

    /// Wire protocol
    #[clap(long, value_enum, default_value = "s7")]
    protocol: Protocol,

    /// S7 rack
    #[clap(long, default_value = "0")]
    rack: u8,

    /// S7 slot
    #[clap(long, default_value = "1")]
    slot: u8,

    /// Data block number (S7) or unit id (Modbus)
    #[clap(long, default_value_t = DEVICE_INDEX)]
    device: u16,

    /// First byte to read
    #[clap(long, default_value_t = BYTE_OFFSET)]
    offset: u32,

    /// Request timeout in milliseconds
    #[clap(long, default_value = "1000")]
    timeout_ms: u64,

    /// Print the record as JSON
    #[clap(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let config = ControllerConfig {
        protocol: match args.protocol {
            Protocol::S7 => ControllerProtocol::S7,
            Protocol::Modbus => ControllerProtocol::Modbus,
        },
        address: args.address.clone(),
        port: args.port,
        rack: args.rack,
        slot: args.slot,
        timeout_ms: args.timeout_ms,
        ..ControllerConfig::default()
    };

    println!("Connecting to PLC at {}:{}", config.address, config.port);
    let mut link = controller::connect(&config).await?;

    println!(
        "Reading {} bytes of device {} starting at byte {}",
        RECORD_SIZE, args.device, args.offset
    );
    let result = link.read_block(args.device, args.offset, RECORD_SIZE).await;
    if let Err(e) = link.close().await {
        log::warn!("Failed to close the connection: {}", e);
    }
    let payload = result.context("Read failed")?;

    println!("Raw bytes: {:02X?}", payload);

    let record = PlcRecord::decode(&payload)?;
    if args.json {
        println!("{}", serde_json::to_string(&record)?);
    } else {
        println!("Tag1 = {}", record.tag1);
        println!("Tag2 = {}", record.tag2);
        println!("Tag3 = {}", record.tag3);
        println!("Tag4 = {}", record.tag4);
    }

    Ok(())
}
