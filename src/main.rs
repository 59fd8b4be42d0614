// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the PLC sampler daemon

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use rust_plc_sampler::config::{self, Config};
use rust_plc_sampler::daemon::Daemon;

/// Periodic PLC data block sampler with InfluxDB forwarding and an HTTP read endpoint
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (YAML), created with defaults if missing
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Validate a configuration file and exit
    #[arg(long, value_name = "PATH")]
    validate_config: Option<PathBuf>,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    show_config_schema: bool,

    /// PLC address, overrides controller.address
    #[arg(long)]
    plc_address: Option<String>,

    /// PLC port, overrides controller.port
    #[arg(long)]
    plc_port: Option<u16>,

    /// Polling interval in milliseconds, overrides acquisition.interval_ms
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Enable or disable the HTTP read server
    #[arg(long, value_name = "BOOL")]
    web: Option<bool>,

    /// Web server port
    #[arg(short = 'p', long)]
    web_port: Option<u16>,

    /// Web server address
    #[arg(short = 'w', long)]
    web_address: Option<String>,

    /// Enable or disable writing samples to InfluxDB
    #[arg(long, value_name = "BOOL")]
    influxdb: Option<bool>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable logging
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

/// Resolves on Ctrl-C, or on SIGTERM on Unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}

#[rocket::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let mut config = Config::from_file(&args.config)?;
    config.apply_args(
        args.plc_address.clone(),
        args.plc_port,
        args.interval_ms,
        args.web,
        args.web_port,
        args.web_address.clone(),
        args.influxdb,
    );
    config::utils::validate_specific_rules(&config)?;

    info!("Starting PLC sampler");
    let mut daemon = Daemon::new();

    let mut signal = Box::pin(shutdown_signal());
    let interrupted = tokio::select! {
        launched = daemon.launch(&config) => {
            if let Err(err) = launched {
                daemon.shutdown();
                daemon.join().await?;
                return Err(err);
            }
            false
        }
        result = &mut signal => {
            result?;
            info!("Received shutdown signal during startup");
            true
        }
    };

    if !interrupted {
        signal.await?;
        info!("Received shutdown signal, terminating daemon");
    }
    daemon.shutdown();

    // A second signal while tasks wind down is only logged
    let join = daemon.join();
    tokio::pin!(join);
    loop {
        tokio::select! {
            result = &mut join => return result,
            signal = shutdown_signal() => {
                signal?;
                info!("Shutdown already in progress, waiting for tasks to finish");
            }
        }
    }
}
