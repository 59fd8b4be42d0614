// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::Utc;
use log::{debug, error, info, warn};
use rocket::config::LogLevel;
use rocket::figment::Figment;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::acquisition::{Poller, PollerState, SampleCache};
use crate::config::{Config, VisualizationConfig};
use crate::sink::{InfluxDbSink, Sink};
use crate::utility::reachability::{
    is_influxdb_ready, is_reachable, wait_for_controller, wait_for_influxdb,
};
use crate::visualization::server::build_rocket;

/// Period of the heartbeat log line
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Seconds Rocket waits for in-flight requests, then for connections to close
const WEB_SHUTDOWN_GRACE_S: u32 = 2;
const WEB_SHUTDOWN_MINCE_S: u32 = 1;

/// Slack added to every task join timeout
const JOIN_MARGIN: Duration = Duration::from_secs(1);

struct DaemonTask {
    name: &'static str,
    handle: JoinHandle<Result<()>>,
    timeout: Duration,
}

/// Owner of the background tasks of the sampler.
///
/// A daemon is launched once, stopped once with [`Daemon::shutdown`] and
/// consumed by [`Daemon::join`].
pub struct Daemon {
    tasks: Vec<DaemonTask>,
    stop: watch::Sender<bool>,
    cache: SampleCache,
    poller_state: Option<watch::Receiver<PollerState>>,
    web_shutdown: Option<rocket::Shutdown>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Daemon {
            tasks: Vec::new(),
            stop,
            cache: SampleCache::new(),
            poller_state: None,
            web_shutdown: None,
        }
    }

    /// Handle on the sample cache fed by the poller
    pub fn cache(&self) -> SampleCache {
        self.cache.clone()
    }

    /// Current poller state, [`PollerState::Idle`] until the poller is started
    pub fn poller_state(&self) -> PollerState {
        self.poller_state
            .as_ref()
            .map_or(PollerState::Idle, |state| *state.borrow())
    }

    /// Whether [`Daemon::shutdown`] has not been called yet
    pub fn is_running(&self) -> bool {
        !*self.stop.borrow()
    }

    /// Launch all configured tasks.
    ///
    /// Startup order: InfluxDB health (if enabled), controller reachability,
    /// controller link, poller, read server (if enabled), heartbeat. Any
    /// failure up to the read server ignition is returned and nothing keeps
    /// running except the tasks already spawned, which [`Daemon::shutdown`]
    /// stops.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let sink: Option<Arc<dyn Sink>> = if config.influxdb.enabled {
            let sink = InfluxDbSink::new(&config.influxdb)
                .context("Failed to create the InfluxDB client")?;
            self.check_influxdb(config, sink.client()).await?;
            Some(Arc::new(sink))
        } else {
            debug!("InfluxDB sink disabled");
            None
        };

        self.check_controller(config).await?;

        let poller = Poller::open(config, self.cache.clone(), sink)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to PLC at {}:{}",
                    config.controller.address, config.controller.port
                )
            })?;
        self.start_poller(poller, poller_join_timeout(config));

        if config.visualization.enabled {
            self.start_read_server(&config.visualization).await?;
        }

        self.start_heartbeat();

        Ok(())
    }

    async fn check_influxdb(&self, config: &Config, client: &reqwest::Client) -> Result<()> {
        let health_url = config.influxdb.health_url();
        if config.startup.wait_for_endpoints {
            let mut stop = self.stop.subscribe();
            wait_for_influxdb(
                client,
                &health_url,
                config.controller.reconnect_delay(),
                &mut stop,
            )
            .await?;
        } else if is_influxdb_ready(client, &health_url).await {
            info!("InfluxDB is accessible and ready");
        } else {
            anyhow::bail!(
                "InfluxDB at {} is not accessible or not ready",
                health_url
            );
        }
        Ok(())
    }

    async fn check_controller(&self, config: &Config) -> Result<()> {
        let controller = &config.controller;
        let probe_timeout = config.startup.probe_timeout();
        if config.startup.wait_for_endpoints {
            let mut stop = self.stop.subscribe();
            wait_for_controller(
                &controller.address,
                controller.port,
                probe_timeout,
                controller.reconnect_delay(),
                &mut stop,
            )
            .await?;
        } else if is_reachable(&controller.address, controller.port, probe_timeout).await {
            info!("PLC is reachable");
        } else {
            anyhow::bail!(
                "PLC at {}:{} is not reachable",
                controller.address,
                controller.port
            );
        }
        Ok(())
    }

    /// Spawn `poller` on the runtime. Its task is joined within `join_timeout`.
    pub fn start_poller(&mut self, poller: Poller, join_timeout: Duration) {
        info!("Starting PLC poller");
        self.poller_state = Some(poller.state_receiver());

        let stop = self.stop.subscribe();
        let handle = tokio::spawn(async move {
            let stats = poller.run(stop).await;
            debug!("Poller task finished: {:?}", stats);
            Ok(())
        });

        self.tasks.push(DaemonTask {
            name: "poller",
            handle,
            timeout: join_timeout,
        });
    }

    /// Ignite and spawn the read server.
    pub async fn start_read_server(&mut self, config: &VisualizationConfig) -> Result<()> {
        info!(
            "Starting web server on {}:{}",
            config.address, config.port
        );

        let figment = read_server_figment(config)?;
        let ignited = build_rocket(figment, self.cache.clone())
            .ignite()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to ignite web server: {}", e))?;
        let shutdown = ignited.shutdown();

        let handle = tokio::spawn(async move {
            ignited
                .launch()
                .await
                .map_err(|e| anyhow::anyhow!("Web server failed: {}", e))?;
            Ok(())
        });

        // A stop requested before the server existed still applies to it
        if !self.is_running() {
            shutdown.clone().notify();
        }
        self.web_shutdown = Some(shutdown);
        self.tasks.push(DaemonTask {
            name: "web server",
            handle,
            timeout: Duration::from_secs(u64::from(WEB_SHUTDOWN_GRACE_S + WEB_SHUTDOWN_MINCE_S))
                + JOIN_MARGIN,
        });
        Ok(())
    }

    /// Start a heartbeat task that logs the age of the latest sample periodically
    fn start_heartbeat(&mut self) {
        debug!("Starting heartbeat monitor");

        let cache = self.cache.clone();
        let mut stop = self.stop.subscribe();
        let handle = tokio::spawn(async move {
            while !*stop.borrow_and_update() {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(HEARTBEAT_PERIOD) => {
                        match cache.read_sample() {
                            Some(sample) => debug!(
                                "Daemon heartbeat: latest sample is {} ms old",
                                (Utc::now() - sample.captured_at).num_milliseconds()
                            ),
                            None => debug!("Daemon heartbeat: no sample collected yet"),
                        }
                    }
                }
            }
            Ok(())
        });

        self.tasks.push(DaemonTask {
            name: "heartbeat",
            handle,
            timeout: JOIN_MARGIN,
        });
    }

    /// Request every task to stop.
    ///
    /// Returns `true` on the first call. Later calls only log and return
    /// `false`.
    pub fn shutdown(&self) -> bool {
        let first = self.stop.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if !first {
            info!("Shutdown already in progress");
            return false;
        }

        info!("Shutting down daemon tasks");
        if let Some(shutdown) = &self.web_shutdown {
            shutdown.clone().notify();
        }
        true
    }

    /// Wait for all tasks to complete
    ///
    /// Each task gets its own timeout. A task exceeding it is logged and
    /// aborted, a panicking or failing task is logged; neither stops the
    /// others from being joined.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            let abort = task.handle.abort_handle();
            match tokio::time::timeout(task.timeout, task.handle).await {
                Ok(Ok(Ok(()))) => debug!("Task {} finished", task.name),
                Ok(Ok(Err(e))) => error!("Task {} failed: {:#}", task.name, e),
                Ok(Err(e)) => error!("Task {} panicked: {}", task.name, e),
                Err(_) => {
                    warn!(
                        "Task {} did not complete within {:?}, aborting it",
                        task.name, task.timeout
                    );
                    abort.abort();
                }
            }
        }
        Ok(())
    }
}

/// Worst case for the poller to notice a stop: one full tick plus closing the link
fn poller_join_timeout(config: &Config) -> Duration {
    let sink = if config.influxdb.enabled {
        config.influxdb.timeout()
    } else {
        Duration::ZERO
    };
    config.acquisition.read_timeout()
        + sink
        + Duration::from_millis(config.controller.timeout_ms)
        + JOIN_MARGIN
}

/// Rocket figment for the read server.
///
/// Rocket's own Ctrl-C and signal handling is disabled, the daemon owns the
/// process signals and notifies the server itself.
fn read_server_figment(config: &VisualizationConfig) -> Result<Figment> {
    let mut figment = rocket::Config::figment()
        .merge(("ident", config.name.clone()))
        .merge(("address", config.address.clone()))
        .merge(("port", config.port))
        .merge(("log_level", LogLevel::Normal))
        .merge(("shutdown.ctrlc", false))
        .merge(("shutdown.signals", Vec::<String>::new()))
        .merge(("shutdown.grace", WEB_SHUTDOWN_GRACE_S))
        .merge(("shutdown.mince", WEB_SHUTDOWN_MINCE_S));

    if let (Some(cert), Some(key)) = (&config.cert, &config.key) {
        debug!("SSL certificates found in configuration, enabling TLS");

        let cert_data = BASE64_STANDARD
            .decode(cert)
            .context("SSL certificate is not valid base64")?;
        let key_data = BASE64_STANDARD
            .decode(key)
            .context("SSL key is not valid base64")?;

        figment = figment
            .merge(("tls.certs", cert_data))
            .merge(("tls.key", key_data));

        info!("TLS enabled for web server");
    }

    Ok(figment)
}
