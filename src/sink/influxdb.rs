// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! InfluxDB v2 HTTP sink

use async_trait::async_trait;
use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use super::{Point, Sink, SinkError};
use crate::config::InfluxDbConfig;

/// Writes points to the `/api/v2/write` endpoint of an InfluxDB v2 server.
///
/// Each point is sent in its own blocking request, there is no batching and
/// no retry.
#[derive(Debug, Clone)]
pub struct InfluxDbSink {
    client: reqwest::Client,
    write_url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxDbSink {
    /// Build the sink and its HTTP client, bounded by `config.timeout_ms`.
    pub fn new(config: &InfluxDbConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Build the sink on top of an existing HTTP client
    pub fn with_client(client: reqwest::Client, config: &InfluxDbConfig) -> Self {
        Self {
            client,
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        }
    }

    /// The underlying HTTP client, shared with the health probe
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Sink for InfluxDbSink {
    async fn write_point(&self, point: &Point) -> Result<(), SinkError> {
        let body = point.to_line_protocol()?;
        debug!("Writing point to {}: {}", self.write_url, body);

        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to read InfluxDB error body: {}", e);
                String::new()
            }
        };
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
