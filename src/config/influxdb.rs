// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! InfluxDB sink configuration
//!
//! This module defines where decoded samples are pushed and how a
//! [`PlcRecord`] is laid out as an InfluxDB point.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::acquisition::PlcRecord;

/// A field of [`PlcRecord`] that can be mapped onto a point field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordTag {
    Tag1,
    Tag2,
    Tag3,
    Tag4,
}

impl RecordTag {
    /// Value of this tag in `record`, widened to a signed integer.
    pub fn value_of(self, record: &PlcRecord) -> i64 {
        match self {
            RecordTag::Tag1 => i64::from(record.tag1),
            RecordTag::Tag2 => i64::from(record.tag2),
            RecordTag::Tag3 => i64::from(record.tag3),
            RecordTag::Tag4 => i64::from(record.tag4),
        }
    }
}

/// Maps one record tag to one field name of the written point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Record tag providing the value
    pub tag: RecordTag,
    /// Field name in the point
    pub name: String,
}

impl FieldMapping {
    pub fn new(tag: RecordTag, name: &str) -> Self {
        Self {
            tag,
            name: name.to_string(),
        }
    }
}

/// Configuration for the InfluxDB v2 sink.
///
/// When `enabled` is false no point is ever written and the InfluxDB health
/// probe is skipped at startup.
///
/// # Example
///
/// ```
/// use rust_plc_sampler::config::InfluxDbConfig;
///
/// let influx = InfluxDbConfig {
///     enabled: true,
///     url: "http://192.168.107.100:8086".to_string(),
///     org: "DAFRA".to_string(),
///     bucket: "PLC_READ".to_string(),
///     ..InfluxDbConfig::default()
/// };
/// assert_eq!(influx.health_url(), "http://192.168.107.100:8086/health");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxDbConfig {
    /// Flag to enable or disable writing samples to InfluxDB.
    pub enabled: bool,

    /// Base URL of the InfluxDB server, e.g. `http://localhost:8086`.
    pub url: String,

    /// Health endpoint probed at startup. Defaults to `<url>/health`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,

    /// API token sent as `Authorization: Token <token>`.
    pub token: String,

    /// Organization owning the bucket.
    pub org: String,

    /// Destination bucket.
    pub bucket: String,

    /// Measurement name of every point.
    pub measurement: String,

    /// Value of the `host` tag of every point.
    pub host_tag: String,

    /// Record tags written as point fields, in order.
    pub fields: Vec<FieldMapping>,

    /// Timeout in milliseconds for one write request.
    pub timeout_ms: u64,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8086".to_string(),
            health_url: None,
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            measurement: "temperature".to_string(),
            host_tag: "plc".to_string(),
            fields: vec![
                FieldMapping::new(RecordTag::Tag1, "temperature1"),
                FieldMapping::new(RecordTag::Tag2, "temperature2"),
                FieldMapping::new(RecordTag::Tag3, "temperature3"),
            ],
            timeout_ms: 5000,
        }
    }
}

impl InfluxDbConfig {
    /// The configured health URL, or `<url>/health`
    pub fn health_url(&self) -> String {
        match &self.health_url {
            Some(url) => url.clone(),
            None => format!("{}/health", self.url.trim_end_matches('/')),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
