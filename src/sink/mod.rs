// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sample forwarding
//!
//! After each successful tick the poller turns the decoded record into a
//! [`Point`] and hands it to a [`Sink`]. The only sink shipped is
//! [`InfluxDbSink`], which writes InfluxDB v2 line protocol over HTTP.
//!
//! Line protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```

pub mod influxdb;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::acquisition::PlcRecord;
use crate::config::{FieldMapping, InfluxDbConfig};

pub use influxdb::InfluxDbSink;

/// Errors raised while forwarding a point
#[derive(Debug, Error)]
pub enum SinkError {
    /// Transport failure talking to the sink
    #[error("sink HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-success status
    #[error("sink rejected the point with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The write did not complete in time
    #[error("sink write timed out after {0:?}")]
    Timeout(Duration),

    /// A point needs at least one field
    #[error("point for measurement {0} has no field")]
    NoFields(String),
}

/// A value stored in a point field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    /// 64-bit signed integer, written with the `i` suffix
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}i", v),
        }
    }
}

/// One time-series point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    /// Tags, kept sorted by key
    pub tags: BTreeMap<String, String>,
    /// Fields, in insertion order
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: BTreeMap::new(),
            fields: Vec::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn field(mut self, key: &str, value: FieldValue) -> Self {
        self.fields.push((key.to_string(), value));
        self
    }

    /// Integer value of field `key`, if present
    pub fn integer_field(&self, key: &str) -> Option<i64> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, FieldValue::Integer(v))| *v)
    }

    /// Render the point as one line of InfluxDB line protocol.
    ///
    /// The timestamp is written in nanoseconds. A timestamp outside the
    /// nanosecond range of `i64` is omitted and the server assigns its own.
    ///
    /// # Errors
    ///
    /// [`SinkError::NoFields`] when the point has no field.
    pub fn to_line_protocol(&self) -> Result<String, SinkError> {
        if self.fields.is_empty() {
            return Err(SinkError::NoFields(self.measurement.clone()));
        }

        let mut line = escape_measurement(&self.measurement);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_string());
        }

        if let Some(nanos) = self.timestamp.timestamp_nanos_opt() {
            line.push(' ');
            line.push_str(&nanos.to_string());
        }
        Ok(line)
    }
}

/// Spaces and commas are escaped in measurement names
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Commas, equals signs and spaces are escaped in tag keys, tag values and field keys
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// How a [`PlcRecord`] is laid out as a [`Point`].
#[derive(Debug, Clone, PartialEq)]
pub struct PointLayout {
    pub measurement: String,
    pub host_tag: String,
    pub fields: Vec<FieldMapping>,
}

impl Default for PointLayout {
    fn default() -> Self {
        Self::from(&InfluxDbConfig::default())
    }
}

impl From<&InfluxDbConfig> for PointLayout {
    fn from(config: &InfluxDbConfig) -> Self {
        Self {
            measurement: config.measurement.clone(),
            host_tag: config.host_tag.clone(),
            fields: config.fields.clone(),
        }
    }
}

impl PointLayout {
    /// Build the point for `record`: one `host` tag and one integer field per mapping.
    pub fn point(&self, record: &PlcRecord, timestamp: DateTime<Utc>) -> Point {
        self.fields.iter().fold(
            Point::new(&self.measurement, timestamp).tag("host", &self.host_tag),
            |point, mapping| {
                point.field(&mapping.name, FieldValue::Integer(mapping.tag.value_of(record)))
            },
        )
    }
}

/// Destination of decoded samples.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    /// Write one point. Failures are reported, never retried.
    async fn write_point(&self, point: &Point) -> Result<(), SinkError>;
}
