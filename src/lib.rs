// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust PLC sampler library
//!
//! This library polls a fixed data block from an industrial controller,
//! decodes it into a [`PlcRecord`], keeps the latest sample in a shared
//! cache, forwards it to InfluxDB and serves it over HTTP.

pub mod acquisition;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod sink;
pub mod utility;
pub mod visualization;

pub use acquisition::{DecodeError, PlcRecord, SampleCache};
