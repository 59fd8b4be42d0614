// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Data acquisition module
//!
//! This module reads the controller data block on a fixed cadence and keeps
//! the latest decoded sample available to the rest of the application.
//!
//! ## Key Components
//!
//! - [`PlcRecord`]: the decoded 7 byte block
//! - [`SampleCache`]: the shared "latest sample" slot
//! - [`Poller`]: the background loop reading, decoding, caching and forwarding

pub mod cache;
pub mod poller;
pub mod record;

pub use cache::{Sample, SampleCache};
pub use poller::{Poller, PollerSettings, PollerState, TickStats, BYTE_OFFSET, DEVICE_INDEX};
pub use record::{DecodeError, PlcRecord, RECORD_SIZE};
