// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Utility module
//!
//! Helpers shared by the daemon and the command line tools.
//!
//! ## Modules
//!
//! - [`reachability`]: startup probes for the controller and for InfluxDB

pub mod reachability;
