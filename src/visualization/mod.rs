// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).
//!
//! Visualization module
//!
//! This module exposes the latest sample over HTTP. The server only ever
//! reads the [`SampleCache`](crate::acquisition::SampleCache); it is built
//! by [`server::build_rocket`] and launched by the daemon.

pub mod server;
