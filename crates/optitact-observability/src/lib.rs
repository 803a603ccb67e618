// Copyright 2025 Optitact Contributors
// SPDX-License-Identifier: Apache-2.0

//! Observability infrastructure for Optitact (logging initialization).

mod init;

pub use init::{init_logging, LoggingGuard};
