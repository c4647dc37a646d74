// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

mod blob;
pub mod client;
pub mod config;
pub mod function;

pub use client::{Client, PrimaryChannel};
pub use config::{Config, ConfigOverrides};
pub use ephemeral::{Heartbeat, HeartbeatTarget};
pub use function::Function;
