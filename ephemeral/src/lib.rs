// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

pub mod heartbeat;

pub use heartbeat::{Heartbeat, HeartbeatTarget};
