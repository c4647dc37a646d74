// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

mod filesystem;
pub mod image;
pub mod lifecycle;
pub mod logs;
pub mod options;
pub mod stdin;

pub use image::{ImageBuilder, PrebuiltImage};
pub use lifecycle::{ConnectToken, Sandbox};
pub use options::{NetworkPolicy, Port, SandboxOptions};
pub use stdin::SandboxStdin;
