// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

pub mod exec;
pub mod filesystem;
pub mod mount;
pub mod session;
pub mod stdio;

pub use exec::{ExecHandle, ExecResult};
pub use filesystem::FilesystemOutput;
pub use session::CommandRouterSession;

#[cfg(test)]
mod tests;
