// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

pub mod encoding;
pub mod function_call;
pub mod invocation;

pub use encoding::{BlobStore, CborValue};
pub use function_call::FunctionCall;
pub use invocation::{GrpcChannel, Invoker, Plane};
