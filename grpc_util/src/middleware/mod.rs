// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

pub mod auth;
pub mod deadline;
pub mod retry;
pub mod telemetry;

pub use auth::{AuthLayer, AuthService};
pub use deadline::{DeadlineLayer, DeadlineService};
pub use retry::{retry_unary, RetryPolicy};
pub use telemetry::{NoopTelemetry, TelemetryBody, TelemetryHook, TelemetryLayer, TelemetryService};

use std::future::Future;
use std::pin::Pin;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
