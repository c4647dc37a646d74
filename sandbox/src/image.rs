// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use rc_errors::RcError;

/// Anything that can turn an image spec into a ready-to-run image id. Image
/// building is a separate service from the control plane `Sandbox*` RPCs;
/// `create` only needs to await the resulting id, not build the image itself.
#[async_trait::async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, spec: &str) -> Result<String, RcError>;
}

/// An `ImageBuilder` for callers who already hold a concrete image id and have
/// no build step to run.
pub struct PrebuiltImage;

#[async_trait::async_trait]
impl ImageBuilder for PrebuiltImage {
    async fn build(&self, spec: &str) -> Result<String, RcError> {
        Ok(spec.to_owned())
    }
}
