// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

pub mod options;
pub mod params;

use std::collections::HashMap;

use engine::GrpcChannel;
use protos::rc::v1::control_plane_client::ControlPlaneClient;
use protos::rc::v1::FunctionBindParamsRequest;
use rc_errors::RcError;

pub use options::{ClsOptions, Resources, RetryPolicy};
pub use params::{ParamValue, ParameterSchema};

/// A parameterized class handle: a function id plus the schema needed to bind
/// parameter values into a concrete, cacheable function id, and the options
/// overlay accumulated by `with_options`/`with_concurrency`/`with_batching`.
#[derive(Clone)]
pub struct Cls<C: GrpcChannel> {
    control_plane: ControlPlaneClient<C>,
    function_id: String,
    schema: Vec<ParameterSchema>,
    options: ClsOptions,
}

impl<C: GrpcChannel> Cls<C> {
    pub fn new(control_plane: ControlPlaneClient<C>, function_id: String, schema: Vec<ParameterSchema>) -> Self {
        Cls {
            control_plane,
            function_id,
            schema,
            options: ClsOptions::default(),
        }
    }

    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    /// Merge `overlay` into the current options and return a new `Cls`. Leaves
    /// `self` untouched, matching the immutable-builder semantics `withOptions`
    /// is specified to have.
    pub fn with_options(&self, overlay: ClsOptions) -> Self {
        Cls {
            control_plane: self.control_plane.clone(),
            function_id: self.function_id.clone(),
            schema: self.schema.clone(),
            options: self.options.merge(&overlay),
        }
    }

    pub fn with_concurrency(&self, concurrency_limit: u32) -> Self {
        self.with_options(ClsOptions {
            concurrency_limit: Some(concurrency_limit),
            ..Default::default()
        })
    }

    pub fn with_batching(&self, batch_max_size: u32, batch_wait_ms: u32) -> Self {
        self.with_options(ClsOptions {
            batch_max_size: Some(batch_max_size),
            batch_wait_ms: Some(batch_wait_ms),
            ..Default::default()
        })
    }

    /// Encode `values` against the declared schema, apply the accumulated
    /// options overlay, and bind both into a new concrete function id via
    /// `FunctionBindParams`.
    pub async fn instantiate(&mut self, values: HashMap<String, ParamValue>) -> Result<String, RcError> {
        let serialized_params = params::encode_parameters(&self.schema, values)?;
        let function_options = self.options.clone().into_wire()?;

        let response = self
            .control_plane
            .function_bind_params(FunctionBindParamsRequest {
                function_id: self.function_id.clone(),
                serialized_params: Some(serialized_params),
                function_options,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();

        Ok(response.bound_function_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protos::rc::v1::ParameterType;

    #[test]
    fn with_options_does_not_mutate_original() {
        let base = ClsOptions::default();
        let overlay = ClsOptions {
            concurrency_limit: Some(5),
            ..Default::default()
        };
        let merged = base.merge(&overlay);
        assert_eq!(base.concurrency_limit, None);
        assert_eq!(merged.concurrency_limit, Some(5));
    }

    #[test]
    fn schema_round_trip_types() {
        let schema = vec![ParameterSchema::required("name", ParameterType::String)];
        assert_eq!(schema[0].param_type, ParameterType::String);
    }
}
