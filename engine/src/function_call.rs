// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::{Duration, Instant};

use execution_util::generate_idempotency_key;
use grpc_util::middleware::{retry_unary, set_retry_headers, RetryPolicy};
use protos::rc::v1::control_plane_client::ControlPlaneClient;
use protos::rc::v1::FunctionCallCancelRequest;
use rc_errors::RcError;
use tonic::Request;

use crate::encoding::{BlobStore, CborValue};
use crate::invocation::{self, GrpcChannel};

/// A handle to a call started by `Invoker::spawn`. Mirrors the control plane's
/// `FunctionCallId` plus the JWTs issued alongside it: `function_call_jwt` gates
/// `FunctionRetryInputs`, `input_jwt` identifies the single input within the call
/// for retry bookkeeping.
pub struct FunctionCall<C: GrpcChannel> {
    control_plane: ControlPlaneClient<C>,
    function_call_id: String,
    function_call_jwt: Option<String>,
    input_jwt: Option<String>,
}

impl<C: GrpcChannel> FunctionCall<C> {
    pub(crate) fn new(
        control_plane: ControlPlaneClient<C>,
        function_call_id: String,
        function_call_jwt: Option<String>,
        input_jwt: Option<String>,
    ) -> Self {
        FunctionCall {
            control_plane,
            function_call_id,
            function_call_jwt,
            input_jwt,
        }
    }

    pub fn function_call_id(&self) -> &str {
        &self.function_call_id
    }

    /// Block until the call completes, the given `timeout` elapses, or the server
    /// reports a terminal status.
    pub async fn get(
        &mut self,
        timeout: Option<Duration>,
        blob_store: Option<&dyn BlobStore>,
    ) -> Result<CborValue, RcError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        self.poll(deadline, blob_store).await
    }

    /// Same as `get`, but consumes `self` so `Invoker::invoke` can await a freshly
    /// spawned call without holding a separate borrow alive across the poll loop.
    pub(crate) async fn into_inner_get(
        mut self,
        deadline: Option<Instant>,
        blob_store: Option<&dyn BlobStore>,
    ) -> Result<CborValue, RcError> {
        self.poll(deadline, blob_store).await
    }

    async fn poll(
        &mut self,
        deadline: Option<Instant>,
        blob_store: Option<&dyn BlobStore>,
    ) -> Result<CborValue, RcError> {
        invocation::get_control_plane_result(
            &mut self.control_plane,
            self.function_call_id.clone(),
            self.function_call_jwt.clone(),
            self.input_jwt.clone(),
            deadline,
            blob_store,
        )
        .await
    }

    /// Cancel the call server-side. `terminate_containers` also kills any
    /// in-flight container execution rather than just dropping the pending input.
    pub async fn cancel(&mut self, terminate_containers: bool) -> Result<(), RcError> {
        let cancel_key = generate_idempotency_key();
        retry_unary(RetryPolicy::default(), &cancel_key, |key, attempt, elapsed| {
            let mut client = self.control_plane.clone();
            let mut request = Request::new(FunctionCallCancelRequest {
                function_call_id: self.function_call_id.clone(),
                terminate_containers,
            });
            set_retry_headers(&mut request, key, attempt, elapsed);
            async move { client.function_call_cancel(request).await }
        })
        .await
        .map_err(|status| rc_errors::classify_status(&status))?;
        Ok(())
    }
}
