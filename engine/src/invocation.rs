// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::{Duration, Instant, SystemTime};

use execution_util::generate_idempotency_key;
use grpc_util::middleware::{retry_unary, set_retry_headers, RetryPolicy};
use protos::rc::v1::control_plane_client::ControlPlaneClient;
use protos::rc::v1::input_plane_client::InputPlaneClient;
use protos::rc::v1::{
    AttemptAwaitRequest, AttemptRetryRequest, AttemptStartRequest, DataFormat,
    FunctionCallCancelRequest, FunctionCallInvocationType, FunctionCallType,
    FunctionGetOutputsRequest, FunctionInput, FunctionMapRequest, FunctionRetryInputsRequest,
    GenericResult, GenericResultStatus,
};
use rc_errors::RcError;
use tonic::Request;

use crate::encoding::{self, BlobStore, CborValue};
use crate::function_call::FunctionCall;

/// Server-side poll cap: every `AttemptAwait`/`FunctionGetOutputs` call is bounded
/// by this even when the caller's own deadline is further out, so a single RPC
/// never blocks longer than the server is willing to hold it open.
pub const SERVER_POLL_CAP: Duration = Duration::from_secs(55);
/// How many times an `INTERNAL_FAILURE` result is retried before being surfaced to
/// the caller, rotating the attempt token / input JWT on each retry.
pub const MAX_INTERNAL_FAILURE_RETRIES: u32 = 8;

fn now_unix_secs() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Bound shared by every generated `rc.v1` client this crate talks to. Generic over
/// the underlying channel type so callers can plug in either a `ginepro`
/// load-balanced channel (control/input planes) or a plain `tonic::transport`
/// channel, the way the teacher's `proxy::server::Backend` held one typed client
/// per configured backend rather than hardcoding a channel type.
pub trait GrpcChannel:
    tonic::client::GrpcService<
        tonic::body::BoxBody,
        Error = Self::ChannelError,
        ResponseBody = Self::ChannelBody,
    > + Clone
    + Send
    + Sync
    + 'static
{
    type ChannelError: Into<Box<dyn std::error::Error + Send + Sync>>;
    type ChannelBody: http_body::Body<Data = bytes::Bytes> + Send + 'static;
}

impl<C, E, B> GrpcChannel for C
where
    C: tonic::client::GrpcService<tonic::body::BoxBody, Error = E, ResponseBody = B>
        + Clone
        + Send
        + Sync
        + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: http_body::Body<Data = bytes::Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    type ChannelError = E;
    type ChannelBody = B;
}

/// Which plane an outbound call is dispatched on. `invoke` prefers the input plane
/// when the function has one (lower latency, dedicated to single calls); `spawn`
/// always goes through the control plane since the input plane doesn't support
/// `FunctionMap`.
pub enum Plane<C: GrpcChannel> {
    Input(InputPlaneClient<C>),
    Control(ControlPlaneClient<C>),
}

fn remaining_poll_timeout(deadline: Option<Instant>) -> Result<Duration, RcError> {
    match deadline {
        None => Ok(SERVER_POLL_CAP),
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RcError::FunctionTimeout(
                    "caller deadline exceeded while awaiting result".to_owned(),
                ));
            }
            Ok(remaining.min(SERVER_POLL_CAP))
        }
    }
}

fn classify_generic_result(result: GenericResult) -> Result<CborValue, RcError> {
    match result.status() {
        GenericResultStatus::Success => {
            if result.data_blob_id.is_empty() {
                encoding::decode_result(&result.data, result.data_format())
            } else {
                Err(RcError::InternalFailure(
                    "blob-backed result requires a BlobStore to resolve data_blob_id".to_owned(),
                ))
            }
        }
        GenericResultStatus::Timeout => {
            Err(RcError::FunctionTimeout("function call timed out server-side".to_owned()))
        }
        GenericResultStatus::Failure => Err(RcError::RemoteError(format!(
            "{}: {}",
            result.exception, result.traceback
        ))),
        GenericResultStatus::InternalFailure | GenericResultStatus::Unspecified => {
            Err(RcError::InternalFailure(if result.exception.is_empty() {
                "internal failure with no detail".to_owned()
            } else {
                result.exception
            }))
        }
    }
}

/// Resolve a `GenericResult` that may carry its payload out-of-band in blob storage.
async fn load_result(result: GenericResult, blob_store: Option<&dyn BlobStore>) -> Result<CborValue, RcError> {
    if result.data_blob_id.is_empty() {
        return classify_generic_result(result);
    }
    let Some(blob_store) = blob_store else {
        return Err(RcError::InternalFailure(
            "result was blob-backed but no BlobStore was configured".to_owned(),
        ));
    };
    if result.status() != GenericResultStatus::Success {
        return classify_generic_result(result);
    }
    let data = blob_store.download(&result.data_blob_id).await?;
    encoding::decode_result(&data, result.data_format())
}

/// Build a `FunctionInput` from an already-CBOR-encoded payload, offloading to blob
/// storage first when the payload exceeds the inline size cap.
pub async fn build_function_input(
    payload: bytes::Bytes,
    blob_store: Option<&dyn BlobStore>,
) -> Result<FunctionInput, RcError> {
    if encoding::needs_blob_offload(&payload) {
        let blob_store = blob_store.ok_or_else(|| {
            RcError::InvalidArgument(
                "call arguments exceed the inline size limit but no BlobStore was configured".to_owned(),
            )
        })?;
        let blob_id = blob_store.upload(payload).await?;
        Ok(FunctionInput {
            args: bytes::Bytes::new(),
            args_blob_id: blob_id,
            data_format: DataFormat::Cbor as i32,
            kwargs_keys: Default::default(),
        })
    } else {
        Ok(FunctionInput {
            args: payload,
            args_blob_id: String::new(),
            data_format: DataFormat::Cbor as i32,
            kwargs_keys: Default::default(),
        })
    }
}

async fn await_input_plane_result<C: GrpcChannel>(
    client: &mut InputPlaneClient<C>,
    mut attempt_token: String,
    deadline: Option<Instant>,
    blob_store: Option<&dyn BlobStore>,
) -> Result<CborValue, RcError> {
    let mut internal_failures = 0u32;
    loop {
        let timeout = remaining_poll_timeout(deadline)?;
        let await_key = generate_idempotency_key();
        let response = retry_unary(RetryPolicy::default(), &await_key, |key, attempt, elapsed| {
            let mut client = client.clone();
            let mut request = Request::new(AttemptAwaitRequest {
                attempt_token: attempt_token.clone(),
                requested_at: now_unix_secs(),
                timeout_secs: timeout.as_secs() as u32,
            });
            set_retry_headers(&mut request, key, attempt, elapsed);
            async move { client.attempt_await(request).await }
        })
        .await
        .map_err(|status| rc_errors::classify_status(&status))?
        .into_inner();

        let Some(result) = response.result else {
            continue;
        };

        if result.status() == GenericResultStatus::InternalFailure
            && internal_failures < MAX_INTERNAL_FAILURE_RETRIES
        {
            internal_failures += 1;
            let retry_key = generate_idempotency_key();
            let retry = retry_unary(RetryPolicy::default(), &retry_key, |key, attempt, elapsed| {
                let mut client = client.clone();
                let mut request = Request::new(AttemptRetryRequest {
                    attempt_token: attempt_token.clone(),
                    retry_count: internal_failures,
                });
                set_retry_headers(&mut request, key, attempt, elapsed);
                async move { client.attempt_retry(request).await }
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
            attempt_token = retry.attempt_token;
            continue;
        }

        return load_result(result, blob_store).await;
    }
}

async fn await_control_plane_result<C: GrpcChannel>(
    client: &mut ControlPlaneClient<C>,
    function_call_id: String,
    function_call_jwt: Option<String>,
    mut input_jwt: Option<String>,
    deadline: Option<Instant>,
    blob_store: Option<&dyn BlobStore>,
) -> Result<CborValue, RcError> {
    let mut internal_failures = 0u32;
    let mut last_entry_id = String::new();
    loop {
        let timeout = remaining_poll_timeout(deadline)?;
        let outputs_key = generate_idempotency_key();
        let response = retry_unary(RetryPolicy::default(), &outputs_key, |key, attempt, elapsed| {
            let mut client = client.clone();
            let mut request = Request::new(FunctionGetOutputsRequest {
                function_call_id: function_call_id.clone(),
                max_values: 1,
                timeout_secs: timeout.as_secs() as u32,
                last_entry_id: last_entry_id.clone(),
                clear_on_success: true,
                requested_at: now_unix_secs(),
            });
            set_retry_headers(&mut request, key, attempt, elapsed);
            async move { client.function_get_outputs(request).await }
        })
        .await
        .map_err(|status| rc_errors::classify_status(&status))?
        .into_inner();

        last_entry_id = response.last_entry_id;
        let Some(item) = response.outputs.into_iter().next() else {
            continue;
        };
        let Some(result) = item.result else {
            continue;
        };

        if result.status() == GenericResultStatus::InternalFailure
            && internal_failures < MAX_INTERNAL_FAILURE_RETRIES
        {
            internal_failures += 1;
            let retry_key = generate_idempotency_key();
            let retry = retry_unary(RetryPolicy::default(), &retry_key, |key, attempt, elapsed| {
                let mut client = client.clone();
                let mut request = Request::new(FunctionRetryInputsRequest {
                    function_call_jwt: function_call_jwt.clone().unwrap_or_default(),
                    input_jwt: input_jwt.clone().unwrap_or_default(),
                    retry_count: internal_failures,
                });
                set_retry_headers(&mut request, key, attempt, elapsed);
                async move { client.function_retry_inputs(request).await }
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
            input_jwt = Some(retry.input_jwt);
            continue;
        }

        return load_result(result, blob_store).await;
    }
}

/// Dispatches `invoke`/`spawn` calls for one function, picking the input plane when
/// available and falling back to the control plane's `FunctionMap` otherwise.
pub struct Invoker<C: GrpcChannel> {
    pub function_id: String,
    pub plane: Plane<C>,
    /// Always held so `spawn` can issue `FunctionMap` even when `invoke` prefers
    /// the input plane.
    pub control_plane: ControlPlaneClient<C>,
}

impl<C: GrpcChannel> Invoker<C> {
    pub fn new(function_id: String, plane: Plane<C>, control_plane: ControlPlaneClient<C>) -> Self {
        Invoker {
            function_id,
            plane,
            control_plane,
        }
    }

    /// Block until the function call completes, or the deadline is reached.
    pub async fn invoke(
        &mut self,
        payload: bytes::Bytes,
        deadline: Option<Instant>,
        blob_store: Option<&dyn BlobStore>,
    ) -> Result<CborValue, RcError> {
        let input = build_function_input(payload, blob_store).await?;
        match &mut self.plane {
            Plane::Input(input_client) => {
                let start_key = generate_idempotency_key();
                let attempt_token = retry_unary(RetryPolicy::default(), &start_key, |key, attempt, elapsed| {
                    let mut client = input_client.clone();
                    let mut request = Request::new(AttemptStartRequest {
                        function_id: self.function_id.clone(),
                        input: Some(input.clone()),
                    });
                    set_retry_headers(&mut request, key, attempt, elapsed);
                    async move { client.attempt_start(request).await }
                })
                .await
                .map_err(|status| rc_errors::classify_status(&status))?
                .into_inner()
                .attempt_token;
                await_input_plane_result(input_client, attempt_token, deadline, blob_store).await
            }
            Plane::Control(_) => {
                let call = self.spawn(input, FunctionCallInvocationType::Sync).await?;
                call.into_inner_get(deadline, blob_store).await
            }
        }
    }

    /// Start a function call without waiting for it to complete.
    pub async fn spawn(
        &mut self,
        input: FunctionInput,
        invocation_type: FunctionCallInvocationType,
    ) -> Result<FunctionCall<C>, RcError> {
        let map_key = generate_idempotency_key();
        let response = retry_unary(RetryPolicy::default(), &map_key, |key, attempt, elapsed| {
            let mut client = self.control_plane.clone();
            let mut request = Request::new(FunctionMapRequest {
                function_id: self.function_id.clone(),
                function_call_type: FunctionCallType::Unary as i32,
                invocation_type: invocation_type as i32,
                inputs: vec![input.clone()],
            });
            set_retry_headers(&mut request, key, attempt, elapsed);
            async move { client.function_map(request).await }
        })
        .await
        .map_err(|status| rc_errors::classify_status(&status))?
        .into_inner();

        Ok(FunctionCall::new(
            self.control_plane.clone(),
            response.function_call_id,
            response.function_call_jwt,
            response.input_jwt,
        ))
    }

    /// Cancel an in-flight call started by `spawn`.
    pub async fn cancel(
        &mut self,
        function_call_id: &str,
        terminate_containers: bool,
    ) -> Result<(), RcError> {
        let cancel_key = generate_idempotency_key();
        retry_unary(RetryPolicy::default(), &cancel_key, |key, attempt, elapsed| {
            let mut client = self.control_plane.clone();
            let mut request = Request::new(FunctionCallCancelRequest {
                function_call_id: function_call_id.to_owned(),
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

pub(crate) async fn get_control_plane_result<C: GrpcChannel>(
    client: &mut ControlPlaneClient<C>,
    function_call_id: String,
    function_call_jwt: Option<String>,
    input_jwt: Option<String>,
    deadline: Option<Instant>,
    blob_store: Option<&dyn BlobStore>,
) -> Result<CborValue, RcError> {
    await_control_plane_result(
        client,
        function_call_id,
        function_call_jwt,
        input_jwt,
        deadline,
        blob_store,
    )
    .await
}
