// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use http::Request;
use http_body::Body;
use pin_project::pin_project;
use tonic::body::BoxBody;
use tower::{Layer, Service};

use crate::middleware::BoxFuture;

/// Optional hook a caller can supply to observe outbound RPCs, generalizing the
/// teacher's `GrpcMetrics`/`HttpMetrics` services (which always recorded to the
/// process-global `metrics` recorder) into an injectable trait: a library has no
/// business installing a global recorder on its embedder's behalf.
pub trait TelemetryHook: Send + Sync {
    fn on_call(&self, method: &str, elapsed: Duration, status_code: tonic::Code);
}

/// The default when no hook is supplied.
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {
    fn on_call(&self, _method: &str, _elapsed: Duration, _status_code: tonic::Code) {}
}

/// Calls the configured [`TelemetryHook`] once per RPC with the method name, wall
/// time, and the gRPC status the server actually reported. That status lives in
/// the HTTP/2 trailers, not in the `Result` `tower` sees here: a call that fails at
/// the gRPC level still completes its `http::Response` successfully, so this waits
/// for the response body's trailers rather than trusting the outer `Result`.
pub struct TelemetryLayer {
    hook: Arc<dyn TelemetryHook>,
}

impl TelemetryLayer {
    pub fn new(hook: Arc<dyn TelemetryHook>) -> Self {
        TelemetryLayer { hook }
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            hook: self.hook.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TelemetryService<S> {
    inner: S,
    hook: Arc<dyn TelemetryHook>,
}

impl<S, B> Service<Request<BoxBody>> for TelemetryService<S>
where
    S: Service<Request<BoxBody>, Response = http::Response<B>> + Send + 'static,
    S::Error: Into<tower::BoxError> + Send,
    S::Future: Send + 'static,
    B: Body + Send + 'static,
{
    type Response = http::Response<TelemetryBody<B>>;
    type Error = tower::BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<BoxBody>) -> Self::Future {
        let method = request.uri().path().to_owned();
        let hook = self.hook.clone();
        let start = Instant::now();
        let call = self.inner.call(request);
        Box::pin(async move {
            let response = call.await.map_err(Into::into)?;
            let (parts, body) = response.into_parts();
            let body = TelemetryBody {
                inner: body,
                hook,
                method,
                start,
                reported: false,
            };
            Ok(http::Response::from_parts(parts, body))
        })
    }
}

/// Response body wrapper that fires the telemetry hook exactly once, when
/// trailers (and thus the real gRPC status) arrive.
#[pin_project]
pub struct TelemetryBody<B> {
    #[pin]
    inner: B,
    hook: Arc<dyn TelemetryHook>,
    method: String,
    start: Instant,
    reported: bool,
}

impl<B: Body> Body for TelemetryBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_data(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.project().inner.poll_data(cx)
    }

    fn poll_trailers(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<Option<http::HeaderMap>, Self::Error>> {
        let this = self.project();
        let result = ready!(this.inner.poll_trailers(cx));
        if !*this.reported {
            *this.reported = true;
            let code = match &result {
                Ok(Some(trailers)) => tonic::Status::from_header_map(trailers)
                    .map(|status| status.code())
                    .unwrap_or(tonic::Code::Ok),
                Ok(None) => tonic::Code::Ok,
                Err(_) => tonic::Code::Unknown,
            };
            this.hook.on_call(this.method, this.start.elapsed(), code);
        }
        Poll::Ready(result)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }
}
