// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::task::{Context, Poll};
use std::time::Duration;

use http::Request;
use tonic::body::BoxBody;
use tower::{Layer, Service};

use crate::middleware::BoxFuture;

/// Enforces a per-call deadline client-side, independent of whatever timeout the
/// server applies. On expiry the call is abandoned locally (the server may still
/// complete it) and a `DeadlineExceeded` status is surfaced to the caller, matching
/// the typed error taxonomy's `DeadlineExceeded` variant rather than a bare
/// `Cancelled`.
#[derive(Clone)]
pub struct DeadlineLayer {
    timeout: Duration,
}

impl DeadlineLayer {
    pub fn new(timeout: Duration) -> Self {
        DeadlineLayer { timeout }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService {
            inner,
            timeout: self.timeout,
        }
    }
}

#[derive(Clone)]
pub struct DeadlineService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<Request<BoxBody>> for DeadlineService<S>
where
    S: Service<Request<BoxBody>> + Send + 'static,
    S::Error: Into<tower::BoxError> + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = tower::BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<BoxBody>) -> Self::Future {
        let timeout = self.timeout;
        let call = self.inner.call(request);
        Box::pin(async move {
            match tokio::time::timeout(timeout, call).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(tonic::Status::deadline_exceeded(format!(
                    "client-side deadline of {timeout:?} exceeded"
                ))
                .into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;

    #[derive(Clone)]
    struct SlowService {
        delay: Duration,
    }

    impl Service<Request<BoxBody>> for SlowService {
        type Response = http::Response<BoxBody>;
        type Error = tonic::Status;
        type Future = Pin<
            Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>,
        >;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<BoxBody>) -> Self::Future {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(http::Response::new(tonic::body::empty_body()))
            })
        }
    }

    fn dummy_request() -> Request<BoxBody> {
        Request::new(tonic::body::empty_body())
    }

    #[tokio::test]
    async fn times_out_slow_calls() {
        let mut service = DeadlineService {
            inner: SlowService {
                delay: Duration::from_millis(50),
            },
            timeout: Duration::from_millis(5),
        };
        let err = service.call(dummy_request()).await.unwrap_err();
        assert!(err.to_string().contains("deadline"));
    }

    #[tokio::test]
    async fn lets_fast_calls_through() {
        let mut service = DeadlineService {
            inner: SlowService {
                delay: Duration::from_millis(1),
            },
            timeout: Duration::from_millis(50),
        };
        assert!(service.call(dummy_request()).await.is_ok());
    }
}
