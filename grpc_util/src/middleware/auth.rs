// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;
use std::task::{Context, Poll};

use http::Request;
use rc_errors::RcError;
use tonic::body::BoxBody;
use tower::{Layer, Service};

use crate::auth::AuthTokenManager;
use crate::middleware::BoxFuture;

pub const CLIENT_VERSION_HEADER: &str = "x-rc-client-version";
pub const TOKEN_ID_HEADER: &str = "token-id";
pub const TOKEN_SECRET_HEADER: &str = "token-secret";

/// `(token_id, token_secret)`, sent on every RPC except the token-fetch RPC itself
/// (spec §4.B). Sessions that authenticate purely via a task-scoped JWT refresh
/// (the command router) have no such pair and pass `None`.
pub type Credentials = Option<(Arc<str>, Arc<str>)>;

/// Injects `authorization: Bearer <jwt>` (refreshing through the wrapped
/// [`AuthTokenManager`] as needed) plus the client's `token-id`/`token-secret` and
/// version headers on every outbound request. Modeled on the teacher's
/// `tower::Service` wrapper shape (a thin struct around `inner: S`, `poll_ready`
/// delegated straight through, `call` returning a boxed future) rather than on its
/// auth logic, which validated tokens server-side.
pub struct AuthLayer<F> {
    manager: Arc<AuthTokenManager<F>>,
    client_version: &'static str,
    credentials: Credentials,
}

impl<F> AuthLayer<F> {
    pub fn new(manager: Arc<AuthTokenManager<F>>, client_version: &'static str, credentials: Credentials) -> Self {
        AuthLayer {
            manager,
            client_version,
            credentials,
        }
    }
}

// Written by hand rather than `#[derive(Clone)]`: the derive would add an
// `F: Clone` bound even though `F` only ever appears behind the `Arc`, which
// forbids the common case of a type-erased `Box<dyn Fn() -> Fut + Send + Sync>`
// fetch closure (needed when a caller wants to store sessions with
// differently-captured fetch closures behind one concrete type).
impl<F> Clone for AuthLayer<F> {
    fn clone(&self) -> Self {
        AuthLayer {
            manager: self.manager.clone(),
            client_version: self.client_version,
            credentials: self.credentials.clone(),
        }
    }
}

impl<S, F> Layer<S> for AuthLayer<F> {
    type Service = AuthService<S, F>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            manager: self.manager.clone(),
            client_version: self.client_version,
            credentials: self.credentials.clone(),
        }
    }
}

pub struct AuthService<S, F> {
    inner: S,
    manager: Arc<AuthTokenManager<F>>,
    client_version: &'static str,
    credentials: Credentials,
}

// See `AuthLayer`'s manual `Clone` impl: `F` only appears behind the `Arc`.
impl<S: Clone, F> Clone for AuthService<S, F> {
    fn clone(&self) -> Self {
        AuthService {
            inner: self.inner.clone(),
            manager: self.manager.clone(),
            client_version: self.client_version,
            credentials: self.credentials.clone(),
        }
    }
}

impl<S, F, Fut> Service<Request<BoxBody>> for AuthService<S, F>
where
    S: Service<Request<BoxBody>> + Clone + Send + 'static,
    S::Error: Into<tower::BoxError> + Send,
    S::Future: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, RcError>> + Send + 'static,
{
    type Response = S::Response;
    type Error = tower::BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: Request<BoxBody>) -> Self::Future {
        let manager = self.manager.clone();
        let client_version = self.client_version;
        let credentials = self.credentials.clone();
        // Per tower::Service::poll_ready/call contract, clone the ready inner
        // service and dispatch the old one, so a retry layer above us can issue
        // the next attempt without waiting on this one's readiness.
        let mut inner = self.inner.clone();
        Box::pin(async move {
            let token = manager
                .get_token()
                .await
                .map_err(|err| Box::new(err) as tower::BoxError)?;

            let headers = request.headers_mut();
            let auth_value = format!("Bearer {}", token.jwt)
                .parse()
                .map_err(|_| tower::BoxError::from("invalid auth header value"))?;
            headers.insert(http::header::AUTHORIZATION, auth_value);
            if let Ok(version_value) = client_version.parse() {
                headers.insert(CLIENT_VERSION_HEADER, version_value);
            }
            if let Some((token_id, token_secret)) = &credentials {
                if let Ok(value) = token_id.parse() {
                    headers.insert(TOKEN_ID_HEADER, value);
                }
                if let Ok(value) = token_secret.parse() {
                    headers.insert(TOKEN_SECRET_HEADER, value);
                }
            }

            inner.call(request).await.map_err(Into::into)
        })
    }
}
