// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use engine::GrpcChannel;
use grpc_util::auth::AuthTokenManager;
use grpc_util::backend::MAX_MESSAGE_SIZE;
use grpc_util::middleware::{AuthLayer, AuthService};
use protos::rc::v1::command_router_client::CommandRouterClient;
use protos::rc::v1::RefreshJwtRequest;
use rc_errors::RcError;
use tower::Layer;

const CLIENT_VERSION: &str = "rc-client/0.0.1";

type RefreshFuture = Pin<Box<dyn Future<Output = Result<String, RcError>> + Send>>;
type RefreshFn = Box<dyn Fn() -> RefreshFuture + Send + Sync>;

/// A session bound to one task's command router endpoint (discovered via
/// `ControlPlane.TaskGetCommandRouterAccess`), refreshing its own JWT
/// independently of the client's primary control-plane token.
///
/// The router URL is captured at construction and never expected to change.
/// `RefreshJwt` itself is issued on a plain, unauthenticated client (it is how
/// the session obtains its first/next token at all); every other RPC goes
/// through an `AuthLayer`-wrapped client that injects the current token.
pub struct CommandRouterSession<C: GrpcChannel> {
    pub(crate) client: CommandRouterClient<AuthService<C, RefreshFn>>,
    task_id: String,
}

impl<C: GrpcChannel> CommandRouterSession<C> {
    pub fn new(channel: C, task_id: String, router_url: String) -> Self {
        let refresh_client = CommandRouterClient::new(channel.clone())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        let refresh_task_id = task_id.clone();
        let expected_url = router_url;

        let fetch: RefreshFn = Box::new(move || {
            let mut client = refresh_client.clone();
            let task_id = refresh_task_id.clone();
            let expected_url = expected_url.clone();
            Box::pin(async move {
                let response = client
                    .refresh_jwt(RefreshJwtRequest { task_id })
                    .await
                    .map_err(|status| rc_errors::classify_status(&status))?
                    .into_inner();
                if response.command_router_url != expected_url {
                    return Err(RcError::RouterSessionInvalid(format!(
                        "command router URL changed from {expected_url} to {}",
                        response.command_router_url
                    )));
                }
                Ok(response.jwt)
            })
        });

        let tokens = Arc::new(AuthTokenManager::new(fetch));
        let auth_layer = AuthLayer::new(tokens, CLIENT_VERSION, None);
        let authed_channel = auth_layer.layer(channel);

        CommandRouterSession {
            client: CommandRouterClient::new(authed_channel)
                .max_decoding_message_size(MAX_MESSAGE_SIZE)
                .max_encoding_message_size(MAX_MESSAGE_SIZE),
            task_id,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}
