// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use cls::{Cls, ParameterSchema};
use engine::{BlobStore, FunctionCall, Invoker, Plane};
use grpc_util::auth::AuthTokenManager;
use grpc_util::backend::{construct_single_endpoint_channel, ChannelCache, MAX_MESSAGE_SIZE};
use grpc_util::middleware::{
    AuthLayer, AuthService, DeadlineLayer, DeadlineService, NoopTelemetry, TelemetryHook, TelemetryLayer,
    TelemetryService,
};
use protos::rc::v1::control_plane_client::ControlPlaneClient;
use protos::rc::v1::input_plane_client::InputPlaneClient;
use protos::rc::v1::{AuthTokenGetRequest, SandboxInfo};
use rc_errors::RcError;
use router::CommandRouterSession;
use sandbox::{ImageBuilder, Sandbox, SandboxOptions};
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tower::Layer;

use crate::blob::GrpcBlobStore;
use crate::config::{Config, ConfigOverrides};
use crate::function::Function;

const CLIENT_VERSION: &str = "rc-client/0.0.1";
/// Channel-wide backstop deadline, comfortably above
/// `engine::invocation::SERVER_POLL_CAP` (55s) so a long-poll `AttemptAwait`/
/// `FunctionGetOutputs` call never gets clipped by this floor before the server's
/// own poll timeout has a chance to return.
const CHANNEL_DEADLINE: Duration = Duration::from_secs(65);

type RefreshFuture = Pin<Box<dyn Future<Output = Result<String, RcError>> + Send>>;
type RefreshFn = Box<dyn Fn() -> RefreshFuture + Send + Sync>;

/// Every channel this client dials (other than the one-time token fetch) rides on
/// this type: a plain transport `Channel` wrapped, innermost first, in
/// [`AuthLayer`] (bearer token plus `token-id`/`token-secret` headers),
/// [`DeadlineLayer`] (a client-side backstop deadline), and [`TelemetryLayer`]
/// (the caller's optional hook, outermost per spec §4.B), so `ControlPlaneClient`/
/// `InputPlaneClient` never think about any of that.
pub type PrimaryChannel = TelemetryService<DeadlineService<AuthService<Channel, RefreshFn>>>;

fn build_primary_channel(auth_layer: &AuthLayer<RefreshFn>, telemetry: &Arc<dyn TelemetryHook>, raw_channel: Channel) -> PrimaryChannel {
    let authed = auth_layer.layer(raw_channel);
    let deadlined = DeadlineLayer::new(CHANNEL_DEADLINE).layer(authed);
    TelemetryLayer::new(telemetry.clone()).layer(deadlined)
}

/// The configured entry point into the platform: one control-plane channel,
/// a lazily-populated map from input-plane URL to channel, and a lazily
/// populated map from task id to command-router session (spec §3's `Client`
/// entity). Constructed once per process; there is no explicit shutdown
/// beyond dropping it, since `tonic` channels close their connections on
/// drop.
pub struct Client {
    config: Config,
    auth_layer: AuthLayer<RefreshFn>,
    telemetry: Arc<dyn TelemetryHook>,
    control_plane: ControlPlaneClient<PrimaryChannel>,
    input_planes: ChannelCache<PrimaryChannel>,
    router_sessions: Mutex<HashMap<String, Arc<CommandRouterSession<Channel>>>>,
    blob_store: GrpcBlobStore<PrimaryChannel>,
}

impl Client {
    /// Resolve configuration (defaults → profile file → env vars → `overrides`)
    /// and dial the control plane. This is the core's `initializeClient`
    /// (spec §6): callers that want bare overrides with no env/profile layer
    /// should still go through this, since a missing token is a configuration
    /// error either way.
    pub async fn initialize(overrides: ConfigOverrides) -> Result<Client, RcError> {
        let config = crate::config::load(overrides)?;
        Client::new(config).await
    }

    /// Same as `initialize`, but routes every RPC through `telemetry` (the
    /// optional, user-supplied outermost layer from spec §4.B).
    pub async fn initialize_with_telemetry(
        overrides: ConfigOverrides,
        telemetry: Arc<dyn TelemetryHook>,
    ) -> Result<Client, RcError> {
        let config = crate::config::load(overrides)?;
        Client::new_with_telemetry(config, telemetry).await
    }

    pub async fn new(config: Config) -> Result<Client, RcError> {
        Client::new_with_telemetry(config, Arc::new(NoopTelemetry)).await
    }

    /// Same as `new`, but routes every RPC through `telemetry`. The hook has to be
    /// chosen before the first channel is built: the `tower` middleware stack is
    /// part of each channel's static type, so it can't be spliced in afterwards.
    pub async fn new_with_telemetry(config: Config, telemetry: Arc<dyn TelemetryHook>) -> Result<Client, RcError> {
        if config.token_id.is_empty() || config.token_secret.is_empty() {
            return Err(RcError::Config(
                "token_id and token_secret are required: set RC_TOKEN_ID/RC_TOKEN_SECRET, \
                 a profile file, or pass them explicitly to Client::new"
                    .to_owned(),
            ));
        }

        let raw_channel = construct_single_endpoint_channel(&config.server_url)
            .await
            .map_err(RcError::Transport)?;

        let token_id = config.token_id.clone();
        let token_secret = config.token_secret.clone();
        let credentials = Some((Arc::from(token_id.clone()), Arc::from(token_secret.clone())));
        let unauthed_control_plane = ControlPlaneClient::new(raw_channel.clone())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        let fetch: RefreshFn = Box::new(move || {
            let mut client = unauthed_control_plane.clone();
            let token_id = token_id.clone();
            let token_secret = token_secret.clone();
            Box::pin(async move {
                let response = client
                    .auth_token_get(AuthTokenGetRequest { token_id, token_secret })
                    .await
                    .map_err(|status| rc_errors::classify_status(&status))?
                    .into_inner();
                Ok(response.token)
            })
        });

        let tokens = Arc::new(AuthTokenManager::new(fetch));
        let auth_layer = AuthLayer::new(tokens, CLIENT_VERSION, credentials);
        let channel = build_primary_channel(&auth_layer, &telemetry, raw_channel);
        let control_plane = ControlPlaneClient::new(channel)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        let blob_store = GrpcBlobStore::new(control_plane.clone());

        Ok(Client {
            config,
            auth_layer,
            telemetry,
            control_plane,
            input_planes: ChannelCache::new(),
            router_sessions: Mutex::new(HashMap::new()),
            blob_store,
        })
    }

    pub fn environment(&self) -> &str {
        &self.config.environment
    }

    pub fn init_tracing(&self) -> Result<(), String> {
        grpc_util::observability::init_tracing(&self.config.logging())
    }

    pub fn blob_store(&self) -> &dyn BlobStore {
        &self.blob_store
    }

    fn control_plane(&self) -> ControlPlaneClient<PrimaryChannel> {
        self.control_plane.clone()
    }

    /// Build an `Invoker` for `function`, preferring its input plane when the
    /// handle metadata advertises one. Fails fast if the function is a web
    /// endpoint (spec §4.D.1): those aren't invocable through this core.
    pub async fn invoker(&self, function: &Function) -> Result<Invoker<PrimaryChannel>, RcError> {
        if function.is_web_endpoint() {
            let web_url = function.handle_metadata.web_url.clone().unwrap_or_default();
            return Err(RcError::InvalidUse(web_url));
        }

        let plane = match function.handle_metadata.input_plane_url.clone() {
            Some(url) => {
                let channel = self.input_plane_channel(&url).await?;
                Plane::Input(
                    InputPlaneClient::new(channel)
                        .max_decoding_message_size(MAX_MESSAGE_SIZE)
                        .max_encoding_message_size(MAX_MESSAGE_SIZE),
                )
            }
            None => Plane::Control(self.control_plane()),
        };

        Ok(Invoker::new(function.function_id.clone(), plane, self.control_plane()))
    }

    /// Convenience over `invoker` + `invoke` for a single blocking call.
    pub async fn invoke(
        &self,
        function: &Function,
        payload: bytes::Bytes,
        deadline: Option<std::time::Instant>,
    ) -> Result<engine::CborValue, RcError> {
        let mut invoker = self.invoker(function).await?;
        invoker.invoke(payload, deadline, Some(self.blob_store())).await
    }

    pub async fn spawn(
        &self,
        function: &Function,
        payload: bytes::Bytes,
    ) -> Result<FunctionCall<PrimaryChannel>, RcError> {
        let mut invoker = self.invoker(function).await?;
        let input = engine::invocation::build_function_input(payload, Some(self.blob_store())).await?;
        invoker
            .spawn(input, protos::rc::v1::FunctionCallInvocationType::Async)
            .await
    }

    async fn input_plane_channel(&self, url: &str) -> Result<PrimaryChannel, RcError> {
        let auth_layer = self.auth_layer.clone();
        let telemetry = self.telemetry.clone();
        let url_owned = url.to_owned();
        self.input_planes
            .get_or_insert_with(url, move || async move {
                let raw = construct_single_endpoint_channel(&url_owned).await?;
                Ok::<_, String>(build_primary_channel(&auth_layer, &telemetry, raw))
            })
            .await
            .map_err(RcError::Transport)
    }

    /// Build a `Cls` handle for a parameterized class's service function.
    pub fn cls(&self, function_id: impl Into<String>, schema: Vec<ParameterSchema>) -> Cls<PrimaryChannel> {
        Cls::new(self.control_plane(), function_id.into(), schema)
    }

    pub async fn create_sandbox(
        &self,
        app_id: String,
        image_builder: &dyn ImageBuilder,
        image_spec: &str,
        options: SandboxOptions,
    ) -> Result<Sandbox<PrimaryChannel>, RcError> {
        Sandbox::create(self.control_plane(), app_id, image_builder, image_spec, options).await
    }

    pub async fn sandbox_from_id(&self, sandbox_id: String) -> Result<Sandbox<PrimaryChannel>, RcError> {
        Sandbox::from_id(self.control_plane(), sandbox_id).await
    }

    pub async fn sandbox_from_name(
        &self,
        app_name: String,
        name: String,
        environment_name: Option<String>,
    ) -> Result<Sandbox<PrimaryChannel>, RcError> {
        Sandbox::from_name(self.control_plane(), app_name, name, environment_name).await
    }

    pub async fn list_sandboxes(
        &self,
        app_id: Option<String>,
        before_timestamp: Option<f64>,
        tags: HashMap<String, String>,
    ) -> Result<Vec<SandboxInfo>, RcError> {
        let mut control_plane = self.control_plane();
        Sandbox::list(&mut control_plane, app_id, before_timestamp, tags).await
    }

    /// A command-router session is shared per task within one client (spec §5):
    /// concurrent exec/stdio calls on the same task reuse the same channel and
    /// JWT rather than each opening their own.
    pub async fn command_router_session(
        &self,
        sandbox: &Sandbox<PrimaryChannel>,
    ) -> Result<Arc<CommandRouterSession<Channel>>, RcError> {
        let task_id = sandbox.task_id().await?;

        let mut sessions = self.router_sessions.lock().await;
        if let Some(session) = sessions.get(&task_id) {
            return Ok(session.clone());
        }

        let session = Arc::new(sandbox.command_router_session().await?);
        sessions.insert(task_id, session.clone());
        Ok(session)
    }
}
