// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use engine::GrpcChannel;
use protos::rc::v1::TaskGetCommandRouterAccessRequest;
use rc_errors::RcError;
use router::CommandRouterSession;

use crate::lifecycle::Sandbox;

impl<C: GrpcChannel> Sandbox<C> {
    /// Resolves the command router endpoint for this sandbox's task and opens
    /// a session against it. Filesystem, exec, and mount operations all go
    /// through the returned session rather than the control plane directly.
    ///
    /// The router channel is dialed fresh here rather than reusing this
    /// sandbox's own control-plane channel `C`: the router has its own
    /// per-task JWT, and `CommandRouterSession` wraps whatever channel it's
    /// given in its own `AuthLayer`, so handing it an already primary-authed
    /// channel would let the primary token clobber the router JWT on every
    /// call.
    ///
    /// `FAILED_PRECONDITION` from the control plane means the command router
    /// is not enabled for this task.
    pub async fn command_router_session(&self) -> Result<CommandRouterSession<tonic::transport::Channel>, RcError> {
        let task_id = self.task_id().await?;
        let mut control_plane = self.control_plane.clone();
        let response = control_plane
            .task_get_command_router_access(TaskGetCommandRouterAccessRequest {
                task_id: task_id.clone(),
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();

        let channel = grpc_util::backend::construct_single_endpoint_channel(&response.command_router_url)
            .await
            .map_err(RcError::Transport)?;

        Ok(CommandRouterSession::new(
            channel,
            task_id,
            response.command_router_url,
        ))
    }
}
