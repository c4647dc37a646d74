// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use engine::GrpcChannel;
use protos::rc::v1::control_plane_client::ControlPlaneClient;
use protos::rc::v1::{
    SandboxCreateConnectTokenRequest, SandboxCreateRequest, SandboxGetFromNameRequest,
    SandboxGetTaskIdRequest, SandboxGetTunnelsRequest, SandboxInfo, SandboxListRequest,
    SandboxSnapshotFilesystemRequest, SandboxTagsGetRequest, SandboxTagsSetRequest,
    SandboxTerminateRequest, SandboxTunnelsStatus, SandboxWaitRequest, SandboxWaitStatus,
    Tunnel,
};
use rc_errors::RcError;
use tokio::sync::Mutex;

use crate::image::ImageBuilder;
use crate::options::SandboxOptions;

const WAIT_POLL_TIMEOUT_SECS: u32 = 10;

/// One gRPC-level connect token, returned for HTTP(S) ingress to a
/// user-configured open port.
pub struct ConnectToken {
    pub url: String,
    pub token: String,
}

/// A running or terminated sandbox. `task_id` is resolved on demand (a
/// terminated sandbox has none) and cached for the lifetime of this handle;
/// `tunnels` is cached after the first successful fetch since the set of
/// tunnels is fixed for the sandbox's lifetime.
pub struct Sandbox<C: GrpcChannel> {
    pub(crate) control_plane: ControlPlaneClient<C>,
    sandbox_id: String,
    task_id: Mutex<Option<String>>,
    tunnels: Mutex<Option<Arc<Vec<Tunnel>>>>,
}

impl<C: GrpcChannel> Sandbox<C> {
    fn wrap(control_plane: ControlPlaneClient<C>, sandbox_id: String) -> Self {
        Sandbox {
            control_plane,
            sandbox_id,
            task_id: Mutex::new(None),
            tunnels: Mutex::new(None),
        }
    }

    pub async fn create(
        mut control_plane: ControlPlaneClient<C>,
        app_id: String,
        image_builder: &dyn ImageBuilder,
        image_spec: &str,
        options: SandboxOptions,
    ) -> Result<Self, RcError> {
        let image_id = image_builder.build(image_spec).await?;
        let request = options.into_wire(app_id, image_id)?;
        let response = control_plane
            .sandbox_create(request)
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
        Ok(Sandbox::wrap(control_plane, response.sandbox_id))
    }

    /// Attaches to an existing sandbox by id, confirming it still exists with
    /// a zero-timeout wait (a `NOT_FOUND` there maps to a typed not-found).
    pub async fn from_id(mut control_plane: ControlPlaneClient<C>, sandbox_id: String) -> Result<Self, RcError> {
        control_plane
            .sandbox_wait(SandboxWaitRequest {
                sandbox_id: sandbox_id.clone(),
                timeout_secs: 0,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?;
        Ok(Sandbox::wrap(control_plane, sandbox_id))
    }

    pub async fn from_name(
        mut control_plane: ControlPlaneClient<C>,
        app_name: String,
        name: String,
        environment_name: Option<String>,
    ) -> Result<Self, RcError> {
        let response = control_plane
            .sandbox_get_from_name(SandboxGetFromNameRequest {
                app_name,
                name,
                environment_name,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
        Ok(Sandbox::wrap(control_plane, response.sandbox_id))
    }

    /// Lists sandboxes one page at a time; pass the last page's final
    /// `created_at` as `before_timestamp` to page backwards in time.
    pub async fn list(
        control_plane: &mut ControlPlaneClient<C>,
        app_id: Option<String>,
        before_timestamp: Option<f64>,
        tags: HashMap<String, String>,
    ) -> Result<Vec<SandboxInfo>, RcError> {
        let response = control_plane
            .sandbox_list(SandboxListRequest {
                app_id,
                before_timestamp,
                tags,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
        Ok(response.sandboxes)
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Blocks until the sandbox finishes, polling every 10s, and maps the
    /// terminal status to a process-style return code: 124 on timeout, 137 on
    /// termination, otherwise the process's own exit code.
    pub async fn wait(&self) -> Result<i32, RcError> {
        let mut client = self.control_plane.clone();
        loop {
            let response = client
                .sandbox_wait(SandboxWaitRequest {
                    sandbox_id: self.sandbox_id.clone(),
                    timeout_secs: WAIT_POLL_TIMEOUT_SECS,
                })
                .await
                .map_err(|status| rc_errors::classify_status(&status))?
                .into_inner();

            match response.status() {
                SandboxWaitStatus::Running | SandboxWaitStatus::Unspecified => continue,
                SandboxWaitStatus::Timeout => return Ok(124),
                SandboxWaitStatus::Terminated => return Ok(137),
                SandboxWaitStatus::Completed => return Ok(response.exit_code.unwrap_or_default()),
            }
        }
    }

    /// Non-blocking completion check: `None` if the sandbox is still running.
    pub async fn poll(&self) -> Result<Option<i32>, RcError> {
        let mut client = self.control_plane.clone();
        let response = client
            .sandbox_wait(SandboxWaitRequest {
                sandbox_id: self.sandbox_id.clone(),
                timeout_secs: 0,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();

        Ok(match response.status() {
            SandboxWaitStatus::Running | SandboxWaitStatus::Unspecified => None,
            SandboxWaitStatus::Timeout => Some(124),
            SandboxWaitStatus::Terminated => Some(137),
            SandboxWaitStatus::Completed => Some(response.exit_code.unwrap_or_default()),
        })
    }

    pub async fn terminate(&self) -> Result<(), RcError> {
        let mut client = self.control_plane.clone();
        client
            .sandbox_terminate(SandboxTerminateRequest {
                sandbox_id: self.sandbox_id.clone(),
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?;
        *self.task_id.lock().await = None;
        Ok(())
    }

    pub async fn set_tags(&self, tags: HashMap<String, String>) -> Result<(), RcError> {
        let mut client = self.control_plane.clone();
        client
            .sandbox_tags_set(SandboxTagsSetRequest {
                sandbox_id: self.sandbox_id.clone(),
                tags,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?;
        Ok(())
    }

    pub async fn get_tags(&self) -> Result<HashMap<String, String>, RcError> {
        let mut client = self.control_plane.clone();
        let response = client
            .sandbox_tags_get(SandboxTagsGetRequest {
                sandbox_id: self.sandbox_id.clone(),
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
        Ok(response.tags)
    }

    pub async fn tunnels(&self, timeout: Duration) -> Result<Arc<Vec<Tunnel>>, RcError> {
        if let Some(cached) = self.tunnels.lock().await.clone() {
            return Ok(cached);
        }

        let mut client = self.control_plane.clone();
        let response = client
            .sandbox_get_tunnels(SandboxGetTunnelsRequest {
                sandbox_id: self.sandbox_id.clone(),
                timeout_secs: timeout.as_secs() as u32,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();

        match response.status() {
            SandboxTunnelsStatus::Success | SandboxTunnelsStatus::Unspecified => {
                let tunnels = Arc::new(response.tunnels);
                *self.tunnels.lock().await = Some(tunnels.clone());
                Ok(tunnels)
            }
            SandboxTunnelsStatus::Timeout => Err(RcError::SandboxTimeout(format!(
                "timed out waiting for tunnels on sandbox {}",
                self.sandbox_id
            ))),
        }
    }

    /// Snapshots the sandbox's filesystem into a new image, returning the
    /// resulting image id.
    pub async fn snapshot_filesystem(&self, timeout: Duration) -> Result<String, RcError> {
        let mut client = self.control_plane.clone();
        let response = client
            .sandbox_snapshot_filesystem(SandboxSnapshotFilesystemRequest {
                sandbox_id: self.sandbox_id.clone(),
                timeout_secs: timeout.as_secs() as u32,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();

        use protos::rc::v1::FilesystemSnapshotStatus;
        match response.status() {
            FilesystemSnapshotStatus::Success => Ok(response.image_id.unwrap_or_default()),
            FilesystemSnapshotStatus::Failure | FilesystemSnapshotStatus::Unspecified => {
                Err(RcError::SandboxFilesystem(
                    response
                        .error_message
                        .unwrap_or_else(|| "filesystem snapshot failed".to_owned()),
                ))
            }
        }
    }

    pub async fn create_connect_token(&self, port: u32) -> Result<ConnectToken, RcError> {
        let mut client = self.control_plane.clone();
        let response = client
            .sandbox_create_connect_token(SandboxCreateConnectTokenRequest {
                sandbox_id: self.sandbox_id.clone(),
                port,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
        Ok(ConnectToken {
            url: response.url,
            token: response.token,
        })
    }

    /// The task backing this sandbox, resolved on first use and cached.
    /// Hard error if the sandbox has already terminated.
    pub async fn task_id(&self) -> Result<String, RcError> {
        let mut cached = self.task_id.lock().await;
        if let Some(task_id) = cached.as_ref() {
            return Ok(task_id.clone());
        }

        let mut client = self.control_plane.clone();
        let response = client
            .sandbox_get_task_id(SandboxGetTaskIdRequest {
                sandbox_id: self.sandbox_id.clone(),
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();

        *cached = Some(response.task_id.clone());
        Ok(response.task_id)
    }
}
