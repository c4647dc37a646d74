// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use engine::GrpcChannel;
use protos::rc::v1::{TaskMountDirectoryRequest, TaskSnapshotDirectoryRequest};
use rc_errors::RcError;

use crate::session::CommandRouterSession;

impl<C: GrpcChannel> CommandRouterSession<C> {
    pub async fn mount_directory(&self, path: &str, image_id: &str) -> Result<(), RcError> {
        let mut client = self.client.clone();
        client
            .task_mount_directory(TaskMountDirectoryRequest {
                task_id: self.task_id().to_owned(),
                path: path.to_owned(),
                image_id: image_id.to_owned(),
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?;
        Ok(())
    }

    pub async fn snapshot_directory(&self, path: &str) -> Result<String, RcError> {
        let mut client = self.client.clone();
        let response = client
            .task_snapshot_directory(TaskSnapshotDirectoryRequest {
                task_id: self.task_id().to_owned(),
                path: path.to_owned(),
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
        Ok(response.image_id)
    }
}
