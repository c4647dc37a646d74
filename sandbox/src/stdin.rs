// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use bytes::Bytes;
use engine::GrpcChannel;
use protos::rc::v1::control_plane_client::ControlPlaneClient;
use protos::rc::v1::SandboxStdinWriteRequest;
use rc_errors::RcError;
use tokio::sync::Mutex;

/// Append-only, index-sequenced stdin writer: each write carries the next
/// monotonically increasing index starting at 1, and `close` sends an empty
/// payload with `eof=true` at the following index.
pub struct SandboxStdin<C: GrpcChannel> {
    control_plane: ControlPlaneClient<C>,
    sandbox_id: String,
    next_index: Mutex<u64>,
}

impl<C: GrpcChannel> SandboxStdin<C> {
    pub fn new(control_plane: ControlPlaneClient<C>, sandbox_id: String) -> Self {
        SandboxStdin {
            control_plane,
            sandbox_id,
            next_index: Mutex::new(1),
        }
    }

    pub async fn write(&self, input: Bytes) -> Result<(), RcError> {
        self.send(input, false).await
    }

    pub async fn close(&self) -> Result<(), RcError> {
        self.send(Bytes::new(), true).await
    }

    async fn send(&self, input: Bytes, eof: bool) -> Result<(), RcError> {
        let mut index = self.next_index.lock().await;
        let mut client = self.control_plane.clone();
        client
            .sandbox_stdin_write(SandboxStdinWriteRequest {
                sandbox_id: self.sandbox_id.clone(),
                index: *index,
                input,
                eof,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?;
        *index += 1;
        Ok(())
    }
}
