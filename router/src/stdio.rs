// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use async_stream::try_stream;
use bytes::Bytes;
use engine::GrpcChannel;
use futures::Stream;
use protos::rc::v1::{StdioFileDescriptor, TaskExecStdioReadRequest, TaskExecStdioWriteRequest};
use rc_errors::RcError;

use crate::session::CommandRouterSession;

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(10);

fn reconnect_delay(attempt: u32) -> Duration {
    INITIAL_RECONNECT_DELAY * 2u32.saturating_pow(attempt)
}

impl<C: GrpcChannel> CommandRouterSession<C> {
    /// Stream stdout/stderr starting at byte `offset`. The underlying
    /// `TaskExecStdioRead` RPC is itself resumable (it takes an `offset`), so a
    /// dropped connection reconnects at the last acknowledged offset rather than
    /// restarting the exec's output from the top; backs off 10ms, doubling, up
    /// to 10 attempts before giving up.
    pub fn stdio_read(
        &self,
        exec_id: String,
        file_descriptor: StdioFileDescriptor,
        mut offset: u64,
        timeout_secs: u32,
    ) -> impl Stream<Item = Result<Bytes, RcError>> {
        let client = self.client.clone();
        let task_id = self.task_id().to_owned();

        try_stream! {
            let mut attempts = 0u32;
            'reconnect: loop {
                let mut client = client.clone();
                let request = TaskExecStdioReadRequest {
                    task_id: task_id.clone(),
                    exec_id: exec_id.clone(),
                    file_descriptor: file_descriptor as i32,
                    offset,
                    timeout_secs,
                };

                let mut stream = match client.task_exec_stdio_read(request).await {
                    Ok(response) => response.into_inner(),
                    Err(status) if attempts < MAX_RECONNECT_ATTEMPTS => {
                        attempts += 1;
                        tokio::time::sleep(reconnect_delay(attempts - 1)).await;
                        continue 'reconnect;
                    }
                    Err(status) => Err(rc_errors::classify_status(&status))?,
                };

                loop {
                    match stream.message().await {
                        Ok(Some(chunk)) => {
                            attempts = 0;
                            offset = chunk.offset + chunk.data.len() as u64;
                            if !chunk.data.is_empty() {
                                yield chunk.data;
                            }
                            if chunk.eof {
                                return;
                            }
                        }
                        Ok(None) => return,
                        Err(status) if attempts < MAX_RECONNECT_ATTEMPTS => {
                            attempts += 1;
                            tokio::time::sleep(reconnect_delay(attempts - 1)).await;
                            continue 'reconnect;
                        }
                        Err(status) => Err(rc_errors::classify_status(&status))?,
                    }
                }
            }
        }
    }

    pub async fn stdio_write(
        &self,
        exec_id: &str,
        offset: u64,
        data: Bytes,
        eof: bool,
    ) -> Result<(), RcError> {
        let mut client = self.client.clone();
        client
            .task_exec_stdio_write(TaskExecStdioWriteRequest {
                task_id: self.task_id().to_owned(),
                exec_id: exec_id.to_owned(),
                offset,
                data,
                eof,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?;
        Ok(())
    }
}
