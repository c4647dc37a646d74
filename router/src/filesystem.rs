// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use bytes::Bytes;
use engine::GrpcChannel;
use protos::rc::v1::filesystem_request::Op;
use protos::rc::v1::{
    ContainerFilesystemExecGetOutputRequest, ContainerFilesystemExecRequest, FilesystemClose,
    FilesystemFlush, FilesystemOpen, FilesystemRead, FilesystemRequest, FilesystemSeek,
    FilesystemWrite, SeekWhence,
};
use rc_errors::RcError;

use crate::session::CommandRouterSession;

const MAX_OUTPUT_RETRIES: u32 = 10;
const OUTPUT_RETRY_DELAY: Duration = Duration::from_millis(10);
const OUTPUT_TIMEOUT_SECS: u32 = 30;

pub struct FilesystemOutput {
    pub data: Bytes,
    pub file_descriptor_id: Option<String>,
    pub error: Option<String>,
}

impl<C: GrpcChannel> CommandRouterSession<C> {
    async fn submit(&self, op: Op) -> Result<String, RcError> {
        let mut client = self.client.clone();
        let response = client
            .container_filesystem_exec(ContainerFilesystemExecRequest {
                task_id: self.task_id().to_owned(),
                request: Some(FilesystemRequest { op: Some(op) }),
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
        Ok(response.exec_id)
    }

    /// Fetch the full output of a submitted filesystem op. The submit step
    /// (`submit`) is never retried here (it isn't idempotent once the server
    /// has created the exec); only the streamed fetch is retried, up to 10
    /// times, since reconnecting just resumes reading the same exec's output.
    async fn collect_output(&self, exec_id: &str) -> Result<FilesystemOutput, RcError> {
        let mut attempts = 0u32;
        let mut data = Vec::new();
        let mut file_descriptor_id = None;
        let mut error = None;

        loop {
            let mut client = self.client.clone();
            let result = client
                .container_filesystem_exec_get_output(ContainerFilesystemExecGetOutputRequest {
                    exec_id: exec_id.to_owned(),
                    timeout_secs: OUTPUT_TIMEOUT_SECS,
                })
                .await;

            let mut stream = match result {
                Ok(response) => response.into_inner(),
                Err(status) if attempts < MAX_OUTPUT_RETRIES => {
                    attempts += 1;
                    tokio::time::sleep(OUTPUT_RETRY_DELAY).await;
                    continue;
                }
                Err(status) => return Err(rc_errors::classify_status(&status)),
            };

            loop {
                match stream.message().await {
                    Ok(Some(chunk)) => {
                        attempts = 0;
                        data.extend_from_slice(&chunk.output);
                        if chunk.file_descriptor_id.is_some() {
                            file_descriptor_id = chunk.file_descriptor_id;
                        }
                        if chunk.error.is_some() {
                            error = chunk.error;
                        }
                        if chunk.eof {
                            return Ok(FilesystemOutput {
                                data: Bytes::from(data),
                                file_descriptor_id,
                                error,
                            });
                        }
                    }
                    Ok(None) => {
                        return Ok(FilesystemOutput {
                            data: Bytes::from(data),
                            file_descriptor_id,
                            error,
                        })
                    }
                    Err(status) if attempts < MAX_OUTPUT_RETRIES => {
                        attempts += 1;
                        tokio::time::sleep(OUTPUT_RETRY_DELAY).await;
                        break;
                    }
                    Err(status) => return Err(rc_errors::classify_status(&status)),
                }
            }
        }
    }

    pub async fn fs_open(&self, path: &str, mode: &str) -> Result<FilesystemOutput, RcError> {
        let exec_id = self
            .submit(Op::Open(FilesystemOpen {
                path: path.to_owned(),
                mode: mode.to_owned(),
            }))
            .await?;
        self.collect_output(&exec_id).await
    }

    pub async fn fs_read(&self, file_descriptor_id: &str, n: u64) -> Result<FilesystemOutput, RcError> {
        let exec_id = self
            .submit(Op::Read(FilesystemRead {
                file_descriptor_id: file_descriptor_id.to_owned(),
                n,
            }))
            .await?;
        self.collect_output(&exec_id).await
    }

    pub async fn fs_write(&self, file_descriptor_id: &str, data: Bytes) -> Result<FilesystemOutput, RcError> {
        let exec_id = self
            .submit(Op::Write(FilesystemWrite {
                file_descriptor_id: file_descriptor_id.to_owned(),
                data,
            }))
            .await?;
        self.collect_output(&exec_id).await
    }

    pub async fn fs_flush(&self, file_descriptor_id: &str) -> Result<FilesystemOutput, RcError> {
        let exec_id = self
            .submit(Op::Flush(FilesystemFlush {
                file_descriptor_id: file_descriptor_id.to_owned(),
            }))
            .await?;
        self.collect_output(&exec_id).await
    }

    pub async fn fs_close(&self, file_descriptor_id: &str) -> Result<FilesystemOutput, RcError> {
        let exec_id = self
            .submit(Op::Close(FilesystemClose {
                file_descriptor_id: file_descriptor_id.to_owned(),
            }))
            .await?;
        self.collect_output(&exec_id).await
    }

    pub async fn fs_seek(
        &self,
        file_descriptor_id: &str,
        offset: i64,
        whence: SeekWhence,
    ) -> Result<FilesystemOutput, RcError> {
        let exec_id = self
            .submit(Op::Seek(FilesystemSeek {
                file_descriptor_id: file_descriptor_id.to_owned(),
                offset,
                whence: whence as i32,
            }))
            .await?;
        self.collect_output(&exec_id).await
    }
}
