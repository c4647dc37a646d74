// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use engine::GrpcChannel;
use grpc_util::middleware::{retry_unary, set_retry_headers, RetryPolicy};
use protos::rc::v1::{
    TaskExecPollRequest, TaskExecStartRequest, TaskExecStatus, TaskExecWaitRequest,
};
use rc_errors::RcError;

use crate::session::CommandRouterSession;

/// `execPoll` retry shape: fast, tightly-bounded backoff since a poll that
/// fails transiently should be retried almost immediately rather than making
/// the caller wait a full round of exponential backoff before trying again.
const POLL_RETRY_POLICY: RetryPolicy = RetryPolicy {
    max_attempts: 10,
    initial_delay: Duration::from_millis(10),
    max_delay: Duration::from_millis(640),
    multiplier: 2.0,
};

pub struct ExecHandle {
    pub exec_id: String,
}

pub struct ExecResult {
    pub status: TaskExecStatus,
    pub exit_code: Option<i32>,
}

impl<C: GrpcChannel> CommandRouterSession<C> {
    pub async fn exec_start(
        &self,
        command: Vec<String>,
        env: HashMap<String, String>,
        workdir: Option<String>,
        timeout_ms: Option<u32>,
    ) -> Result<ExecHandle, RcError> {
        let mut client = self.client.clone();
        let response = client
            .task_exec_start(TaskExecStartRequest {
                task_id: self.task_id().to_owned(),
                command,
                env,
                workdir,
                timeout_ms,
            })
            .await
            .map_err(|status| rc_errors::classify_status(&status))?
            .into_inner();
        Ok(ExecHandle {
            exec_id: response.exec_id,
        })
    }

    /// Non-blocking completion check, retried with capped exponential backoff
    /// against transient transport failures (up to 10 attempts).
    pub async fn exec_poll(&self, exec_id: &str) -> Result<Option<i32>, RcError> {
        let client = self.client.clone();
        let task_id = self.task_id().to_owned();
        let exec_id = exec_id.to_owned();
        let idempotency_key = execution_util::generate_idempotency_key();

        let response = retry_unary(POLL_RETRY_POLICY, &idempotency_key, |key, attempt, elapsed| {
            let mut client = client.clone();
            let task_id = task_id.clone();
            let exec_id = exec_id.clone();
            let mut request = tonic::Request::new(TaskExecPollRequest { task_id, exec_id });
            set_retry_headers(&mut request, key, attempt, elapsed);
            async move { client.task_exec_poll(request).await }
        })
        .await
        .map_err(|status| rc_errors::classify_status(&status))?
        .into_inner();

        Ok(response.completed.then_some(response.exit_code.unwrap_or_default()))
    }

    /// Block until the exec completes or `deadline` passes. `TaskExecWait`
    /// already blocks server-side for up to its own `timeout_secs`; a transient
    /// transport failure here is retried after a fixed 1s delay, with no
    /// separate attempt cap — only `deadline` bounds how long this runs.
    pub async fn exec_wait(&self, exec_id: &str, deadline: Instant) -> Result<ExecResult, RcError> {
        let mut client = self.client.clone();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RcError::SandboxTimeout(format!(
                    "exec {exec_id} did not complete before deadline"
                )));
            }
            let timeout_secs = remaining.as_secs().clamp(1, 55) as u32;

            match client
                .task_exec_wait(TaskExecWaitRequest {
                    task_id: self.task_id().to_owned(),
                    exec_id: exec_id.to_owned(),
                    timeout_secs,
                })
                .await
            {
                Ok(response) => {
                    let response = response.into_inner();
                    if response.status() != TaskExecStatus::Running {
                        return Ok(ExecResult {
                            status: response.status(),
                            exit_code: response.exit_code,
                        });
                    }
                }
                Err(status) if rc_errors::is_retryable_code(status.code(), &[]) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(status) => return Err(rc_errors::classify_status(&status)),
            }
        }
    }
}
