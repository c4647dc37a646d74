// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use protos::rc::v1::command_router_server::{CommandRouter, CommandRouterServer};
use protos::rc::v1::{
    ContainerFilesystemExecGetOutputRequest, ContainerFilesystemExecGetOutputResponse,
    ContainerFilesystemExecRequest, ContainerFilesystemExecResponse, RefreshJwtRequest,
    RefreshJwtResponse, TaskExecPollRequest, TaskExecPollResponse, TaskExecStartRequest,
    TaskExecStartResponse, TaskExecStatus, TaskExecStdioReadRequest, TaskExecStdioReadResponse,
    TaskExecStdioWriteRequest, TaskExecStdioWriteResponse, TaskExecWaitRequest,
    TaskExecWaitResponse, TaskMountDirectoryRequest, TaskMountDirectoryResponse,
    TaskSnapshotDirectoryRequest, TaskSnapshotDirectoryResponse,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint, Server};
use tonic::{Request, Response, Status};

use crate::session::CommandRouterSession;

/// A fake `CommandRouter` that hands out JWTs stamped with a generation counter
/// and completes an exec only after `polls_until_done` polls/waits have been observed.
struct FakeRouter {
    router_url: String,
    jwts_issued: Arc<AtomicU32>,
    polls_before_done: u32,
    polls_seen: Arc<AtomicU32>,
}

#[tonic::async_trait]
impl CommandRouter for FakeRouter {
    async fn refresh_jwt(
        &self,
        _request: Request<RefreshJwtRequest>,
    ) -> Result<Response<RefreshJwtResponse>, Status> {
        let generation = self.jwts_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Response::new(RefreshJwtResponse {
            jwt: format!("jwt-gen-{generation}"),
            command_router_url: self.router_url.clone(),
        }))
    }

    async fn task_exec_start(
        &self,
        _request: Request<TaskExecStartRequest>,
    ) -> Result<Response<TaskExecStartResponse>, Status> {
        Ok(Response::new(TaskExecStartResponse {
            exec_id: "exec-1".to_owned(),
        }))
    }

    async fn task_exec_wait(
        &self,
        request: Request<TaskExecWaitRequest>,
    ) -> Result<Response<TaskExecWaitResponse>, Status> {
        if request.metadata().get("authorization").is_none() {
            return Err(Status::unauthenticated("missing bearer token"));
        }
        let seen = self.polls_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if seen < self.polls_before_done {
            return Ok(Response::new(TaskExecWaitResponse {
                status: TaskExecStatus::Running as i32,
                exit_code: None,
            }));
        }
        Ok(Response::new(TaskExecWaitResponse {
            status: TaskExecStatus::Complete as i32,
            exit_code: Some(0),
        }))
    }

    async fn task_exec_poll(
        &self,
        _request: Request<TaskExecPollRequest>,
    ) -> Result<Response<TaskExecPollResponse>, Status> {
        let seen = self.polls_seen.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Response::new(TaskExecPollResponse {
            completed: seen >= self.polls_before_done,
            exit_code: (seen >= self.polls_before_done).then_some(0),
        }))
    }

    type TaskExecStdioReadStream = tonic::codec::Streaming<TaskExecStdioReadResponse>;

    async fn task_exec_stdio_read(
        &self,
        _request: Request<TaskExecStdioReadRequest>,
    ) -> Result<Response<Self::TaskExecStdioReadStream>, Status> {
        Err(Status::unimplemented("not exercised by these tests"))
    }

    async fn task_exec_stdio_write(
        &self,
        _request: Request<TaskExecStdioWriteRequest>,
    ) -> Result<Response<TaskExecStdioWriteResponse>, Status> {
        Ok(Response::new(TaskExecStdioWriteResponse {}))
    }

    async fn task_mount_directory(
        &self,
        _request: Request<TaskMountDirectoryRequest>,
    ) -> Result<Response<TaskMountDirectoryResponse>, Status> {
        Ok(Response::new(TaskMountDirectoryResponse {}))
    }

    async fn task_snapshot_directory(
        &self,
        _request: Request<TaskSnapshotDirectoryRequest>,
    ) -> Result<Response<TaskSnapshotDirectoryResponse>, Status> {
        Ok(Response::new(TaskSnapshotDirectoryResponse {
            image_id: "image-1".to_owned(),
        }))
    }

    async fn container_filesystem_exec(
        &self,
        _request: Request<ContainerFilesystemExecRequest>,
    ) -> Result<Response<ContainerFilesystemExecResponse>, Status> {
        Ok(Response::new(ContainerFilesystemExecResponse {
            exec_id: "fs-exec-1".to_owned(),
        }))
    }

    type ContainerFilesystemExecGetOutputStream =
        tonic::codec::Streaming<ContainerFilesystemExecGetOutputResponse>;

    async fn container_filesystem_exec_get_output(
        &self,
        _request: Request<ContainerFilesystemExecGetOutputRequest>,
    ) -> Result<Response<Self::ContainerFilesystemExecGetOutputStream>, Status> {
        Err(Status::unimplemented("not exercised by these tests"))
    }
}

/// Binds a `FakeRouter` to an ephemeral localhost port and returns a connected
/// channel plus the URL the router reports back from `RefreshJwt`.
async fn spawn_fake_router(polls_before_done: u32) -> (Channel, String, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let local_addr: SocketAddr = listener.local_addr().expect("local_addr");
    let router_url = format!("http://{local_addr}");

    let jwts_issued = Arc::new(AtomicU32::new(0));
    let router = FakeRouter {
        router_url: router_url.clone(),
        jwts_issued: jwts_issued.clone(),
        polls_before_done,
        polls_seen: Arc::new(AtomicU32::new(0)),
    };

    tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(CommandRouterServer::new(router))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    });

    let endpoint: Endpoint = router_url.clone().try_into().expect("valid endpoint");
    let channel = endpoint.connect().await.expect("connect");

    (channel, router_url, jwts_issued)
}

#[tokio::test]
async fn session_fetches_and_uses_a_jwt() {
    let (channel, router_url, jwts_issued) = spawn_fake_router(1).await;
    let session = CommandRouterSession::new(channel, "task-1".to_owned(), router_url);

    let result = session.exec_wait("exec-1", Instant::now() + Duration::from_secs(5)).await;
    assert!(result.is_ok(), "expected a successful wait, got {result:?}");
    assert_eq!(jwts_issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_rejects_a_router_url_change() {
    let (channel, _router_url, _jwts_issued) = spawn_fake_router(1).await;
    let session =
        CommandRouterSession::new(channel, "task-1".to_owned(), "http://127.0.0.1:1".to_owned());

    let result = session.exec_wait("exec-1", Instant::now() + Duration::from_secs(5)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn exec_start_then_wait_reports_completion() {
    let (channel, router_url, _jwts_issued) = spawn_fake_router(2).await;
    let session = CommandRouterSession::new(channel, "task-1".to_owned(), router_url);

    let handle = session
        .exec_start(vec!["echo".to_owned(), "hi".to_owned()], Default::default(), None, None)
        .await
        .expect("exec_start");

    let result = session
        .exec_wait(&handle.exec_id, Instant::now() + Duration::from_secs(5))
        .await
        .expect("exec_wait");
    assert_eq!(result.status, TaskExecStatus::Complete);
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn exec_poll_reports_completion_once_the_server_says_so() {
    let (channel, router_url, _jwts_issued) = spawn_fake_router(3).await;
    let session = CommandRouterSession::new(channel, "task-1".to_owned(), router_url);

    assert_eq!(session.exec_poll("exec-1").await.expect("poll 1"), None);
    assert_eq!(session.exec_poll("exec-1").await.expect("poll 2"), None);
    assert_eq!(session.exec_poll("exec-1").await.expect("poll 3"), Some(0));
}

#[tokio::test]
async fn mount_and_snapshot_directory_round_trip() {
    let (channel, router_url, _jwts_issued) = spawn_fake_router(1).await;
    let session = CommandRouterSession::new(channel, "task-1".to_owned(), router_url);

    session.mount_directory("/mnt/data", "image-0").await.expect("mount");
    let image_id = session.snapshot_directory("/mnt/data").await.expect("snapshot");
    assert_eq!(image_id, "image-1");
}

#[tokio::test]
async fn filesystem_open_submits_and_collects_output() {
    let (channel, router_url, _jwts_issued) = spawn_fake_router(1).await;
    let session = CommandRouterSession::new(channel, "task-1".to_owned(), router_url);

    // `ContainerFilesystemExecGetOutput` is unimplemented on the fake router, so
    // this exercises the submit step and the retry-then-fail path of collect_output.
    let result = session.fs_open("/tmp/foo", "r").await;
    assert!(result.is_err());
}
