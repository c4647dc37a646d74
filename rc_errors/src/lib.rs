// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

use tonic::{Code, Status};

/// Typed error kinds raised to callers of the core, per the documented taxonomy.
/// Every variant carries a human-readable message, preserving the originating
/// server detail when one is available; no stack-trace chaining is attempted.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RcError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("function call timed out: {0}")]
    FunctionTimeout(String),

    #[error("sandbox operation timed out: {0}")]
    SandboxTimeout(String),

    #[error("sandbox filesystem error: {0}")]
    SandboxFilesystem(String),

    #[error("remote error: {0}")]
    RemoteError(String),

    #[error("internal failure: {0}")]
    InternalFailure(String),

    #[error("queue is empty")]
    QueueEmpty,

    #[error("queue is full")]
    QueueFull,

    #[error("request exceeded the server's accepted payload size: {0}")]
    RequestSize(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("function is a web endpoint and cannot be invoked remotely: {0}")]
    InvalidUse(String),

    #[error("unsupported wire data format: {0}")]
    UnsupportedDataFormat(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Fatal: the command router session's URL changed mid-session. Never retried.
    #[error("command router session is no longer valid: {0}")]
    RouterSessionInvalid(String),
}

impl RcError {
    /// A short kind string, for callers that want to match on category without a
    /// full `match` over the enum (e.g. logging, metrics labels).
    pub fn kind(&self) -> &'static str {
        match self {
            RcError::NotFound(_) => "not_found",
            RcError::AlreadyExists(_) => "already_exists",
            RcError::InvalidArgument(_) => "invalid_argument",
            RcError::FunctionTimeout(_) => "function_timeout",
            RcError::SandboxTimeout(_) => "sandbox_timeout",
            RcError::SandboxFilesystem(_) => "sandbox_filesystem",
            RcError::RemoteError(_) => "remote_error",
            RcError::InternalFailure(_) => "internal_failure",
            RcError::QueueEmpty => "queue_empty",
            RcError::QueueFull => "queue_full",
            RcError::RequestSize(_) => "request_size",
            RcError::DeadlineExceeded(_) => "deadline_exceeded",
            RcError::Cancelled => "cancelled",
            RcError::InvalidUse(_) => "invalid_use",
            RcError::UnsupportedDataFormat(_) => "unsupported_data_format",
            RcError::Config(_) => "config",
            RcError::Transport(_) => "transport",
            RcError::RouterSessionInvalid(_) => "router_session_invalid",
        }
    }

    /// True if the transport-level status this was built from should be retried
    /// by the retry middleware / stream reconnect loops.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RcError::DeadlineExceeded(_) | RcError::Transport(_) | RcError::RemoteError(_)
        )
    }
}

/// Special-cased `FAILED_PRECONDITION` messages that the server uses in place of
/// a proper `NOT_FOUND`, per spec: a documented workaround rather than a general rule.
const FAILED_PRECONDITION_NOT_FOUND_SUBSTRINGS: [&str; 2] =
    ["Secret is missing key", "Could not find image"];

/// Map a gRPC `Status` to a typed `RcError` per the documented wire mapping.
/// Any status not named here propagates verbatim as a `RemoteError`.
pub fn classify_status(status: &Status) -> RcError {
    let message = status.message().to_owned();
    match status.code() {
        Code::NotFound => RcError::NotFound(message),
        Code::AlreadyExists => RcError::AlreadyExists(message),
        Code::InvalidArgument => RcError::InvalidArgument(message),
        Code::DeadlineExceeded => RcError::DeadlineExceeded(message),
        Code::Cancelled => RcError::Cancelled,
        Code::ResourceExhausted => RcError::RequestSize(message),
        Code::FailedPrecondition
            if FAILED_PRECONDITION_NOT_FOUND_SUBSTRINGS
                .iter()
                .any(|needle| message.contains(needle)) =>
        {
            RcError::NotFound(message)
        }
        _ => RcError::RemoteError(format!("{}: {}", status.code(), message)),
    }
}

/// Status codes the retry middleware treats as transient, per spec §4.B, plus any
/// caller-supplied additions.
pub fn is_retryable_code(code: Code, extra: &[Code]) -> bool {
    matches!(
        code,
        Code::DeadlineExceeded
            | Code::Unavailable
            | Code::Cancelled
            | Code::Internal
            | Code::Unknown
    ) || extra.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_not_found() {
        let status = Status::not_found("no such thing");
        assert!(matches!(classify_status(&status), RcError::NotFound(_)));
    }

    #[test]
    fn maps_failed_precondition_special_case() {
        let status = Status::failed_precondition("Secret is missing key FOO");
        assert!(matches!(classify_status(&status), RcError::NotFound(_)));
    }

    #[test]
    fn other_failed_precondition_is_remote_error() {
        let status = Status::failed_precondition("container is paused");
        assert!(matches!(classify_status(&status), RcError::RemoteError(_)));
    }

    #[test]
    fn resource_exhausted_is_request_size() {
        let status = Status::resource_exhausted("payload too large");
        assert!(matches!(classify_status(&status), RcError::RequestSize(_)));
    }

    #[test]
    fn default_retryable_codes() {
        assert!(is_retryable_code(Code::Unavailable, &[]));
        assert!(is_retryable_code(Code::Internal, &[]));
        assert!(!is_retryable_code(Code::InvalidArgument, &[]));
        assert!(is_retryable_code(
            Code::PermissionDenied,
            &[Code::PermissionDenied]
        ));
    }
}
