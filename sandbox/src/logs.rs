// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use engine::GrpcChannel;
use futures::{Stream, StreamExt};
use protos::rc::v1::control_plane_client::ControlPlaneClient;
use protos::rc::v1::{FileDescriptor, SandboxGetLogsRequest};
use rc_errors::RcError;

const LOG_POLL_TIMEOUT_SECS: u32 = 55;
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(10);

fn reconnect_delay(attempt: u32) -> Duration {
    INITIAL_RECONNECT_DELAY * 2u32.saturating_pow(attempt)
}

/// Streams raw log bytes for one file descriptor, resuming from an opaque
/// `entryId` cursor (`"0-0"` initially) across reconnects. A successful batch
/// resets both the cursor and the reconnect backoff.
pub fn stream_logs<C: GrpcChannel>(
    control_plane: ControlPlaneClient<C>,
    sandbox_id: String,
    file_descriptor: FileDescriptor,
) -> impl Stream<Item = Result<Bytes, RcError>> {
    try_stream! {
        let mut last_entry_id = "0-0".to_owned();
        let mut attempts = 0u32;

        'reconnect: loop {
            let mut client = control_plane.clone();
            let request = SandboxGetLogsRequest {
                sandbox_id: sandbox_id.clone(),
                file_descriptor: file_descriptor as i32,
                timeout_secs: LOG_POLL_TIMEOUT_SECS,
                last_entry_id: last_entry_id.clone(),
            };

            let mut stream = match client.sandbox_get_logs(request).await {
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
                    Ok(Some(batch)) => {
                        attempts = 0;
                        last_entry_id = batch.entry_id;
                        for item in batch.items {
                            if !item.data.is_empty() {
                                yield item.data;
                            }
                        }
                        if batch.eof {
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

/// Wraps a byte stream, decoding each chunk to UTF-8 and carrying any
/// incomplete trailing multi-byte sequence over to the next chunk. Kept
/// separate from `stream_logs` so binary consumers can use the raw byte
/// stream directly.
pub fn decode_utf8<S>(bytes: S) -> impl Stream<Item = Result<String, RcError>>
where
    S: Stream<Item = Result<Bytes, RcError>>,
{
    async_stream::try_stream! {
        futures::pin_mut!(bytes);
        let mut pending = BytesMut::new();
        while let Some(chunk) = bytes.next().await {
            pending.extend_from_slice(&chunk?);
            match std::str::from_utf8(&pending) {
                Ok(text) => {
                    yield text.to_owned();
                    pending.clear();
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    let text = std::str::from_utf8(&pending[..valid_up_to])
                        .expect("validated prefix")
                        .to_owned();
                    let remainder = pending.split_off(valid_up_to);
                    pending = remainder;
                    if !text.is_empty() {
                        yield text;
                    }
                }
            }
        }
        if !pending.is_empty() {
            yield String::from_utf8_lossy(&pending).into_owned();
        }
    }
}
