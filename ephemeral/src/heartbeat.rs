// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use rc_errors::RcError;
use tokio::task::JoinHandle;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

/// An ephemeral object (Volume, Queue, Dict) that needs a periodic RPC to tell
/// the control plane it's still in use. A failed heartbeat is logged and
/// retried on the next tick rather than treated as fatal — a single dropped
/// beat shouldn't tear down the object.
#[async_trait::async_trait]
pub trait HeartbeatTarget: Send + Sync + 'static {
    async fn heartbeat(&self) -> Result<(), RcError>;
}

/// Owns the spawned heartbeat loop for one ephemeral object. Dropping this
/// cancels the loop; `cancel` does the same explicitly and is idempotent
/// (aborting an already-aborted task is a no-op).
pub struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub fn spawn<T: HeartbeatTarget>(target: T) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await; // first tick fires immediately; the object was just created.
            loop {
                interval.tick().await;
                if let Err(err) = target.heartbeat().await {
                    tracing::warn!(error = %err, "ephemeral heartbeat failed, will retry next tick");
                }
            }
        });
        Heartbeat { task }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingTarget {
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl HeartbeatTarget for CountingTarget {
        async fn heartbeat(&self) -> Result<(), RcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancel_stops_the_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let heartbeat = Heartbeat::spawn(CountingTarget { calls: calls.clone() });
        heartbeat.cancel();
        // Give the aborted task a chance to actually stop before we assert on it.
        tokio::task::yield_now().await;
        assert!(heartbeat.task.is_finished());
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels_the_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let heartbeat = Heartbeat::spawn(CountingTarget { calls });
        drop(heartbeat);
        // Nothing to assert on directly (the handle is gone); this just
        // exercises that Drop doesn't panic.
    }
}
