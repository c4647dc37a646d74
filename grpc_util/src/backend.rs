// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ginepro::LoadBalancedChannel;
use tokio::sync::Mutex;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Uri};

/// Minimum message size floor for every channel this core constructs (spec §4.A).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);
/// Larger than `tonic`'s default (64 KiB) so large streamed stdio chunks don't stall on
/// flow-control.
const HTTP2_WINDOW_SIZE: u32 = 4 * 1024 * 1024;

fn is_loopback_host(host: &str) -> bool {
    host == "localhost" || host.parse::<std::net::IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Parse `HOST:PORT` and build a load-balanced channel to it, applying the channel
/// configuration floor from spec §4.A. TLS is used unless the host is loopback.
pub async fn construct_channel(address: &str) -> Result<LoadBalancedChannel, String> {
    let (hostname, port_str) = address
        .split_once(':')
        .ok_or_else(|| format!("expected HOST:PORT, got `{address}`"))?;
    if hostname.is_empty() || port_str.is_empty() {
        return Err(format!("expected HOST:PORT, got `{address}`"));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("unable to parse port from `{address}`"))?;

    let service_definition = ginepro::ServiceDefinition::from_parts(hostname, port)
        .map_err(|err| format!("failed to initialize service definition: {err}"))?;

    let mut builder = LoadBalancedChannel::builder(service_definition)
        ;

    if !is_loopback_host(hostname) {
        builder = builder.with_tls(ClientTlsConfig::new());
    }

    builder
        .channel()
        .await
        .map_err(|err| format!("failed to initialize channel to {address}: {err}"))
}

/// Build a plain single-endpoint `Channel` (used for the command router, which is
/// addressed by a single URL rather than a load-balanced service name).
pub async fn construct_single_endpoint_channel(url: &str) -> Result<Channel, String> {
    let uri: Uri = url
        .parse()
        .map_err(|err| format!("invalid command router URL `{url}`: {err}"))?;
    let is_loopback = uri.host().map(is_loopback_host).unwrap_or(false);

    let mut endpoint = Endpoint::from(uri.clone())
        .tcp_keepalive(Some(KEEPALIVE_INTERVAL))
        .keep_alive_timeout(KEEPALIVE_TIMEOUT)
        .keep_alive_while_idle(true)
        .initial_connection_window_size(HTTP2_WINDOW_SIZE)
        .initial_stream_window_size(HTTP2_WINDOW_SIZE);

    if !is_loopback {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new())
            .map_err(|err| format!("failed to configure TLS for {url}: {err}"))?;
    }

    endpoint
        .connect()
        .await
        .map_err(|err| format!("failed to connect to {url}: {err}"))
}

/// A lazily-populated map from key (input-plane URL, or task id) to channel,
/// generalizing the teacher's per-instance `Backend` map (keyed by a config-driven
/// instance name) to on-demand insertion keyed by whatever the caller discovers at
/// runtime. Guarded by a single mutex: construction only happens once per key, and
/// concurrent callers for the same still-unpopulated key simply wait their turn
/// rather than racing to dial the same endpoint twice.
pub struct ChannelCache<C> {
    channels: Mutex<HashMap<String, C>>,
}

impl<C: Clone> ChannelCache<C> {
    pub fn new() -> Self {
        ChannelCache {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_insert_with<F, Fut, E>(&self, key: &str, construct: F) -> Result<C, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<C, E>>,
    {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(key) {
            return Ok(channel.clone());
        }
        let channel = construct().await?;
        channels.insert(key.to_owned(), channel.clone());
        Ok(channel)
    }

    pub async fn remove(&self, key: &str) {
        self.channels.lock().await.remove(key);
    }
}

impl<C: Clone> Default for ChannelCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedChannelCache<C> = Arc<ChannelCache<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loopback_hosts() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("::1"));
        assert!(!is_loopback_host("api.example.com"));
    }

    #[tokio::test]
    async fn channel_cache_constructs_once_per_key() {
        let cache: ChannelCache<u32> = ChannelCache::new();
        let calls = std::sync::atomic::AtomicU32::new(0);

        let a = cache
            .get_or_insert_with("k", || async {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, String>(1)
            })
            .await
            .unwrap();
        let b = cache
            .get_or_insert_with("k", || async {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, String>(2)
            })
            .await
            .unwrap();

        assert_eq!(a, 1);
        assert_eq!(b, 1);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_cache_reconstructs_after_remove() {
        let cache: ChannelCache<u32> = ChannelCache::new();
        cache
            .get_or_insert_with("k", || async { Ok::<_, String>(1) })
            .await
            .unwrap();
        cache.remove("k").await;
        let b = cache
            .get_or_insert_with("k", || async { Ok::<_, String>(2) })
            .await
            .unwrap();
        assert_eq!(b, 2);
    }
}
