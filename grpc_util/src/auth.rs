// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::future::{BoxFuture, FutureExt, Shared};
use rc_errors::RcError;
use tokio::sync::Mutex;

/// How far ahead of expiry a token is proactively refreshed.
const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Assumed lifetime when a token's `exp` claim can't be parsed, matching the
/// server's default JWT TTL.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(20 * 60);

/// A control-plane or command-router JWT plus its parsed expiry. The signature is
/// never verified here: the client only needs `exp` to decide when to refresh, and
/// the server is the one actually checking the signature on every call.
#[derive(Clone, Debug)]
pub struct AuthToken {
    pub jwt: Arc<str>,
    pub expires_at: SystemTime,
}

impl AuthToken {
    fn from_jwt(jwt: String) -> Self {
        let expires_at = decode_unverified_exp(&jwt)
            .map(|exp| SystemTime::UNIX_EPOCH + Duration::from_secs(exp))
            .unwrap_or_else(|| SystemTime::now() + DEFAULT_TOKEN_TTL);
        AuthToken {
            jwt: jwt.into(),
            expires_at,
        }
    }

    fn needs_refresh(&self) -> bool {
        SystemTime::now() + REFRESH_WINDOW >= self.expires_at
    }
}

/// Decode the `exp` claim out of a JWT's payload segment without verifying its
/// signature. Returns `None` on any malformed input, in which case the caller falls
/// back to [`DEFAULT_TOKEN_TTL`].
fn decode_unverified_exp(jwt: &str) -> Option<u64> {
    let payload_b64 = jwt.split('.').nth(1)?;
    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&payload_bytes).ok()?;
    claims.get("exp")?.as_u64()
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<AuthToken>, RcError>>>;

/// Lazily refreshes a JWT, collapsing concurrent callers onto a single in-flight
/// refresh (spec §4.C). Used both for the client's primary control-plane token and
/// for each per-task command router session's independently-refreshed token.
pub struct AuthTokenManager<F> {
    fetch: F,
    current: Mutex<Option<Arc<AuthToken>>>,
    inflight: Mutex<Option<RefreshFuture>>,
}

impl<F, Fut> AuthTokenManager<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, RcError>> + Send + 'static,
{
    pub fn new(fetch: F) -> Self {
        AuthTokenManager {
            fetch,
            current: Mutex::new(None),
            inflight: Mutex::new(None),
        }
    }

    /// Return a token valid for at least [`REFRESH_WINDOW`], refreshing first if the
    /// cached one is missing or expiring soon.
    pub async fn get_token(&self) -> Result<Arc<AuthToken>, RcError> {
        {
            let current = self.current.lock().await;
            if let Some(token) = current.as_ref() {
                if !token.needs_refresh() {
                    return Ok(token.clone());
                }
            }
        }
        self.refresh().await
    }

    /// Force a refresh regardless of the cached token's expiry, e.g. after the
    /// server rejects a call as unauthenticated.
    pub async fn force_refresh(&self) -> Result<Arc<AuthToken>, RcError> {
        self.refresh().await
    }

    async fn refresh(&self) -> Result<Arc<AuthToken>, RcError> {
        let shared = {
            let mut inflight = self.inflight.lock().await;
            if let Some(shared) = inflight.as_ref() {
                shared.clone()
            } else {
                let fetch_fut = (self.fetch)();
                let shared: RefreshFuture = async move {
                    fetch_fut
                        .await
                        .map(|jwt| Arc::new(AuthToken::from_jwt(jwt)))
                }
                .boxed()
                .shared();
                *inflight = Some(shared.clone());
                shared
            }
        };

        let result = shared.await;

        {
            let mut inflight = self.inflight.lock().await;
            *inflight = None;
        }

        if let Ok(token) = &result {
            let mut current = self.current.lock().await;
            *current = Some(token.clone());
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn make_test_jwt(exp_unix_secs: u64) -> String {
        let header = URL_SAFE_NO_PAD.encode("{}");
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp_unix_secs}}}"));
        format!("{header}.{payload}.sig")
    }

    fn far_future_secs() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600
    }

    #[test]
    fn decodes_exp_claim() {
        let jwt = make_test_jwt(1_700_000_000);
        assert_eq!(decode_unverified_exp(&jwt), Some(1_700_000_000));
    }

    #[test]
    fn malformed_jwt_yields_none() {
        assert_eq!(decode_unverified_exp("not-a-jwt"), None);
        assert_eq!(decode_unverified_exp("a.b"), None);
    }

    #[test]
    fn malformed_token_falls_back_to_default_ttl() {
        let token = AuthToken::from_jwt("garbage".to_owned());
        let min_expected = SystemTime::now() + DEFAULT_TOKEN_TTL - Duration::from_secs(5);
        assert!(token.expires_at > min_expected);
    }

    #[tokio::test]
    async fn caches_token_until_refresh_window() {
        let exp = far_future_secs();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let manager = AuthTokenManager::new(move || {
            let calls = calls_clone.clone();
            let jwt = make_test_jwt(exp);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RcError>(jwt)
            }
        });

        manager.get_token().await.unwrap();
        manager.get_token().await.unwrap();
        manager.get_token().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_collapse_into_one_fetch() {
        let exp = far_future_secs();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let manager = Arc::new(AuthTokenManager::new(move || {
            let calls = calls_clone.clone();
            let jwt = make_test_jwt(exp);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, RcError>(jwt)
            }
        }));

        let (a, b) = tokio::join!(manager.get_token(), manager.get_token());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refresh_always_calls_fetch() {
        let exp = far_future_secs();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let manager = AuthTokenManager::new(move || {
            let calls = calls_clone.clone();
            let jwt = make_test_jwt(exp);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RcError>(jwt)
            }
        });

        manager.get_token().await.unwrap();
        manager.force_refresh().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
