use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use super::AuthProvider;
use crate::error::GatewayError;
use crate::util::sha256_hex;

/// The three parts of a `clientId:clientSecret:refreshToken` credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Split a raw credential. The refresh token may itself contain `:`.
///
/// # Errors
///
/// Returns `GatewayError::Auth` unless all three parts are present and
/// non-empty.
pub fn parse_credential(raw: &str) -> Result<Credential, GatewayError> {
    let mut parts = raw.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(secret), Some(refresh))
            if !id.is_empty() && !secret.is_empty() && !refresh.is_empty() =>
        {
            Ok(Credential {
                client_id: id.to_string(),
                client_secret: secret.to_string(),
                refresh_token: refresh.to_string(),
            })
        }
        _ => Err(GatewayError::Auth(
            "Invalid token format. Expected: clientId:clientSecret:refreshToken".to_string(),
        )),
    }
}

/// Performs the network exchange of a credential for an access token.
pub trait TokenRefresher: Send + Sync + 'static {
    fn refresh<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<String, GatewayError>>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    credential: Credential,
    access_token: String,
    refreshed_at: Instant,
}

/// Process-wide token cache keyed by the SHA-256 of the raw credential.
///
/// The lock is never held across a refresh.
pub struct CachingAuthProvider<R> {
    refresher: R,
    entries: RwLock<FxHashMap<String, CachedToken>>,
}

impl<R: TokenRefresher> CachingAuthProvider<R> {
    #[must_use]
    pub fn new(refresher: R) -> Self {
        Self {
            refresher,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    async fn resolve_credential(&self, raw: &str) -> Result<String, GatewayError> {
        let key = sha256_hex(raw);
        let cached = self
            .entries
            .read()
            .get(&key)
            .map(|entry| entry.access_token.clone());
        if let Some(access_token) = cached {
            return Ok(access_token);
        }

        let credential = parse_credential(raw)?;
        let access_token = self
            .refresher
            .refresh(&credential)
            .await
            .map_err(|err| GatewayError::Auth(format!("Failed to refresh access token: {err}")))?;
        self.entries.write().insert(
            key,
            CachedToken {
                credential,
                access_token: access_token.clone(),
                refreshed_at: Instant::now(),
            },
        );
        Ok(access_token)
    }

    /// Refresh every cached entry, evicting the ones whose refresh fails.
    /// Returns the number of entries refreshed.
    pub async fn refresh_all(&self) -> usize {
        let snapshot: Vec<(String, Credential)> = self
            .entries
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.credential.clone()))
            .collect();
        if snapshot.is_empty() {
            return 0;
        }

        let total = snapshot.len();
        let mut refreshed = 0;
        for (key, credential) in snapshot {
            match self.refresher.refresh(&credential).await {
                Ok(access_token) => {
                    if let Some(entry) = self.entries.write().get_mut(&key) {
                        entry.access_token = access_token;
                        entry.refreshed_at = Instant::now();
                    }
                    refreshed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        credential_hash = &key[..8],
                        "token refresh failed, evicting: {err}"
                    );
                    self.entries.write().remove(&key);
                }
            }
        }
        tracing::info!(refreshed, total, "token refresh cycle finished");
        refreshed
    }

    /// Run [`refresh_all`](Self::refresh_all) every `interval` until `cancel`
    /// fires. The first run happens one interval after spawning.
    pub fn spawn_refresh_loop(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.refresh_all().await;
                    }
                }
            }
            tracing::debug!("token refresher stopped");
        })
    }
}

impl<R: TokenRefresher> AuthProvider for CachingAuthProvider<R> {
    fn resolve<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, Result<String, GatewayError>> {
        Box::pin(self.resolve_credential(credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Issues `token-<n>` and fails for any refresh token listed in `failing`.
    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicUsize,
        failing: Mutex<Vec<String>>,
    }

    impl TokenRefresher for Arc<CountingRefresher> {
        fn refresh<'a>(
            &'a self,
            credential: &'a Credential,
        ) -> BoxFuture<'a, Result<String, GatewayError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if self.failing.lock().contains(&credential.refresh_token) {
                    return Err(GatewayError::Auth("revoked".into()));
                }
                Ok(format!("token-{n}"))
            })
        }
    }

    #[test]
    fn test_parse_credential() {
        let credential = parse_credential("id:secret:refresh:with:colons").unwrap();
        assert_eq!(credential.client_id, "id");
        assert_eq!(credential.client_secret, "secret");
        assert_eq!(credential.refresh_token, "refresh:with:colons");
        assert!(parse_credential("id:secret").is_err());
        assert!(parse_credential("id::refresh").is_err());
        assert!(!format!("{credential:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_resolve_caches_by_credential() {
        let refresher = Arc::new(CountingRefresher::default());
        let provider = CachingAuthProvider::new(refresher.clone());
        assert_eq!(provider.resolve("a:b:c").await.unwrap(), "token-1");
        assert_eq!(provider.resolve("a:b:c").await.unwrap(), "token-1");
        assert_eq!(provider.resolve("a:b:d").await.unwrap(), "token-2");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_credential_not_cached() {
        let provider = CachingAuthProvider::new(Arc::new(CountingRefresher::default()));
        let err = provider.resolve("nocolons").await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_all_evicts_failures() {
        let refresher = Arc::new(CountingRefresher::default());
        let provider = CachingAuthProvider::new(refresher.clone());
        provider.resolve("a:b:keep").await.unwrap();
        provider.resolve("a:b:drop").await.unwrap();
        refresher.failing.lock().push("drop".into());

        assert_eq!(provider.refresh_all().await, 1);
        assert_eq!(provider.len(), 1);
        let token = provider.resolve("a:b:keep").await.unwrap();
        assert!(token.starts_with("token-"));
        assert_ne!(token, "token-1");
        assert!(provider.resolve("a:b:drop").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_loop_stops_on_cancel() {
        let provider = Arc::new(CachingAuthProvider::new(Arc::new(CountingRefresher::default())));
        let cancel = CancellationToken::new();
        let handle = provider.spawn_refresh_loop(Duration::from_secs(3600), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
