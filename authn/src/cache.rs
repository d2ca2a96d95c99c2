use crate::metrics_defs::{AUTH_CACHE_HIT, AUTH_CACHE_MISS, TOKEN_MARK_USED_FAILURE};
use crate::resolver::{ResolverError, TokenResolver};
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use shared::counter;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

// Bounds memory to the number of distinct active tokens; entries past their
// TTL are evicted lazily on the next lookup.
const CACHE_CAPACITY: u64 = 100_000;

/// Cached result of resolving a bearer token to a tenant and shard.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizationRecord {
    pub team_id: String,
    pub assigned_shard: Option<String>,
    /// Stable hash of the token; the cache key, and the only token-derived
    /// value that may appear in logs or downstream bookkeeping.
    pub token_hash: String,
}

/// Process-wide token-hash → authorization mapping with a short TTL, so the
/// credential store is only consulted on a miss.
pub struct AuthCache {
    cache: Cache<String, AuthorizationRecord>,
    resolver: Arc<dyn TokenResolver>,
}

impl AuthCache {
    pub fn new(resolver: Arc<dyn TokenResolver>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(ttl)
            .build();

        AuthCache { cache, resolver }
    }

    /// Resolves a bearer token to an authorization record.
    ///
    /// Unknown tokens are never cached, so a newly issued token works
    /// immediately. Concurrent misses for the same token may each call the
    /// resolver; the call is idempotent and the last write wins.
    pub async fn resolve(&self, token: &str) -> Result<Option<AuthorizationRecord>, ResolverError> {
        let key = token_hash(token);

        if let Some(record) = self.cache.get(&key) {
            counter!(AUTH_CACHE_HIT).increment(1);
            return Ok(Some(record));
        }
        counter!(AUTH_CACHE_MISS).increment(1);

        let Some(resolved) = self.resolver.resolve(token).await? else {
            return Ok(None);
        };

        let record = AuthorizationRecord {
            team_id: resolved.team_id,
            assigned_shard: resolved.assigned_shard,
            token_hash: key.clone(),
        };
        self.cache.insert(key, record.clone());

        // Usage marking is best effort and must never hold up the request.
        let resolver = self.resolver.clone();
        let token_id = resolved.token_id;
        tokio::spawn(async move {
            if let Err(err) = resolver.mark_used(&token_id).await {
                counter!(TOKEN_MARK_USED_FAILURE).increment(1);
                tracing::debug!(error = %err, "usage marking failed");
            }
        });

        Ok(Some(record))
    }
}

/// Stable cache key for a token. The raw token itself is never stored.
pub fn token_hash(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Short fixed-length token prefix, safe for diagnostics.
pub fn token_prefix(token: &str) -> &str {
    token.get(..4).unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::StaticTokenResolver;

    fn cache_with(resolver: Arc<StaticTokenResolver>, ttl: Duration) -> AuthCache {
        AuthCache::new(resolver, ttl)
    }

    #[tokio::test]
    async fn test_hit_avoids_second_resolver_call() {
        let resolver = Arc::new(StaticTokenResolver::with_token("abc", "t1", Some("shard-1")));
        let cache = cache_with(resolver.clone(), Duration::from_secs(60));

        let first = cache.resolve("abc").await.unwrap().unwrap();
        let second = cache.resolve("abc").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(first.team_id, "t1");
        assert_eq!(first.assigned_shard.as_deref(), Some("shard-1"));
        assert_eq!(resolver.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_record_triggers_fresh_resolution() {
        let resolver = Arc::new(StaticTokenResolver::with_token("abc", "t1", None));
        let cache = cache_with(resolver.clone(), Duration::from_millis(50));

        cache.resolve("abc").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.resolve("abc").await.unwrap().unwrap();

        assert_eq!(resolver.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_token_not_cached() {
        let resolver = Arc::new(StaticTokenResolver::default());
        let cache = cache_with(resolver.clone(), Duration::from_secs(60));

        assert!(cache.resolve("nope").await.unwrap().is_none());
        assert!(cache.resolve("nope").await.unwrap().is_none());

        // No negative caching: both lookups reach the resolver.
        assert_eq!(resolver.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn test_usage_marking_is_detached() {
        let resolver = Arc::new(StaticTokenResolver::with_token("abc", "t1", None));
        let cache = cache_with(resolver.clone(), Duration::from_secs(60));

        cache.resolve("abc").await.unwrap().unwrap();

        // The detached task runs shortly after; the resolve itself never waits.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(resolver.used_token_ids(), vec!["tok_t1".to_string()]);
    }

    #[test]
    fn test_token_hash_is_stable_and_hex() {
        let hash = token_hash("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, token_hash("abc"));
        assert_ne!(hash, token_hash("abd"));
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_token_prefix_is_bounded() {
        assert_eq!(token_prefix("abcdef"), "abcd");
        assert_eq!(token_prefix("ab"), "ab");
    }
}
