// Copyright 2025 Promptgate (https://github.com/promptgate)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Credential Resolution Caching Layer
//!
//! The proxy and portal chains cost three to five vault round-trips per
//! resolution. Callers reuse the same gateway key for every request, so a
//! small TTL cache in front of the resolver absorbs almost all of that.
//!
//! ## Cache Key
//!
//! The raw presented token, prefixed with the chain that resolved it
//! (`proxy:` / `portal:`). Two chains may never share an entry even if a
//! token somehow matched both prefixes.
//!
//! ## Failure Handling
//!
//! Only successful resolutions are cached. A failed chain is re-walked on
//! the next request, so a key that becomes valid (or a limit that resets)
//! is picked up without waiting out a TTL.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;

use promptgate_core::error::CredentialError;

use crate::resolver::ResolvedProviderKey;

/// Configuration for the credential cache.
#[derive(Debug, Clone)]
pub struct CredentialCacheConfig {
    /// Maximum number of cached resolutions
    pub max_entries: u64,
    /// Time-to-live for cache entries
    pub ttl: Duration,
    /// Whether to track hit/miss statistics
    pub track_stats: bool,
}

impl Default for CredentialCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(600),
            track_stats: true,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CredentialCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Cache hit rate (0.0 - 1.0)
    pub hit_rate: f64,
    pub entry_count: u64,
}

/// Shared cache of resolved provider keys.
pub struct CredentialCache {
    cache: Cache<String, ResolvedProviderKey>,
    config: CredentialCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CredentialCache {
    pub fn new(config: CredentialCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();

        Self {
            cache,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create with default configuration.
    pub fn default_cache() -> Self {
        Self::new(CredentialCacheConfig::default())
    }

    /// Return the cached resolution for `key`, or run `init` and cache its
    /// success. Concurrent callers for the same key share a single `init`
    /// run; errors propagate to every waiter and are not cached.
    pub async fn get_or_try_resolve<F>(
        &self,
        key: String,
        init: F,
    ) -> Result<ResolvedProviderKey, CredentialError>
    where
        F: Future<Output = Result<ResolvedProviderKey, CredentialError>>,
    {
        if let Some(resolved) = self.cache.get(&key).await {
            if self.config.track_stats {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(resolved);
        }
        if self.config.track_stats {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.cache
            .try_get_with(key, init)
            .await
            .map_err(|e| (*e).clone())
    }

    /// Drop one entry, e.g. after a key rotation.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn stats(&self) -> CredentialCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CredentialCacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolution(provider_key: &str) -> ResolvedProviderKey {
        ResolvedProviderKey {
            provider_key: provider_key.into(),
            organization_id: "org-1".into(),
            proxy_key_id: None,
        }
    }

    #[tokio::test]
    async fn caches_success_and_counts_hits() {
        let cache = CredentialCache::default_cache();

        let first = cache
            .get_or_try_resolve("proxy:tok".into(), async { Ok(resolution("sk-real")) })
            .await
            .unwrap();
        assert_eq!(first.provider_key, "sk-real");

        // Second call must be served from cache; the init closure would
        // poison the result if it ran.
        let second = cache
            .get_or_try_resolve("proxy:tok".into(), async {
                Err(CredentialError::Backend("init ran twice".into()))
            })
            .await
            .unwrap();
        assert_eq!(second.provider_key, "sk-real");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.hit_rate > 0.49 && stats.hit_rate < 0.51);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = CredentialCache::default_cache();

        let err = cache
            .get_or_try_resolve("portal:tok".into(), async {
                Err(CredentialError::HashLookup("no such key".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "hash-lookup");

        // A later attempt with a now-valid key succeeds.
        let ok = cache
            .get_or_try_resolve("portal:tok".into(), async { Ok(resolution("sk-after")) })
            .await
            .unwrap();
        assert_eq!(ok.provider_key, "sk-after");
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let cache = CredentialCache::default_cache();
        cache
            .get_or_try_resolve("proxy:tok".into(), async { Ok(resolution("sk-old")) })
            .await
            .unwrap();
        cache.invalidate("proxy:tok").await;

        let refreshed = cache
            .get_or_try_resolve("proxy:tok".into(), async { Ok(resolution("sk-new")) })
            .await
            .unwrap();
        assert_eq!(refreshed.provider_key, "sk-new");
    }
}
