//! Process-local cache of tenant quotas in front of the store of record.
//!
//! Every entry carries its own deadline and is checked on read, so an entry
//! is never served past its TTL even if no sweep has run. The optional
//! sweeper only reclaims memory.
//!
//! Invalidation bumps a generation counter before removing the entry. A
//! load that started under an older generation returns its value to its own
//! caller but does not cache it, so a quota write can never be undone by a
//! fetch that raced it.

use super::metrics::record_cache_lookup;
use crate::models::TenantQuota;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    quota: Arc<TenantQuota>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct QuotaCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    generation: AtomicU64,
}

impl QuotaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached quota if still fresh, otherwise run `load` and cache
    /// its result.
    pub async fn get_with<F, Fut, E>(&self, tenant_id: &str, load: F) -> Result<Arc<TenantQuota>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TenantQuota, E>>,
    {
        let now = Instant::now();
        let cached = self
            .entries
            .get(tenant_id)
            .map(|entry| (entry.quota.clone(), entry.expires_at));

        match cached {
            Some((quota, expires_at)) if expires_at > now => {
                record_cache_lookup("hit");
                tracing::debug!(tenant_id = tenant_id, "Quota cache hit");
                return Ok(quota);
            }
            Some(_) => {
                record_cache_lookup("expired");
                self.entries
                    .remove_if(tenant_id, |_, entry| entry.expires_at <= now);
            }
            None => record_cache_lookup("miss"),
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let quota = Arc::new(load().await?);

        // The entry guard holds the shard lock, so a concurrent invalidate
        // either bumps the generation before this check or removes after it.
        let entry = self.entries.entry(tenant_id.to_string());
        if self.generation.load(Ordering::SeqCst) == generation {
            entry.insert(self.fresh_entry(&quota));
        }

        tracing::debug!(tenant_id = tenant_id, "Quota cache filled from store");
        Ok(quota)
    }

    /// Drop the tenant's entry. The next lookup goes to the store.
    pub fn invalidate(&self, tenant_id: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(tenant_id);
        tracing::debug!(tenant_id = tenant_id, "Quota cache invalidated");
    }

    /// Remove expired entries. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically sweep expired entries. The task holds only a weak
    /// reference and ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    tracing::debug!("Quota cache dropped, sweeper exiting");
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed = removed, "Swept expired quota cache entries");
                }
            }
        })
    }

    fn fresh_entry(&self, quota: &Arc<TenantQuota>) -> CacheEntry {
        CacheEntry {
            quota: quota.clone(),
            expires_at: Instant::now() + self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Period, STARTER_PLAN};
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;

    fn quota(tenant_id: &str, plan: &str) -> TenantQuota {
        TenantQuota {
            tenant_id: tenant_id.to_string(),
            plan: plan.to_string(),
            limits: HashMap::new(),
            rate_limits: HashMap::new(),
            overage_rates: HashMap::new(),
            billing_cycle: Period::Monthly,
            reset_day: 1,
        }
    }

    #[tokio::test]
    async fn test_second_lookup_is_served_from_cache() {
        let cache = QuotaCache::new(Duration::from_secs(300));
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let q = cache
                .get_with("tenant-1", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(quota("tenant-1", STARTER_PLAN))
                })
                .await
                .unwrap();
            assert_eq!(q.plan, STARTER_PLAN);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = QuotaCache::new(Duration::from_secs(60));

        cache
            .get_with("tenant-1", || async { Ok::<_, Infallible>(quota("tenant-1", "old")) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        let q = cache
            .get_with("tenant-1", || async { Ok::<_, Infallible>(quota("tenant-1", "new")) })
            .await
            .unwrap();
        assert_eq!(q.plan, "new");
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache = QuotaCache::new(Duration::from_secs(300));

        cache
            .get_with("tenant-1", || async { Ok::<_, Infallible>(quota("tenant-1", "old")) })
            .await
            .unwrap();
        cache.invalidate("tenant-1");
        assert!(cache.is_empty());

        let q = cache
            .get_with("tenant-1", || async { Ok::<_, Infallible>(quota("tenant-1", "new")) })
            .await
            .unwrap();
        assert_eq!(q.plan, "new");
    }

    #[tokio::test]
    async fn test_load_racing_invalidate_is_not_cached() {
        let cache = QuotaCache::new(Duration::from_secs(300));

        // The load sees the pre-write value while a writer invalidates.
        let stale = cache
            .get_with("tenant-1", || async {
                cache.invalidate("tenant-1");
                Ok::<_, Infallible>(quota("tenant-1", "stale"))
            })
            .await
            .unwrap();
        assert_eq!(stale.plan, "stale");
        assert!(cache.is_empty());

        let fresh = cache
            .get_with("tenant-1", || async { Ok::<_, Infallible>(quota("tenant-1", "fresh")) })
            .await
            .unwrap();
        assert_eq!(fresh.plan, "fresh");
    }

    #[tokio::test]
    async fn test_load_errors_are_not_cached() {
        let cache = QuotaCache::new(Duration::from_secs(300));

        let err = cache
            .get_with("tenant-1", || async { Err::<TenantQuota, _>("store down") })
            .await
            .unwrap_err();
        assert_eq!(err, "store down");
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired_entries() {
        let cache = QuotaCache::new(Duration::from_secs(60));

        cache
            .get_with("old", || async { Ok::<_, Infallible>(quota("old", "p")) })
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        cache
            .get_with("young", || async { Ok::<_, Infallible>(quota("young", "p")) })
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_and_stops_when_cache_dropped() {
        let cache = Arc::new(QuotaCache::new(Duration::from_secs(10)));
        cache
            .get_with("tenant-1", || async { Ok::<_, Infallible>(quota("tenant-1", "p")) })
            .await
            .unwrap();

        let handle = cache.spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
    }
}
