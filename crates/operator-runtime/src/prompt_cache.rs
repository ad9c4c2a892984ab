//! TTL cache for assembled system prompts.
//!
//! Keys are `(role, fingerprint)`. The fingerprint covers only the fields
//! that change the prompt text; request-scoped fields never split the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Request context a prompt is built for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptContext {
    pub organization_id: Option<String>,
    /// Prompt mode (`agent` or `direct`).
    pub mode: Option<String>,
    /// Page the user is on.
    pub page: Option<String>,
    pub request_id: Option<String>,
    pub user_query: Option<String>,
}

/// The fields that affect prompt text, serialized in a fixed field order.
#[derive(Serialize)]
struct FingerprintFields<'a> {
    organization_id: Option<&'a str>,
    mode: Option<&'a str>,
    page: Option<&'a str>,
}

impl PromptContext {
    pub fn for_organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            ..Default::default()
        }
    }

    /// Hex blake3 hash of the prompt-affecting fields.
    pub fn fingerprint(&self) -> String {
        let fields = FingerprintFields {
            organization_id: self.organization_id.as_deref(),
            mode: self.mode.as_deref(),
            page: self.page.as_deref(),
        };
        // Serializing a struct of optional strings cannot fail.
        let canonical = serde_json::to_vec(&fields).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(String),
    Miss,
}

impl CacheLookup {
    pub fn into_option(self) -> Option<String> {
        match self {
            CacheLookup::Hit(text) => Some(text),
            CacheLookup::Miss => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    created_at: Instant,
    ttl: Duration,
    organization_id: Option<String>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

pub struct PromptCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PromptCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached text for this role and context, unless absent or expired.
    pub fn get(&self, role: &str, context: &PromptContext) -> CacheLookup {
        let key = (role.to_string(), context.fingerprint());
        let now = Instant::now();
        let found = self
            .entries
            .read()
            .get(&key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.text.clone());

        match found {
            Some(text) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(role, "prompt cache hit");
                CacheLookup::Hit(text)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(role, "prompt cache miss");
                CacheLookup::Miss
            }
        }
    }

    /// Store text with a fresh TTL. Concurrent writers for the same key
    /// overwrite each other.
    pub fn put(&self, role: &str, context: &PromptContext, text: impl Into<String>) {
        let entry = Entry {
            text: text.into(),
            created_at: Instant::now(),
            ttl: self.ttl,
            organization_id: context.organization_id.clone(),
        };
        self.entries
            .write()
            .insert((role.to_string(), context.fingerprint()), entry);
    }

    /// Evict expired entries. Returns how many were removed.
    ///
    /// Expired keys are found under the read lock; the write lock is taken
    /// only when there is something to remove.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired = self.expired_keys(now);
        if expired.is_empty() {
            return 0;
        }
        remove_expired(&mut self.entries.write(), &expired, now)
    }

    /// Like [`sweep`](Self::sweep), but gives up instead of waiting when
    /// readers or writers hold the lock. `None` means the sweep was skipped.
    pub fn try_sweep(&self) -> Option<usize> {
        let now = Instant::now();
        let expired = self.expired_keys(now);
        if expired.is_empty() {
            return Some(0);
        }
        let mut entries = self.entries.try_write()?;
        Some(remove_expired(&mut entries, &expired, now))
    }

    fn expired_keys(&self, now: Instant) -> Vec<(String, String)> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop every entry built for one organization.
    pub fn invalidate_organization(&self, organization_id: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.organization_id.as_deref() != Some(organization_id));
        let removed = before - entries.len();
        if removed > 0 {
            info!(organization_id, removed, "invalidated cached prompts");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Sweep on a fixed interval until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("prompt cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => match cache.try_sweep() {
                        Some(0) => {}
                        Some(evicted) => debug!(evicted, "swept expired prompts"),
                        None => debug!("prompt cache busy, sweep skipped"),
                    },
                }
            }
        })
    }
}

/// Remove the given keys, skipping any rewritten since they were collected.
fn remove_expired(
    entries: &mut HashMap<(String, String), Entry>,
    keys: &[(String, String)],
    now: Instant,
) -> usize {
    let mut removed = 0;
    for key in keys {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(org: &str) -> PromptContext {
        PromptContext::for_organization(org)
    }

    #[test]
    fn test_fingerprint_ignores_request_fields() {
        let a = PromptContext {
            organization_id: Some("k1".into()),
            page: Some("/students".into()),
            request_id: Some("r-1".into()),
            user_query: Some("list all students".into()),
            ..Default::default()
        };
        let b = PromptContext {
            request_id: Some("r-2".into()),
            user_query: Some("导航到学生管理页面".into()),
            ..a.clone()
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_tracks_prompt_fields() {
        let base = ctx("k1");
        let other_org = ctx("k2");
        let other_page = PromptContext {
            page: Some("/classes".into()),
            ..base.clone()
        };
        let other_mode = PromptContext {
            mode: Some("direct".into()),
            ..base.clone()
        };
        assert_ne!(base.fingerprint(), other_org.fingerprint());
        assert_ne!(base.fingerprint(), other_page.fingerprint());
        assert_ne!(base.fingerprint(), other_mode.fingerprint());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_before_ttl_miss_after() {
        let cache = PromptCache::new(Duration::from_secs(60));
        cache.put("admin", &ctx("k1"), "prompt text");

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("admin", &ctx("k1")), CacheLookup::Hit("prompt text".into()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("admin", &ctx("k1")), CacheLookup::Miss);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_roles_do_not_share_entries() {
        let cache = PromptCache::new(Duration::from_secs(60));
        cache.put("admin", &ctx("k1"), "admin prompt");
        assert_eq!(cache.get("parent", &ctx("k1")), CacheLookup::Miss);
    }

    #[test]
    fn test_last_write_wins() {
        let cache = PromptCache::new(Duration::from_secs(60));
        cache.put("admin", &ctx("k1"), "first");
        cache.put("admin", &ctx("k1"), "second");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("admin", &ctx("k1")).into_option().as_deref(), Some("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_expired() {
        let cache = PromptCache::new(Duration::from_secs(10));
        cache.put("admin", &ctx("k1"), "old");
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.put("admin", &ctx("k2"), "new");
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.get("admin", &ctx("k2")), CacheLookup::Hit(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_with_nothing_expired_leaves_readers_alone() {
        let cache = PromptCache::new(Duration::from_secs(10));
        cache.put("admin", &ctx("k1"), "fresh");

        let reader = cache.entries.read();
        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.try_sweep(), Some(0));
        drop(reader);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_cache_skips_sweep() {
        let cache = PromptCache::new(Duration::from_secs(10));
        cache.put("admin", &ctx("k1"), "old");
        tokio::time::advance(Duration::from_secs(11)).await;

        let reader = cache.entries.read();
        assert_eq!(cache.try_sweep(), None);
        drop(reader);

        assert_eq!(cache.try_sweep(), Some(1));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewritten_entry_survives_pending_sweep() {
        let cache = PromptCache::new(Duration::from_secs(10));
        cache.put("admin", &ctx("k1"), "old");
        tokio::time::advance(Duration::from_secs(11)).await;

        let now = Instant::now();
        let expired = cache.expired_keys(now);
        cache.put("admin", &ctx("k1"), "new");
        assert_eq!(remove_expired(&mut cache.entries.write(), &expired, now), 0);
        assert_eq!(cache.get("admin", &ctx("k1")).into_option().as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_cancelled() {
        let cache = Arc::new(PromptCache::new(Duration::from_secs(5)));
        cache.put("admin", &ctx("k1"), "text");
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_invalidate_organization() {
        let cache = PromptCache::new(Duration::from_secs(60));
        cache.put("admin", &ctx("k1"), "a");
        cache.put("teacher", &ctx("k1"), "b");
        cache.put("admin", &ctx("k2"), "c");

        assert_eq!(cache.invalidate_organization("k1"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_organization("k1"), 0);
    }
}
