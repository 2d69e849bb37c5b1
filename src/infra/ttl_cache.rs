// ==========================================
// 关税归类与税费计算引擎 - TTL 缓存
// ==========================================
// 职责: 带过期时间的键值存储（税率 / 层级 / 翻译 / 参考列表）
// 约束: 过期条目视为未命中并惰性清除，无主动失效
// ==========================================

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

// ==========================================
// Clock - 时钟抽象
// ==========================================
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟（测试用，可前拨）
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

// ==========================================
// TtlCache - 带 TTL 的键值存储
// ==========================================
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            default_ttl,
        }
    }

    /// 使用系统时钟
    pub fn with_system_clock(default_ttl: Duration) -> Self {
        Self::new(default_ttl, Arc::new(SystemClock))
    }

    /// 读取（过期条目视为未命中并移除）
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    /// 按默认 TTL 写入
    pub async fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl).await;
    }

    /// 按指定 TTL 写入
    pub async fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        let mut entries = self.entries.write().await;
        entries.insert(key, CacheEntry { value, expires_at });
    }

    /// 清除全部过期条目，返回清除数量
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(clock: &ManualClock) -> TtlCache<String, u32> {
        TtlCache::new(Duration::minutes(30), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let clock = ManualClock::default();
        let cache = cache(&clock);
        cache.insert("6911100000".to_string(), 1).await;

        clock.advance(Duration::minutes(29));
        assert_eq!(cache.get(&"6911100000".to_string()).await, Some(1));

        clock.advance(Duration::minutes(2));
        assert_eq!(cache.get(&"6911100000".to_string()).await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_custom_ttl_and_purge() {
        let clock = ManualClock::default();
        let cache = cache(&clock);
        cache.insert("exact".to_string(), 1).await;
        cache
            .insert_with_ttl("approx".to_string(), 2, Duration::minutes(5))
            .await;

        clock.advance(Duration::minutes(10));
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&"exact".to_string()).await, Some(1));
    }
}
