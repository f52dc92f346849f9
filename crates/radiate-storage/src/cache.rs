//! 有界 LRU 体数据缓存

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

struct Entry<V> {
    value: Arc<V>,
    last_used: AtomicU64,
}

/// 容量有界的缓存，满时淘汰最久未访问的条目
///
/// 读取只持有读锁，访问时间用原子计数器记录。
pub struct VolumeCache<K, V> {
    capacity: usize,
    entries: RwLock<HashMap<K, Entry<V>>>,
    clock: AtomicU64,
}

impl<K, V> VolumeCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        let entries = self.entries.read().await;
        entries.get(key).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            entry.value.clone()
        })
    }

    /// 插入条目并返回共享引用
    pub async fn insert(&self, key: K, value: Arc<V>) -> Arc<V> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("Evicting cache entry {:?}", oldest);
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        value
    }

    pub async fn invalidate(&self, key: &K) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
