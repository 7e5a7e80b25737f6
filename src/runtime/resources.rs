//! Shared resources referenced by processors
//!
//! A [`ResourceManager`] is built once per compiled session and released when
//! that session is drained.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{CacheConfig, ResourcesConfig};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Failed to create cache '{0}': {1}")]
    Acquisition(String, String),

    #[error("Cache '{0}' not found")]
    CacheNotFound(String),

    #[error("Cache '{0}' is full")]
    CacheFull(String),

    #[error("Resources have been released")]
    Closed,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Bounded in-memory key/value cache with optional expiry
pub struct MemoryCache {
    name: String,
    entries: DashMap<String, Entry>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl MemoryCache {
    fn new(name: &str, config: &CacheConfig) -> Result<Self, ResourceError> {
        if config.capacity == 0 {
            return Err(ResourceError::Acquisition(
                name.to_string(),
                "capacity must be at least 1".to_string(),
            ));
        }
        if config.ttl_ms == Some(0) {
            return Err(ResourceError::Acquisition(
                name.to_string(),
                "ttl_ms must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            entries: DashMap::new(),
            capacity: config.capacity,
            ttl: config.ttl_ms.map(Duration::from_millis),
        })
    }

    pub fn set(&self, key: &str, value: Vec<u8>) -> Result<(), ResourceError> {
        self.evict_expired();
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            return Err(ResourceError::CacheFull(self.name.clone()));
        }
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let (value, expires_at) = {
            let entry = self.entries.get(key)?;
            (entry.value.clone(), entry.expires_at)
        };
        match expires_at {
            Some(at) if at <= Instant::now() => {
                self.entries.remove(key);
                None
            }
            _ => Some(value),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&self) {
        if self.ttl.is_none() {
            return;
        }
        let now = Instant::now();
        self.entries
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Named resources of one session
pub struct ResourceManager {
    caches: HashMap<String, Arc<MemoryCache>>,
    closed: AtomicBool,
}

impl ResourceManager {
    pub fn new(config: &ResourcesConfig) -> Result<Arc<Self>, ResourceError> {
        let mut caches = HashMap::new();
        for (name, cache_config) in &config.caches {
            let cache = MemoryCache::new(name, cache_config)?;
            caches.insert(name.clone(), Arc::new(cache));
        }
        debug!("Created {} cache resources", caches.len());
        Ok(Arc::new(Self {
            caches,
            closed: AtomicBool::new(false),
        }))
    }

    /// An empty manager with no resources
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            caches: HashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn cache(&self, name: &str) -> Result<Arc<MemoryCache>, ResourceError> {
        if self.is_closed() {
            return Err(ResourceError::Closed);
        }
        self.caches
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::CacheNotFound(name.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the resources released and drop cached entries in the background.
    pub fn close_async(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            for cache in manager.caches.values() {
                cache.clear();
            }
            info!("Released {} cache resources", manager.caches.len());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(name: &str, cache: CacheConfig) -> ResourcesConfig {
        let mut config = ResourcesConfig::default();
        config.caches.insert(name.to_string(), cache);
        config
    }

    #[test]
    fn test_cache_set_get() {
        let manager = ResourceManager::new(&config_with("seen", CacheConfig::default())).unwrap();
        let cache = manager.cache("seen").unwrap();

        cache.set("k", b"v".to_vec()).unwrap();
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_cache_capacity() {
        let config = config_with(
            "small",
            CacheConfig {
                capacity: 1,
                ttl_ms: None,
            },
        );
        let manager = ResourceManager::new(&config).unwrap();
        let cache = manager.cache("small").unwrap();

        cache.set("a", b"1".to_vec()).unwrap();
        // Overwriting an existing key is allowed at capacity
        cache.set("a", b"2".to_vec()).unwrap();
        assert_eq!(
            cache.set("b", b"3".to_vec()),
            Err(ResourceError::CacheFull("small".to_string()))
        );
    }

    #[test]
    fn test_cache_expiry() {
        let config = config_with(
            "short",
            CacheConfig {
                capacity: 10,
                ttl_ms: Some(10),
            },
        );
        let manager = ResourceManager::new(&config).unwrap();
        let cache = manager.cache("short").unwrap();

        cache.set("k", b"v".to_vec()).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_fails() {
        let config = config_with(
            "broken",
            CacheConfig {
                capacity: 0,
                ttl_ms: None,
            },
        );
        let result = ResourceManager::new(&config);
        assert!(matches!(result, Err(ResourceError::Acquisition(name, _)) if name == "broken"));
    }

    #[test]
    fn test_cache_not_found() {
        let manager = ResourceManager::empty();
        assert!(matches!(
            manager.cache("nope"),
            Err(ResourceError::CacheNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_async() {
        let manager = ResourceManager::new(&config_with("seen", CacheConfig::default())).unwrap();
        let cache = manager.cache("seen").unwrap();
        cache.set("k", b"v".to_vec()).unwrap();

        manager.close_async();
        assert!(manager.is_closed());
        assert!(matches!(manager.cache("seen"), Err(ResourceError::Closed)));

        // Closing twice is harmless
        manager.close_async();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.is_empty());
    }
}
