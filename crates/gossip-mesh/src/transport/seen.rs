//! Bounded cache of message ids already handled by a substrate.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::gossip::MessageId;

/// Configuration for the seen-message cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenCacheConfig {
    /// Maximum number of ids remembered; the oldest is evicted first.
    pub capacity: usize,
    /// How long an id is remembered.
    pub ttl: Duration,
}

impl Default for SeenCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(120),
        }
    }
}

impl SeenCacheConfig {
    /// Sets the capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the time-to-live.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Debug)]
pub(crate) struct SeenCache {
    config: SeenCacheConfig,
    seen: HashMap<MessageId, Instant>,
    order: VecDeque<MessageId>,
}

impl SeenCache {
    pub(crate) fn new(config: SeenCacheConfig) -> Self {
        Self {
            config,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Records `id`; returns false if it was already present.
    pub(crate) fn insert(&mut self, id: MessageId) -> bool {
        self.expire(Instant::now());

        if self.seen.contains_key(&id) {
            return false;
        }

        if self.seen.len() >= self.config.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(id, Instant::now());
        self.order.push_back(id);
        true
    }

    pub(crate) fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            let expired = self
                .seen
                .get(front)
                .is_none_or(|added| now.duration_since(*added) >= self.config.ttl);
            if !expired {
                break;
            }
            if let Some(id) = self.order.pop_front() {
                self.seen.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_is_new_second_is_duplicate() {
        let mut cache = SeenCache::new(SeenCacheConfig::default());
        let id = MessageId::new();
        assert!(cache.insert(id));
        assert!(!cache.insert(id));
        assert!(cache.contains(&id));
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut cache = SeenCache::new(SeenCacheConfig::default().with_capacity(2));
        let a = MessageId::new();
        let b = MessageId::new();
        let c = MessageId::new();
        cache.insert(a);
        cache.insert(b);
        cache.insert(c);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = SeenCache::new(SeenCacheConfig::default().with_ttl(Duration::from_millis(5)));
        let id = MessageId::new();
        cache.insert(id);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.insert(id), "expired id should be treated as new");
    }
}
