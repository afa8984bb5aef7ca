//! Byte-budgeted LRU over decoded blocks, shared read-only across query
//! workers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wave_index::IndexedBlock;

pub struct BlockCache {
    inner: Mutex<Inner>,
    budget: usize,
}

struct Inner {
    blocks: HashMap<u64, Entry>,
    /// Recency order, most recent last.
    order: Vec<u64>,
    used: usize,
}

struct Entry {
    block: Arc<IndexedBlock>,
    bytes: usize,
}

impl BlockCache {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { blocks: HashMap::new(), order: Vec::new(), used: 0 }),
            budget,
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<IndexedBlock>> {
        let mut inner = self.inner.lock().expect("cache lock");
        let block = inner.blocks.get(&id).map(|e| e.block.clone())?;
        if let Some(at) = inner.order.iter().position(|&x| x == id) {
            inner.order.remove(at);
            inner.order.push(id);
        }
        Some(block)
    }

    pub fn put(&self, id: u64, block: Arc<IndexedBlock>, bytes: usize) {
        if bytes > self.budget {
            return;
        }
        let mut inner = self.inner.lock().expect("cache lock");
        if inner.blocks.contains_key(&id) {
            return;
        }
        while inner.used + bytes > self.budget {
            let Some(evict) = inner.order.first().copied() else { break };
            inner.order.remove(0);
            if let Some(old) = inner.blocks.remove(&evict) {
                inner.used -= old.bytes;
            }
        }
        inner.blocks.insert(id, Entry { block, bytes });
        inner.order.push(id);
        inner.used += bytes;
    }

    pub fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().expect("cache lock");
        if let Some(old) = inner.blocks.remove(&id) {
            inner.used -= old.bytes;
        }
        inner.order.retain(|&x| x != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wave_core::json::{parse_json, FRAGMENT_SIZE};
    use wave_index::build;

    fn block(id: u64) -> Arc<IndexedBlock> {
        let parsed = parse_json(br#"{"a": 1}"#, FRAGMENT_SIZE).unwrap();
        Arc::new(build(&parsed, id).unwrap())
    }

    #[test]
    fn hit_and_miss() {
        let cache = BlockCache::new(1000);
        assert!(cache.get(1).is_none());
        cache.put(1, block(1), 100);
        assert_eq!(cache.get(1).unwrap().id, 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = BlockCache::new(250);
        cache.put(1, block(1), 100);
        cache.put(2, block(2), 100);
        // Touch 1 so 2 becomes the eviction candidate.
        cache.get(1);
        cache.put(3, block(3), 100);
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn oversized_blocks_are_not_cached() {
        let cache = BlockCache::new(10);
        cache.put(1, block(1), 100);
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn remove_frees_budget() {
        let cache = BlockCache::new(100);
        cache.put(1, block(1), 100);
        cache.remove(1);
        cache.put(2, block(2), 100);
        assert!(cache.get(2).is_some());
    }
}
