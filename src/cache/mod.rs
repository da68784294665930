//! Bounded least-recently-used cache keyed by line index.
//!
//! Entries live in a slab of nodes linked in recency order (most recent at the
//! head); an id → slot map gives O(1) lookup, promote-to-front and evict-from-back.

use ahash::AHashMap;

#[derive(Debug)]
struct Node<V> {
    id: usize,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct LruCache<V> {
    capacity: usize,
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    index: AHashMap<usize, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            free: Vec::new(),
            index: AHashMap::new(),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether `id` is cached, without touching its recency.
    pub fn contains(&self, id: usize) -> bool {
        self.index.contains_key(&id)
    }

    /// Returns the cached value and marks `id` as most recently used.
    pub fn get(&mut self, id: usize) -> Option<&V> {
        let slot = *self.index.get(&id)?;
        self.move_to_front(slot);
        self.slots[slot].as_ref().map(|node| &node.value)
    }

    /// Inserts `value` as the most recently used entry.
    ///
    /// Evicts the least recently used entry first when the cache is full. A cache
    /// with capacity zero stores nothing.
    pub fn insert(&mut self, id: usize, value: V) {
        if let Some(&slot) = self.index.get(&id) {
            if let Some(node) = self.slots[slot].as_mut() {
                node.value = value;
            }
            self.move_to_front(slot);
            return;
        }

        if self.capacity == 0 {
            return;
        }
        while self.len() >= self.capacity {
            match self.pop_lru() {
                Some((evicted, _)) => log::debug!("evicted line {} for line {}", evicted, id),
                None => break,
            }
        }

        let node = Node {
            id,
            value,
            prev: None,
            next: self.head,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            if let Some(head) = self.slots[old_head].as_mut() {
                head.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
        self.index.insert(id, slot);
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(usize, V)> {
        let slot = self.tail?;
        self.unlink(slot);
        let node = self.slots[slot].take()?;
        self.free.push(slot);
        self.index.remove(&node.id);
        Some((node.id, node.value))
    }

    /// Changes the bound, evicting least recently used entries until `len() <= capacity`.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.len() > self.capacity {
            if self.pop_lru().is_none() {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Cached ids from most to least recently used.
    pub fn ids_by_recency(&self) -> Vec<usize> {
        let mut ids = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.slots[slot].as_ref() {
                Some(node) => {
                    ids.push(node.id);
                    cursor = node.next;
                }
                None => break,
            }
        }
        ids
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.slots[slot].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev) => {
                if let Some(node) = self.slots[prev].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next) => {
                if let Some(node) = self.slots[next].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn move_to_front(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);

        let old_head = self.head;
        if let Some(node) = self.slots[slot].as_mut() {
            node.next = old_head;
        }
        if let Some(head) = old_head.and_then(|h| self.slots[h].as_mut()) {
            head.prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_consistent<V>(cache: &LruCache<V>) {
        let order = cache.ids_by_recency();
        assert_eq!(order.len(), cache.len());
        for id in &order {
            assert!(cache.contains(*id));
        }
        assert!(cache.len() <= cache.capacity());
    }

    #[test]
    fn test_evicts_least_recent() {
        let mut cache = LruCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(3, "c");

        assert_eq!(cache.ids_by_recency(), vec![3, 2]);
        assert!(!cache.contains(1));
        assert_eq!(cache.get(1), None);
        assert_consistent(&cache);
    }

    #[test]
    fn test_get_promotes() {
        let mut cache = LruCache::new(3);
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.insert(3, 30);

        assert_eq!(cache.get(1), Some(&10));
        assert_eq!(cache.ids_by_recency(), vec![1, 3, 2]);

        cache.insert(4, 40);
        assert_eq!(cache.ids_by_recency(), vec![4, 1, 3]);
        assert_consistent(&cache);
    }

    #[test]
    fn test_promote_tail_and_middle() {
        let mut cache = LruCache::new(4);
        for id in 0..4 {
            cache.insert(id, id * 2);
        }
        assert_eq!(cache.ids_by_recency(), vec![3, 2, 1, 0]);

        cache.get(0);
        assert_eq!(cache.ids_by_recency(), vec![0, 3, 2, 1]);
        cache.get(2);
        assert_eq!(cache.ids_by_recency(), vec![2, 0, 3, 1]);
        cache.get(2);
        assert_eq!(cache.ids_by_recency(), vec![2, 0, 3, 1]);

        assert_eq!(cache.pop_lru(), Some((1, 2)));
        assert_eq!(cache.pop_lru(), Some((3, 6)));
        assert_consistent(&cache);
    }

    #[test]
    fn test_reinsert_replaces_value() {
        let mut cache = LruCache::new(2);
        cache.insert(7, 1.0);
        cache.insert(8, 2.0);
        cache.insert(7, 3.0);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.ids_by_recency(), vec![7, 8]);
        assert_eq!(cache.get(7), Some(&3.0));
    }

    #[test]
    fn test_resize_keeps_most_recent() {
        let mut cache = LruCache::new(5);
        for id in 0..5 {
            cache.insert(id, id);
        }
        cache.get(1);

        cache.resize(2);
        assert_eq!(cache.capacity(), 2);
        assert_eq!(cache.ids_by_recency(), vec![1, 4]);
        assert_consistent(&cache);

        cache.resize(4);
        assert_eq!(cache.len(), 2);
        cache.insert(9, 9);
        cache.insert(10, 10);
        cache.insert(11, 11);
        assert_eq!(cache.ids_by_recency(), vec![11, 10, 9, 1]);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = LruCache::new(0);
        cache.insert(1, ());
        assert!(cache.is_empty());

        let mut cache = LruCache::new(3);
        cache.insert(1, ());
        cache.insert(2, ());
        cache.resize(0);
        assert!(cache.is_empty());
        assert_eq!(cache.pop_lru(), None);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut cache = LruCache::new(2);
        for id in 0..100 {
            cache.insert(id, id);
        }
        assert!(cache.slots.len() <= 3);
        assert_eq!(cache.ids_by_recency(), vec![99, 98]);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.ids_by_recency().is_empty());
        cache.insert(5, 5);
        assert_eq!(cache.get(5), Some(&5));
    }
}
