//! LRU (Least Recently Used) tracking for buffer frames.

use std::collections::HashMap;

use crate::types::PageId;

/// Tracks page access order with O(1) touch, remove, and pop
pub struct LruCache {
    /// Maps page ID to its node position
    positions: HashMap<PageId, usize>,
    /// Doubly-linked list nodes for O(1) removal
    order: Vec<LruNode>,
    /// Head of the list (most recently used)
    head: Option<usize>,
    /// Tail of the list (least recently used)
    tail: Option<usize>,
    /// Free list of node indices
    free_slots: Vec<usize>,
}

#[derive(Clone, Copy)]
struct LruNode {
    page_id: PageId,
    prev: Option<usize>,
    next: Option<usize>,
}

impl LruCache {
    /// Create a new LRU cache sized for `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            positions: HashMap::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free_slots: Vec::new(),
        }
    }

    /// Record access to a page, moving it to the hot end
    pub fn access(&mut self, page_id: PageId) {
        if let Some(&pos) = self.positions.get(&page_id) {
            self.move_to_front(pos);
        } else {
            self.insert(page_id);
        }
    }

    /// Remove a page from the tracking list
    pub fn remove(&mut self, page_id: PageId) {
        if let Some(pos) = self.positions.remove(&page_id) {
            self.unlink(pos);
            self.free_slots.push(pos);
        }
    }

    /// The least recently used page ID, if any
    pub fn lru(&self) -> Option<PageId> {
        self.tail.map(|pos| self.order[pos].page_id)
    }

    /// Pop the least recently used page ID
    pub fn pop_lru(&mut self) -> Option<PageId> {
        let page_id = self.lru()?;
        self.remove(page_id);
        Some(page_id)
    }

    /// Number of tracked pages
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.positions.clear();
        self.order.clear();
        self.free_slots.clear();
        self.head = None;
        self.tail = None;
    }

    fn insert(&mut self, page_id: PageId) {
        let node = LruNode {
            page_id,
            prev: None,
            next: self.head,
        };
        let pos = if let Some(pos) = self.free_slots.pop() {
            self.order[pos] = node;
            pos
        } else {
            self.order.push(node);
            self.order.len() - 1
        };

        if let Some(old_head) = self.head {
            self.order[old_head].prev = Some(pos);
        }
        self.head = Some(pos);
        if self.tail.is_none() {
            self.tail = Some(pos);
        }
        self.positions.insert(page_id, pos);
    }

    fn move_to_front(&mut self, pos: usize) {
        if self.head == Some(pos) {
            return;
        }

        self.unlink(pos);

        self.order[pos].prev = None;
        self.order[pos].next = self.head;
        if let Some(old_head) = self.head {
            self.order[old_head].prev = Some(pos);
        }
        self.head = Some(pos);
        if self.tail.is_none() {
            self.tail = Some(pos);
        }
    }

    fn unlink(&mut self, pos: usize) {
        let node = self.order[pos];

        if let Some(prev) = node.prev {
            self.order[prev].next = node.next;
        } else {
            self.head = node.next;
        }

        if let Some(next) = node.next {
            self.order[next].prev = node.prev;
        } else {
            self.tail = node.prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(index: i32) -> PageId {
        PageId::new(1, index)
    }

    #[test]
    fn test_lru_basic() {
        let mut cache = LruCache::new(3);

        cache.access(pid(1));
        cache.access(pid(2));
        cache.access(pid(3));

        assert_eq!(cache.lru(), Some(pid(1)));

        // touching 1 makes 2 the coldest
        cache.access(pid(1));
        assert_eq!(cache.lru(), Some(pid(2)));

        assert_eq!(cache.pop_lru(), Some(pid(2)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_remove() {
        let mut cache = LruCache::new(3);

        cache.access(pid(1));
        cache.access(pid(2));
        cache.access(pid(3));

        cache.remove(pid(2));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lru(), Some(pid(1)));

        cache.pop_lru();
        assert_eq!(cache.lru(), Some(pid(3)));
    }

    #[test]
    fn test_lru_empty_and_clear() {
        let mut cache = LruCache::new(3);
        assert!(cache.is_empty());
        assert_eq!(cache.pop_lru(), None);

        cache.access(pid(1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.lru(), None);
    }
}
