//! FIFO of ContentIds waiting for the fetch worker.
//!
//! Global order, one id at a time: an unrelated id queued earlier delays a
//! later one. Duplicate ids are never queued twice.

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct FetchQueue {
    queue: VecDeque<String>,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to the back unless it is already pending. Returns whether it was added.
    pub fn enqueue(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.queue.push_back(id.to_string());
        true
    }

    pub fn pop(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.queue.iter().any(|queued| queued == id)
    }

    /// Remove and return everything still pending.
    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = FetchQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");
        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert_eq!(queue.pop().as_deref(), Some("b"));
        assert_eq!(queue.pop().as_deref(), Some("c"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let mut queue = FetchQueue::new();
        assert!(queue.enqueue("a"));
        assert!(!queue.enqueue("a"));
        assert_eq!(queue.len(), 1);
        assert!(queue.contains("a"));

        queue.pop();
        assert!(queue.is_empty());
        assert!(queue.enqueue("a"));
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = FetchQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        assert_eq!(queue.drain(), vec!["a".to_string(), "b".to_string()]);
        assert!(queue.is_empty());
    }
}
