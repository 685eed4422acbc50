//! Thread wait queues

use std::collections::VecDeque;
use std::fmt;

use crate::thread::ThreadId;

/// Wait queue handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u32);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrder {
    /// Insertion order
    Fifo,
    /// Ascending priority number, insertion order among equals
    Priority,
}

/// Ordered list of threads
///
/// Entries carry the priority they were inserted with so the queue can be
/// kept sorted without looking threads up; [`reposition`](Self::reposition)
/// updates it when a waiting thread's priority changes.
#[derive(Debug, Clone)]
pub struct ThreadQueue {
    order: QueueOrder,
    entries: VecDeque<(ThreadId, u32)>,
}

impl ThreadQueue {
    pub fn new(order: QueueOrder) -> Self {
        Self {
            order,
            entries: VecDeque::new(),
        }
    }

    pub fn order(&self) -> QueueOrder {
        self.order
    }

    pub fn insert(&mut self, id: ThreadId, priority: u32) {
        match self.order {
            QueueOrder::Fifo => self.entries.push_back((id, priority)),
            QueueOrder::Priority => {
                let index = self
                    .entries
                    .iter()
                    .position(|&(_, p)| p > priority)
                    .unwrap_or(self.entries.len());
                self.entries.insert(index, (id, priority));
            }
        }
    }

    pub fn remove(&mut self, id: ThreadId) -> bool {
        match self.entries.iter().position(|&(t, _)| t == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.entries.iter().any(|&(t, _)| t == id)
    }

    /// Move a thread after a priority change
    ///
    /// FIFO queues only record the new priority.
    pub fn reposition(&mut self, id: ThreadId, priority: u32) {
        if self.order == QueueOrder::Fifo {
            if let Some(entry) = self.entries.iter_mut().find(|(t, _)| *t == id) {
                entry.1 = priority;
            }
            return;
        }
        if self.remove(id) {
            self.insert(id, priority);
        }
    }

    pub fn head(&self) -> Option<ThreadId> {
        self.entries.front().map(|&(id, _)| id)
    }

    /// Priority the head was queued with
    pub fn head_priority(&self) -> Option<u32> {
        self.entries.front().map(|&(_, p)| p)
    }

    pub fn pop_front(&mut self) -> Option<ThreadId> {
        self.entries.pop_front().map(|(id, _)| id)
    }

    /// Remove every thread, in queue order
    pub fn drain(&mut self) -> Vec<ThreadId> {
        self.entries.drain(..).map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.entries.iter().map(|&(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(queue: &ThreadQueue) -> Vec<u32> {
        queue.iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_fifo() {
        let mut queue = ThreadQueue::new(QueueOrder::Fifo);
        queue.insert(ThreadId(1), 20);
        queue.insert(ThreadId(2), 5);
        queue.insert(ThreadId(3), 10);
        assert_eq!(ids(&queue), vec![1, 2, 3]);
        assert_eq!(queue.pop_front(), Some(ThreadId(1)));
        assert!(queue.remove(ThreadId(3)));
        assert!(!queue.remove(ThreadId(3)));
        assert_eq!(queue.drain(), vec![ThreadId(2)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut queue = ThreadQueue::new(QueueOrder::Priority);
        queue.insert(ThreadId(1), 16);
        queue.insert(ThreadId(2), 16);
        queue.insert(ThreadId(3), 4);
        queue.insert(ThreadId(4), 16);
        queue.insert(ThreadId(5), 31);
        assert_eq!(ids(&queue), vec![3, 1, 2, 4, 5]);
        assert_eq!(queue.head_priority(), Some(4));
    }

    #[test]
    fn test_reposition() {
        let mut queue = ThreadQueue::new(QueueOrder::Priority);
        for (id, prio) in [(1, 10), (2, 12), (3, 14)] {
            queue.insert(ThreadId(id), prio);
        }
        queue.reposition(ThreadId(3), 1);
        assert_eq!(ids(&queue), vec![3, 1, 2]);
        queue.reposition(ThreadId(3), 12);
        assert_eq!(ids(&queue), vec![1, 2, 3]);
    }
}
