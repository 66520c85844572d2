use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::task::state::TransferId;

/// 队列条目：优先级越大越先出队，同优先级按入队顺序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: TransferId,
    pub priority: i32,
    pub seq: u64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 等待调度的任务队列。
/// 只由管理器 actor 持有，push/pop 都在它的消息处理里串行执行。
#[derive(Debug, Default)]
pub struct TransferQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: TransferId, priority: i32) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry { id, priority, seq });
        seq
    }

    /// 非阻塞；队列为空返回 None
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.heap.peek()
    }

    pub fn remove(&mut self, id: &TransferId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|entry| entry.id != *id);
        self.heap.len() != before
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.heap.iter().any(|entry| entry.id == *id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = TransferQueue::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queue.push(a, 1);
        queue.push(b, 1);
        queue.push(c, 5);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop().map(|e| e.id)).collect();
        assert_eq!(order, vec![c, a, b]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_among_many_equal() {
        let mut queue = TransferQueue::new();
        let ids: Vec<_> = (0..50).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.push(*id, 3);
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop().map(|e| e.id)).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_remove() {
        let mut queue = TransferQueue::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        queue.push(a, 1);
        queue.push(b, 2);
        assert!(queue.contains(&a));
        assert!(queue.remove(&b));
        assert!(!queue.remove(&b));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().map(|e| e.id), Some(a));
    }

    #[test]
    fn test_negative_priorities_last() {
        let mut queue = TransferQueue::new();
        let (low, mid) = (Uuid::new_v4(), Uuid::new_v4());
        queue.push(low, -3);
        queue.push(mid, 0);
        assert_eq!(queue.pop().map(|e| e.id), Some(mid));
        assert_eq!(queue.pop().map(|e| e.id), Some(low));
    }
}
