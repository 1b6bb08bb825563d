//! Fixed-capacity rolling frame buffer
//!
//! Always holds the most recent `capacity` frames regardless of scan state,
//! so a flagged clip includes footage from before the flag was raised.

use std::collections::VecDeque;

/// Insertion-ordered ring of the most recent items
///
/// `len() <= capacity()` holds after every operation.
#[derive(Debug)]
pub struct RollingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RollingBuffer<T> {
    /// Create a buffer holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append an item, evicting the oldest when full
    #[inline]
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Oldest-first copy of the current contents
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Frame;

    #[test]
    fn test_partial_fill() {
        let mut buffer = RollingBuffer::new(5);
        buffer.push(1);
        buffer.push(2);
        buffer.push(3);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut buffer = RollingBuffer::new(3);
        for i in 0..10 {
            buffer.push(i);
            assert!(buffer.len() <= buffer.capacity());
        }

        assert_eq!(buffer.snapshot(), vec![7, 8, 9]);
    }

    #[test]
    fn test_snapshot_is_last_min_pushes_capacity() {
        for capacity in 1..6 {
            for pushes in 0..12 {
                let mut buffer = RollingBuffer::new(capacity);
                for i in 0..pushes {
                    buffer.push(i);
                }
                let keep = pushes.min(capacity);
                let expected: Vec<usize> = (pushes - keep..pushes).collect();
                assert_eq!(buffer.snapshot(), expected, "capacity={capacity} pushes={pushes}");
            }
        }
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let mut buffer = RollingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push('a');
        buffer.push('b');
        assert_eq!(buffer.snapshot(), vec!['b']);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_pushes() {
        let mut buffer = RollingBuffer::new(2);
        buffer.push(Frame::blank(1, 100, 2, 2));
        buffer.push(Frame::blank(2, 200, 2, 2));

        let snapshot = buffer.snapshot();
        buffer.push(Frame::blank(3, 300, 2, 2));

        let seqs: Vec<u64> = snapshot.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(buffer.len(), 2);
    }
}
