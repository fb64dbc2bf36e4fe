use std::collections::BinaryHeap;
use std::num::NonZeroUsize;

/// Retains the `capacity` smallest elements pushed into it.
///
/// Internally a max heap: the root is the largest retained element, which is both the next
/// element to evict and the bound a candidate has to beat to get in.
#[derive(Debug, Clone)]
pub struct BoundedMinHeap<T: Ord> {
    heap: BinaryHeap<T>,
    capacity: usize,
}

impl<T: Ord> BoundedMinHeap<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity: capacity.get(),
        }
    }

    /// Push `item`, keeping only the smallest `capacity` elements. Returns whichever element
    /// did not make the cut: the evicted worst, the rejected item itself, or `None`.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.heap.len() < self.capacity {
            self.heap.push(item);
            return None;
        }
        match self.heap.peek_mut() {
            Some(mut worst) if item < *worst => Some(std::mem::replace(&mut *worst, item)),
            _ => Some(item),
        }
    }

    /// Largest retained element.
    pub fn worst(&self) -> Option<&T> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Retained elements, smallest first.
    pub fn into_sorted_vec(self) -> Vec<T> {
        self.heap.into_sorted_vec()
    }
}
