//! Fixed-size bitsets for marking nodes during a single traversal, and the blocking pool that
//! lends them out so searches never allocate one per call.

use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ArrayBitSet {
    words: Vec<u64>,
}

impl ArrayBitSet {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
        }
    }

    /// Marks `index`. Returns `true` if it was not marked before.
    pub(crate) fn insert(&mut self, index: usize) -> bool {
        let (word, mask) = Self::position(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    pub(crate) fn remove(&mut self, index: usize) {
        let (word, mask) = Self::position(index);
        if let Some(bits) = self.words.get_mut(word) {
            *bits &= !mask;
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, index: usize) -> bool {
        let (word, mask) = Self::position(index);
        self.words.get(word).is_some_and(|bits| bits & mask != 0)
    }

    pub(crate) fn count(&self) -> usize {
        self.words.iter().map(|bits| bits.count_ones() as usize).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Grows or shrinks to `capacity` bits, keeping the bits that still fit.
    pub(crate) fn resize(&mut self, capacity: usize) {
        self.words.resize(capacity.div_ceil(WORD_BITS), 0);
        let spare = self.words.len() * WORD_BITS - capacity;
        if spare > 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= u64::MAX >> spare;
            }
        }
    }

    fn position(index: usize) -> (usize, u64) {
        (index / WORD_BITS, 1u64 << (index % WORD_BITS))
    }
}

/// Bounded pool of visited sets. `take` blocks while every set is lent out.
#[derive(Debug)]
pub(crate) struct VisitedPool {
    available: Mutex<Vec<ArrayBitSet>>,
    returned: Condvar,
    size: usize,
}

impl VisitedPool {
    pub(crate) fn new(size: usize, capacity: usize) -> Self {
        let size = size.max(1);
        Self {
            available: Mutex::new((0..size).map(|_| ArrayBitSet::new(capacity)).collect()),
            returned: Condvar::new(),
            size,
        }
    }

    /// Default pool size: one set per hardware thread.
    pub(crate) fn default_size() -> usize {
        std::thread::available_parallelism()
            .map(|threads| threads.get())
            .unwrap_or(1)
    }

    pub(crate) fn take(&self) -> VisitedGuard<'_> {
        let mut available = self.available.lock();
        loop {
            if let Some(bitset) = available.pop() {
                return VisitedGuard { pool: self, bitset };
            }
            self.returned.wait(&mut available);
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.available.lock().len()
    }

    fn give_back(&self, mut bitset: ArrayBitSet) {
        bitset.clear();
        self.available.lock().push(bitset);
        self.returned.notify_one();
    }
}

/// A lent bitset. Dropping it, including during unwinding, clears it and returns it to the pool.
pub(crate) struct VisitedGuard<'a> {
    pool: &'a VisitedPool,
    bitset: ArrayBitSet,
}

impl Deref for VisitedGuard<'_> {
    type Target = ArrayBitSet;

    fn deref(&self) -> &Self::Target {
        &self.bitset
    }
}

impl DerefMut for VisitedGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bitset
    }
}

impl Drop for VisitedGuard<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.bitset));
    }
}
