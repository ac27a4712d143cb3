//! Binary heap priority queue ordered by an injected "is higher priority"
//! predicate.
//!
//! The queue is not synchronised. Producers and the consumer share it through
//! [`SharedQueue`], whose mutex plays the role of the queue's sync root: every
//! mutation must happen while holding it.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, Mutex};

const INITIAL_CAPACITY: usize = 4;
const TRIM_THRESHOLD: f64 = 0.9;

/// Returns true when the first argument must be dequeued before the second.
pub type HigherPriority<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A priority queue guarded by its sync root.
pub type SharedQueue<T> = Arc<Mutex<PriorityQueue<T>>>;

pub struct PriorityQueue<T> {
    heap: Vec<T>,
    higher: HigherPriority<T>,
    version: u64,
}

impl<T> PriorityQueue<T> {
    pub fn new<F>(higher: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self::with_comparator(Arc::new(higher))
    }

    pub fn with_comparator(higher: HigherPriority<T>) -> Self {
        Self {
            heap: Vec::with_capacity(INITIAL_CAPACITY),
            higher,
            version: 0,
        }
    }

    pub fn shared(self) -> SharedQueue<T> {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.heap.capacity()
    }

    /// Incremented by every mutation; used to detect stale cursors.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn enqueue(&mut self, item: T) {
        if self.heap.len() == self.heap.capacity() {
            let grow_by = self.heap.capacity().max(INITIAL_CAPACITY);
            self.heap.reserve_exact(grow_by);
        }
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1);
        self.version += 1;
    }

    pub fn peek(&self) -> Result<&T> {
        self.heap.first().ok_or(Error::EmptyQueue)
    }

    pub fn dequeue(&mut self) -> Result<T> {
        if self.heap.is_empty() {
            return Err(Error::EmptyQueue);
        }
        let item = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        self.version += 1;
        Ok(item)
    }

    /// Drops all items. Storage is released lazily, not wiped.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.version += 1;
    }

    /// All queued items matching `predicate`, in heap (not priority) order.
    pub fn find<P>(&self, mut predicate: P) -> Vec<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.heap.iter().filter(|item| predicate(*item)).collect()
    }

    pub fn contains<P>(&self, mut predicate: P) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        self.heap.iter().any(|item| predicate(item))
    }

    /// Removes every item matching `predicate` and restores the heap.
    pub fn remove<P>(&mut self, mut predicate: P) -> Vec<T>
    where
        P: FnMut(&T) -> bool,
    {
        if !self.heap.iter().any(|item| predicate(item)) {
            return Vec::new();
        }

        let (removed, kept): (Vec<T>, Vec<T>) =
            self.heap.drain(..).partition(|item| predicate(item));
        self.heap.extend(kept);
        self.heapify();
        self.version += 1;
        removed
    }

    /// Shrinks storage when less than 90% of it is in use.
    pub fn trim_excess(&mut self) {
        let threshold = (self.heap.capacity() as f64 * TRIM_THRESHOLD) as usize;
        if self.heap.len() < threshold {
            self.heap.shrink_to_fit();
        }
    }

    fn heapify(&mut self) {
        let len = self.heap.len();
        if len < 2 {
            return;
        }
        for i in (0..len / 2).rev() {
            self.sift_down(i);
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if (self.higher)(&self.heap[index], &self.heap[parent]) {
                self.heap.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut best = index;

            if left < len && (self.higher)(&self.heap[left], &self.heap[best]) {
                best = left;
            }
            if right < len && (self.higher)(&self.heap[right], &self.heap[best]) {
                best = right;
            }
            if best == index {
                break;
            }
            self.heap.swap(index, best);
            index = best;
        }
    }
}

impl<T: Clone> PriorityQueue<T> {
    /// Iterates a snapshot in priority order without touching the live queue.
    pub fn iter(&self) -> Iter<T> {
        Iter {
            snapshot: self.clone(),
        }
    }

    /// Detached cursor over a snapshot. Advancing it against a queue that has
    /// changed since the cursor was taken fails with
    /// [`Error::ConcurrentModification`].
    pub fn cursor(&self) -> Cursor<T> {
        Cursor {
            snapshot: self.clone(),
            version: self.version,
        }
    }
}

impl<T: Clone> Clone for PriorityQueue<T> {
    fn clone(&self) -> Self {
        Self {
            heap: self.heap.clone(),
            higher: Arc::clone(&self.higher),
            version: self.version,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .field("version", &self.version)
            .field("heap", &self.heap)
            .finish()
    }
}

pub struct Iter<T> {
    snapshot: PriorityQueue<T>,
}

impl<T> Iterator for Iter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.snapshot.dequeue().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.snapshot.len(), Some(self.snapshot.len()))
    }
}

impl<'a, T: Clone> IntoIterator for &'a PriorityQueue<T> {
    type Item = T;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Iter<T> {
        self.iter()
    }
}

pub struct Cursor<T> {
    snapshot: PriorityQueue<T>,
    version: u64,
}

impl<T> Cursor<T> {
    pub fn next(&mut self, source: &PriorityQueue<T>) -> Result<Option<T>> {
        if source.version != self.version {
            return Err(Error::ConcurrentModification);
        }
        Ok(self.snapshot.dequeue().ok())
    }
}
