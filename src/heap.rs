/// Fixed-capacity retention structure: keeps the best (smallest, per `Ord`)
/// elements seen so far. Callers that want "most probable first" invert the
/// ordering on their element type.
///
/// `last()` is an O(1) cached bound on the worst retained element. It is
/// updated only when a newly admitted element exceeds it, so it can go stale
/// after extractions; callers treat it as an approximation.
#[derive(Clone, Debug)]
pub struct BoundedHeap<T> {
    items: Vec<T>,
    capacity: usize,
    worst: Option<T>,
}

impl<T: Ord + Clone> BoundedHeap<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            worst: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Peeks the best element.
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Returns the tracked worst bound; may be stale after `extract`.
    pub fn last(&self) -> Option<&T> {
        self.worst.as_ref()
    }

    /// Inserts unless the heap is full and the candidate orders past the
    /// tracked worst bound. An admission that overflows a full heap drops a
    /// maximal element of the enlarged set, so the best `capacity` elements
    /// seen are always the ones retained. A capacity-zero heap rejects
    /// everything.
    pub fn add(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        match &self.worst {
            None => self.worst = Some(item.clone()),
            Some(bound) => {
                if item > *bound {
                    if self.items.len() < self.capacity {
                        self.worst = Some(item.clone());
                    } else {
                        return;
                    }
                }
            }
        }
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
        if self.items.len() > self.capacity {
            self.evict_max();
        }
    }

    /// Removes and returns the best element.
    pub fn extract(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let out = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        out
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.worst = None;
    }

    /// Drops a maximal element. The cached `worst` bound is left as is; it
    /// is refreshed opportunistically by later `add` calls.
    fn evict_max(&mut self) {
        let mut max_ix = 0;
        for ix in 1..self.items.len() {
            if self.items[ix] > self.items[max_ix] {
                max_ix = ix;
            }
        }
        self.items.swap_remove(max_ix);
        if max_ix < self.items.len() {
            self.sift_down(max_ix);
            self.sift_up(max_ix);
        }
    }

    fn sift_up(&mut self, mut ix: usize) {
        while ix > 0 {
            let parent = (ix - 1) / 2;
            if self.items[ix] < self.items[parent] {
                self.items.swap(ix, parent);
                ix = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut ix: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * ix + 1;
            let right = left + 1;
            let mut smallest = ix;
            if left < len && self.items[left] < self.items[smallest] {
                smallest = left;
            }
            if right < len && self.items[right] < self.items[smallest] {
                smallest = right;
            }
            if smallest == ix {
                break;
            }
            self.items.swap(ix, smallest);
            ix = smallest;
        }
    }
}
