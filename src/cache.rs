use rustc_hash::FxHashMap;

/// Fixed-capacity memo from a feature-context key to a score array, with
/// least-recently-used eviction. All slots are allocated up front; the LRU
/// order is a doubly linked list threaded through `prev`/`next` slot indices,
/// so steady-state operation allocates nothing beyond key strings.
///
/// Sibling beam branches frequently re-derive identical local context
/// windows; this cache lets them skip repeated model evaluations.
pub struct ContextCache {
    slots: Vec<Slot>,
    index: FxHashMap<String, usize>,
    head: usize,
    tail: usize,
}

struct Slot {
    key: String,
    value: Vec<f64>,
    prev: usize,
    next: usize,
}

const NONE: usize = usize::MAX;

fn placeholder(ix: usize) -> String {
    // Keys produced by beam search never start with NUL.
    format!("\u{0}free-{ix}")
}

impl ContextCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "context cache capacity must be non-zero");
        let slots = (0..capacity)
            .map(|ix| Slot {
                key: placeholder(ix),
                value: Vec::new(),
                prev: if ix == 0 { NONE } else { ix - 1 },
                next: if ix + 1 == capacity { NONE } else { ix + 1 },
            })
            .collect();
        Self {
            slots,
            index: FxHashMap::default(),
            head: 0,
            tail: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Looks up `key`, promoting its slot to most-recently-used on a hit.
    pub fn get(&mut self, key: &str) -> Option<&[f64]> {
        let ix = *self.index.get(key)?;
        self.promote(ix);
        Some(&self.slots[ix].value)
    }

    /// Stores `value` under `key`, reusing the least-recently-used slot and
    /// dropping whatever key occupied it.
    pub fn put(&mut self, key: String, value: Vec<f64>) {
        if let Some(&ix) = self.index.get(&key) {
            self.slots[ix].value = value;
            self.promote(ix);
            return;
        }
        let ix = self.tail;
        let evicted = std::mem::replace(&mut self.slots[ix].key, key.clone());
        self.index.remove(&evicted);
        self.slots[ix].value = value;
        self.index.insert(key, ix);
        self.promote(ix);
    }

    /// Resets every slot to a fresh placeholder key.
    pub fn clear(&mut self) {
        self.index.clear();
        let capacity = self.slots.len();
        for (ix, slot) in self.slots.iter_mut().enumerate() {
            slot.key = placeholder(ix);
            slot.value.clear();
            slot.prev = if ix == 0 { NONE } else { ix - 1 };
            slot.next = if ix + 1 == capacity { NONE } else { ix + 1 };
        }
        self.head = 0;
        self.tail = capacity - 1;
    }

    fn promote(&mut self, ix: usize) {
        if ix == self.head {
            return;
        }
        self.unlink(ix);
        self.slots[ix].prev = NONE;
        self.slots[ix].next = self.head;
        self.slots[self.head].prev = ix;
        self.head = ix;
    }

    fn unlink(&mut self, ix: usize) {
        let prev = self.slots[ix].prev;
        let next = self.slots[ix].next;
        if prev != NONE {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NONE {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }
}
