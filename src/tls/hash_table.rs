//! Open-addressing table mapping thread keys to per-thread values.
//!
//! Reads never lock. Claiming a slot takes that slot's own lock; only
//! growing the table takes a table-wide mutex. A grown table keeps its
//! predecessor reachable through `prev`, and a thread moves its value into
//! the newest table the next time it claims a slot there.

use super::{fnv1a, thread_key};
use parking_lot::Mutex;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

struct Slot<T> {
    /// Zero while unclaimed; written once
    key: AtomicUsize,
    claim: Mutex<()>,
    /// Written only by the thread owning `key`
    value: AtomicPtr<T>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            key: AtomicUsize::new(0),
            claim: Mutex::new(()),
            value: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

struct Array<T> {
    size_lg: u32,
    entries: AtomicUsize,
    slots: Box<[Slot<T>]>,
    /// Owned pointer to the table this one replaced, or null
    prev: *mut Array<T>,
}

impl<T> Array<T> {
    fn new(size_lg: u32) -> Self {
        Self {
            size_lg,
            entries: AtomicUsize::new(0),
            slots: (0..1usize << size_lg).map(|_| Slot::new()).collect(),
            prev: ptr::null_mut(),
        }
    }

    fn size(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.size() - 1
    }

    fn prev(&self) -> Option<&Array<T>> {
        // SAFETY: `prev` is null or an array owned by this one and freed only
        // when the whole table is dropped.
        unsafe { self.prev.as_ref() }
    }

    /// Find the slot claimed by `key` here or in an older array
    fn lookup(&self, key: usize, hash: usize) -> Option<&Slot<T>> {
        let mut index = hash & self.mask();
        for _ in 0..self.size() {
            let slot = &self.slots[index];
            match slot.key.load(Ordering::Acquire) {
                0 => break,
                k if k == key => return Some(slot),
                _ => index = (index + 1) & self.mask(),
            }
        }
        self.prev().and_then(|prev| prev.lookup(key, hash))
    }

    /// Claim (or find) the slot for `key`.
    ///
    /// Returns `None` when claiming a new slot would push the load factor
    /// above one half; the caller must grow the table and retry. A newly
    /// claimed slot takes over the value the thread stored in an older array.
    fn acquire(&self, key: usize, hash: usize) -> Option<&Slot<T>> {
        let mut index = hash & self.mask();
        loop {
            let slot = &self.slots[index];
            let current = slot.key.load(Ordering::Acquire);
            if current == key {
                return Some(slot);
            }
            if current == 0 {
                let _claim = slot.claim.lock();
                let used = self.entries.fetch_add(1, Ordering::AcqRel);
                if used * 2 > self.size() {
                    self.entries.fetch_sub(1, Ordering::AcqRel);
                    return None;
                }
                if slot.key.load(Ordering::Acquire) == 0 {
                    slot.key.store(key, Ordering::Release);
                    if let Some(old) = self.prev().and_then(|prev| prev.lookup(key, hash)) {
                        let value = old.value.swap(ptr::null_mut(), Ordering::AcqRel);
                        slot.value.store(value, Ordering::Release);
                    }
                    return Some(slot);
                }
                // Claimed by another thread while this one waited.
                self.entries.fetch_sub(1, Ordering::AcqRel);
            }
            index = (index + 1) & self.mask();
        }
    }
}

/// Initial table size exponent for an expected number of threads:
/// `floor(log2(n)) + 2`, with `n = 0` treated as 1
pub(crate) fn initial_size_lg(expected_threads: usize) -> u32 {
    match expected_threads {
        0 => 2,
        n => n.ilog2() + 2,
    }
}

/// Per-thread value table keyed by [`thread_key`]
pub(crate) struct HashTable<T> {
    root: AtomicPtr<Array<T>>,
    resize: Mutex<()>,
    len: AtomicUsize,
}

// SAFETY: a value is created and accessed through `&self` only by the
// thread that owns its slot; other threads reach values only through
// `&mut self` or by dropping the table, which needs `T: Send`.
unsafe impl<T: Send> Send for HashTable<T> {}
// SAFETY: see above; shared access never hands one thread's value to another.
unsafe impl<T: Send> Sync for HashTable<T> {}

impl<T> HashTable<T> {
    pub(crate) fn new(expected_threads: usize) -> Self {
        let array = Box::new(Array::new(initial_size_lg(expected_threads)));
        Self {
            root: AtomicPtr::new(Box::into_raw(array)),
            resize: Mutex::new(()),
            len: AtomicUsize::new(0),
        }
    }

    fn root(&self) -> &Array<T> {
        // SAFETY: root is never null and arrays live until the table drops.
        unsafe { &*self.root.load(Ordering::Acquire) }
    }

    /// Number of threads that stored a value
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Slot count of the newest array
    pub(crate) fn capacity(&self) -> usize {
        self.root().size()
    }

    /// The calling thread's value, if it stored one
    pub(crate) fn get(&self) -> Option<&T> {
        let key = thread_key();
        let slot = self.root().lookup(key, fnv1a(key))?;
        // SAFETY: non-null values stay valid while `&self` is held; only the
        // owning thread (this one) can move or replace them.
        unsafe { slot.value.load(Ordering::Acquire).as_ref() }
    }

    /// The calling thread's value, storing `value` first if there is none.
    ///
    /// If a value appeared in the meantime, `value` is dropped and the
    /// existing one is returned.
    pub(crate) fn insert(&self, value: T) -> &T {
        let key = thread_key();
        let hash = fnv1a(key);
        let slot = loop {
            let array = self.root();
            if let Some(slot) = array.acquire(key, hash) {
                break slot;
            }
            self.grow(array);
        };

        let current = slot.value.load(Ordering::Acquire);
        if !current.is_null() {
            // SAFETY: see `get`.
            return unsafe { &*current };
        }
        let boxed = Box::into_raw(Box::new(value));
        slot.value.store(boxed, Ordering::Release);
        self.len.fetch_add(1, Ordering::AcqRel);
        // SAFETY: just stored; freed only by `&mut self` methods or drop.
        unsafe { &*boxed }
    }

    /// Replace `full` with an array twice its size, unless another thread already did
    fn grow(&self, full: &Array<T>) {
        let _guard = self.resize.lock();
        let root = self.root.load(Ordering::Acquire);
        if !ptr::eq(root, full) {
            return;
        }
        let mut array = Box::new(Array::new(full.size_lg + 1));
        array.prev = root;
        log::trace!("Thread-local table grown to {} slots", array.size());
        self.root.store(Box::into_raw(array), Ordering::Release);
    }

    /// Pointers to every stored value, newest array first
    fn values(&self) -> Vec<*mut T> {
        let mut values = Vec::new();
        let mut array = Some(self.root());
        while let Some(current) = array {
            values.extend(
                current
                    .slots
                    .iter()
                    .map(|slot| slot.value.load(Ordering::Acquire))
                    .filter(|value| !value.is_null()),
            );
            array = current.prev();
        }
        values
    }

    /// Mutable access to every stored value
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        // SAFETY: `&mut self` excludes every other access; each value is
        // stored in exactly one slot.
        self.values().into_iter().map(|value| unsafe { &mut *value })
    }

    /// Remove and return every stored value
    pub(crate) fn take_all(&mut self) -> Vec<T> {
        let mut array = Some(self.root());
        let mut values = Vec::new();
        while let Some(current) = array {
            for slot in current.slots.iter() {
                let value = slot.value.swap(ptr::null_mut(), Ordering::AcqRel);
                if !value.is_null() {
                    // SAFETY: produced by Box::into_raw and now unlinked.
                    values.push(*unsafe { Box::from_raw(value) });
                }
            }
            array = current.prev();
        }
        self.len.store(0, Ordering::Release);
        values
    }
}

impl<T> Drop for HashTable<T> {
    fn drop(&mut self) {
        let mut array = *self.root.get_mut();
        while !array.is_null() {
            // SAFETY: every array was produced by Box::into_raw and is owned
            // by exactly one link of the chain.
            let owned = unsafe { Box::from_raw(array) };
            for slot in owned.slots.iter() {
                let value = slot.value.load(Ordering::Acquire);
                if !value.is_null() {
                    // SAFETY: as in `take_all`.
                    drop(unsafe { Box::from_raw(value) });
                }
            }
            array = owned.prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_initial_size() {
        assert_eq!(initial_size_lg(0), 2);
        assert_eq!(initial_size_lg(1), 2);
        assert_eq!(initial_size_lg(4), 4);
        assert_eq!(initial_size_lg(7), 4);
        assert_eq!(initial_size_lg(8), 5);
    }

    #[test]
    fn test_insert_and_get_same_thread() {
        let table = HashTable::new(1);
        assert!(table.get().is_none());

        assert_eq!(*table.insert(5), 5);
        assert_eq!(table.get(), Some(&5));
        // A second insert keeps the first value.
        assert_eq!(*table.insert(9), 5);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_growth_keeps_values_stable() {
        let table = Arc::new(HashTable::<usize>::new(1));
        assert_eq!(table.capacity(), 4);

        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let first = table.insert(i) as *const usize as usize;
                    barrier.wait();
                    // Every thread has inserted by now; the table has grown.
                    let again = table.insert(usize::MAX) as *const usize as usize;
                    let got = table.get().map(|v| v as *const usize as usize);
                    (first, again, got, *table.get().expect("value present"))
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let (first, again, got, value) = handle.join().expect("thread panicked");
            assert_eq!(first, again);
            assert_eq!(got, Some(first));
            assert_eq!(value, i);
        }

        assert_eq!(table.len(), threads);
        assert!(table.capacity() >= threads * 2);
    }

    #[test]
    fn test_take_all_and_values_mut() {
        let mut table = HashTable::new(2);
        table.insert(String::from("main"));
        thread::scope(|s| {
            s.spawn(|| {
                table.insert(String::from("helper"));
            });
        });

        for value in table.values_mut() {
            value.push('!');
        }
        let mut values = table.take_all();
        values.sort();
        assert_eq!(values, vec!["helper!".to_string(), "main!".to_string()]);
        assert_eq!(table.len(), 0);
        assert!(table.get().is_none());
    }
}
