//! Typed per-thread values

use super::hash_table::HashTable;
use std::fmt;

/// A value per thread, created lazily on first access from that thread.
///
/// Values are reachable from every thread through `&mut self` once the
/// parallel work is done, which is how reductions combine partial results.
///
/// # Example
///
/// ```
/// use rust_smp_system::tls::ThreadLocal;
/// use std::cell::Cell;
///
/// let mut counts: ThreadLocal<Cell<usize>> = ThreadLocal::new();
/// std::thread::scope(|s| {
///     for _ in 0..4 {
///         s.spawn(|| {
///             let count = counts.get_or_default();
///             count.set(count.get() + 1);
///         });
///     }
/// });
/// let total: usize = counts.iter_mut().map(|c| c.get()).sum();
/// assert_eq!(total, 4);
/// ```
pub struct ThreadLocal<T: Send> {
    table: HashTable<T>,
}

impl<T: Send> ThreadLocal<T> {
    /// Create an empty table sized for the machine's hardware threads
    pub fn new() -> Self {
        Self::with_capacity(num_cpus::get())
    }

    /// Create an empty table sized for `threads` threads; it grows as needed
    pub fn with_capacity(threads: usize) -> Self {
        Self {
            table: HashTable::new(threads),
        }
    }

    /// The calling thread's value, if it created one
    pub fn get(&self) -> Option<&T> {
        self.table.get()
    }

    /// The calling thread's value, created with `create` on first access
    pub fn get_or<F>(&self, create: F) -> &T
    where
        F: FnOnce() -> T,
    {
        if let Some(value) = self.table.get() {
            return value;
        }
        // `create` may itself touch this table; `insert` keeps whichever
        // value got there first.
        self.table.insert(create())
    }

    /// Like [`get_or`](Self::get_or), but for fallible initialisers
    pub fn get_or_try<F, E>(&self, create: F) -> Result<&T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.table.get() {
            return Ok(value);
        }
        Ok(self.table.insert(create()?))
    }

    /// Number of threads that created a value
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if no thread created a value
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot count of the underlying table
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Mutable access to every thread's value, in no particular order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.table.values_mut()
    }

    /// Drop every value; threads create a fresh one on next access
    pub fn clear(&mut self) {
        self.table.take_all();
    }
}

impl<T: Send + Default> ThreadLocal<T> {
    /// The calling thread's value, created with `T::default()` on first access
    pub fn get_or_default(&self) -> &T {
        self.get_or(T::default)
    }
}

impl<T: Send> Default for ThreadLocal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> IntoIterator for ThreadLocal<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(mut self) -> Self::IntoIter {
        self.table.take_all().into_iter()
    }
}

impl<T: Send + fmt::Debug> fmt::Debug for ThreadLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLocal")
            .field("len", &self.len())
            .field("local", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_create_once_per_thread() {
        let created = AtomicUsize::new(0);
        let local: ThreadLocal<usize> = ThreadLocal::with_capacity(2);

        let value = local.get_or(|| {
            created.fetch_add(1, Ordering::Relaxed);
            7
        });
        assert_eq!(*value, 7);
        assert_eq!(*local.get_or(|| 8), 7);
        assert_eq!(created.load(Ordering::Relaxed), 1);
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn test_reentrant_create() {
        let local: ThreadLocal<RefCell<Vec<u8>>> = ThreadLocal::new();
        let value = local.get_or(|| {
            // The inner value wins; the outer one is dropped.
            local.get_or(|| RefCell::new(vec![1]));
            RefCell::new(vec![2])
        });
        assert_eq!(*value.borrow(), vec![1]);
    }

    #[test]
    fn test_get_or_try_propagates_error() {
        let local: ThreadLocal<u32> = ThreadLocal::new();
        let failed: Result<&u32, &str> = local.get_or_try(|| Err("no value"));
        assert_eq!(failed, Err("no value"));
        assert!(local.is_empty());
        assert_eq!(local.get_or_try::<_, &str>(|| Ok(3)), Ok(&3));
    }

    #[test]
    fn test_values_from_many_threads() {
        let mut local: ThreadLocal<Cell<usize>> = ThreadLocal::with_capacity(1);
        std::thread::scope(|s| {
            for i in 0..12 {
                let local = &local;
                s.spawn(move || {
                    let cell = local.get_or_default();
                    cell.set(cell.get() + i);
                });
            }
        });

        assert_eq!(local.len(), 12);
        let sum: usize = local.iter_mut().map(|c| c.get()).sum();
        assert_eq!(sum, (0..12).sum::<usize>());

        local.clear();
        assert!(local.is_empty());
        assert!(local.get().is_none());
    }

    #[test]
    fn test_into_iter_collects_values() {
        let local: ThreadLocal<String> = ThreadLocal::new();
        local.get_or(|| "only".to_string());
        let values: Vec<String> = local.into_iter().collect();
        assert_eq!(values, vec!["only".to_string()]);
    }
}
