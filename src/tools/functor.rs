//! Functor protocol with per-thread initialisation and a final reduction

use crate::core::Result;
use crate::tls::ThreadLocal;
use std::cell::Cell;

/// Work object for [`ToolsApi::parallel_for_functor`](crate::tools::ToolsApi::parallel_for_functor).
///
/// `initialize` runs once on every thread that takes part, before that
/// thread's first `execute`. `reduce` runs once on the caller after the
/// whole range is done, typically combining per-thread state held in a
/// [`ThreadLocal`].
///
/// # Example
///
/// ```
/// use rust_smp_system::prelude::*;
/// use rust_smp_system::tls::ThreadLocal;
/// use std::cell::Cell;
///
/// struct Sum<'a> {
///     data: &'a [u64],
///     partial: ThreadLocal<Cell<u64>>,
///     total: u64,
/// }
///
/// impl SmpFunctor for Sum<'_> {
///     fn initialize(&self) -> Result<()> {
///         self.partial.get_or_default().set(0);
///         Ok(())
///     }
///
///     fn execute(&self, first: usize, last: usize) -> Result<()> {
///         let partial = self.partial.get_or_default();
///         partial.set(partial.get() + self.data[first..last].iter().sum::<u64>());
///         Ok(())
///     }
///
///     fn reduce(&mut self) -> Result<()> {
///         self.total = self.partial.iter_mut().map(|c| c.get()).sum();
///         Ok(())
///     }
/// }
///
/// # fn main() -> Result<()> {
/// let data: Vec<u64> = (1..=100).collect();
/// let mut sum = Sum { data: &data, partial: ThreadLocal::new(), total: 0 };
/// ToolsApi::instance().parallel_for_functor(0, data.len(), 10, &mut sum)?;
/// assert_eq!(sum.total, 5050);
/// # Ok(())
/// # }
/// ```
pub trait SmpFunctor: Sync {
    /// Prepare the calling thread's state
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Process `[first, last)`
    fn execute(&self, first: usize, last: usize) -> Result<()>;

    /// Combine per-thread state once the range is done
    fn reduce(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Wraps a functor so that each thread initialises it exactly once
pub(crate) struct FunctorRunner<'f, F: SmpFunctor> {
    functor: &'f F,
    initialized: ThreadLocal<Cell<bool>>,
}

impl<'f, F: SmpFunctor> FunctorRunner<'f, F> {
    pub(crate) fn new(functor: &'f F, expected_threads: usize) -> Self {
        Self {
            functor,
            initialized: ThreadLocal::with_capacity(expected_threads),
        }
    }

    pub(crate) fn execute(&self, first: usize, last: usize) -> Result<()> {
        let initialized = self.initialized.get_or_default();
        if !initialized.get() {
            self.functor.initialize()?;
            initialized.set(true);
        }
        self.functor.execute(first, last)
    }

    /// Number of threads that initialised the functor
    pub(crate) fn initialized_threads(&self) -> usize {
        self.initialized.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        inits: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SmpFunctor for Counting {
        fn initialize(&self) -> Result<()> {
            self.inits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn execute(&self, _first: usize, _last: usize) -> Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_initialize_once_per_thread() {
        let functor = Counting {
            inits: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        };
        let runner = FunctorRunner::new(&functor, 4);

        std::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    for i in 0..5 {
                        runner.execute(i, i + 1).expect("execute");
                    }
                });
            }
        });

        assert_eq!(functor.inits.load(Ordering::Relaxed), 3);
        assert_eq!(functor.calls.load(Ordering::Relaxed), 15);
        assert_eq!(runner.initialized_threads(), 3);
    }
}
