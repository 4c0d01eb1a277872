//! Process-wide facade over the selected backend

use crate::async_ops::{self, AsyncHandle};
use crate::backend::{dispatch_for, BackendKind, ParallelBackend};
use crate::core::Result;
use crate::tls::ThreadLocal;
use crate::tools::config::{max_threads_from_env, ScopeConfig};
use crate::tools::functor::{FunctorRunner, SmpFunctor};
use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Facade holding the runtime configuration and routing parallel work to
/// one [`ParallelBackend`].
///
/// The backend is chosen when the facade is built and never changes.
/// [`instance`](Self::instance) returns the process-wide facade over the
/// compiled backend; [`new`](Self::new) builds an independent one, e.g. over
/// a dedicated pool.
pub struct ToolsApi {
    backend: Box<dyn ParallelBackend>,
    desired_threads: AtomicUsize,
    nested: AtomicBool,
}

impl fmt::Debug for ToolsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolsApi")
            .field("backend", &self.backend)
            .field("desired_threads", &self.desired_number_of_threads())
            .field("nested", &self.nested_parallelism())
            .finish()
    }
}

impl ToolsApi {
    /// Build a facade over `backend` and apply the default thread count
    pub fn new(backend: Box<dyn ParallelBackend>) -> Self {
        let api = Self {
            backend,
            desired_threads: AtomicUsize::new(0),
            nested: AtomicBool::new(true),
        };
        api.refresh_number_of_threads();
        api
    }

    /// Build a facade over the backend selected by cargo features
    pub fn with_compiled_backend() -> Self {
        Self::new(BackendKind::compiled().create())
    }

    /// Process-wide facade, created on first use
    pub fn instance() -> &'static Arc<ToolsApi> {
        static INSTANCE: OnceLock<Arc<ToolsApi>> = OnceLock::new();
        INSTANCE.get_or_init(|| Arc::new(ToolsApi::with_compiled_backend()))
    }

    /// Kind of the active backend
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Name of the active backend
    pub fn backend_name(&self) -> &'static str {
        self.backend_kind().name()
    }

    /// Request a backend by name.
    ///
    /// The backend cannot change at runtime: a request naming the active
    /// backend re-applies the thread count and returns true; any other
    /// name logs a warning and returns false.
    pub fn set_backend(&self, name: &str) -> bool {
        match BackendKind::from_name(name) {
            Some(kind) if kind == self.backend_kind() => {
                self.refresh_number_of_threads();
                true
            }
            _ => {
                log::warn!(
                    "Backend selection is fixed: requested \"{}\" but using \"{}\"",
                    name,
                    self.backend_name()
                );
                false
            }
        }
    }

    /// Set the desired thread count (0 = default or `SMP_MAX_THREADS`)
    /// and apply it to the backend
    pub fn initialize(&self, num_threads: usize) {
        self.desired_threads.store(num_threads, Ordering::Release);
        self.refresh_number_of_threads();
    }

    fn refresh_number_of_threads(&self) {
        let requested = match self.desired_threads.load(Ordering::Acquire) {
            0 => max_threads_from_env().unwrap_or(0),
            n => n,
        };
        self.backend.initialize(requested);
    }

    /// Thread count last passed to [`initialize`](Self::initialize)
    pub fn desired_number_of_threads(&self) -> usize {
        self.desired_threads.load(Ordering::Acquire)
    }

    /// Threads a parallel region will use
    pub fn estimated_number_of_threads(&self) -> usize {
        self.backend.estimated_number_of_threads()
    }

    /// Threads available when no count was requested
    pub fn estimated_default_number_of_threads(&self) -> usize {
        self.backend.estimated_default_number_of_threads()
    }

    /// Allow or forbid nested parallel regions from fanning out
    pub fn set_nested_parallelism(&self, nested: bool) {
        self.nested.store(nested, Ordering::Release);
    }

    /// Whether nested parallel regions may fan out (default: true)
    pub fn nested_parallelism(&self) -> bool {
        self.nested.load(Ordering::Acquire)
    }

    /// Returns true when called from inside a parallel region
    pub fn is_parallel_scope(&self) -> bool {
        self.backend.is_parallel_scope()
    }

    /// Returns true only for the designated first thread of the current
    /// parallel region
    pub fn single_thread(&self) -> bool {
        self.backend.single_thread()
    }

    fn apply(&self, config: &ScopeConfig) {
        if let Some(kind) = config.backend {
            self.set_backend(kind.name());
        }
        self.initialize(config.max_number_of_threads);
        self.set_nested_parallelism(config.nested_parallelism);
    }

    /// Run `f` with `config` applied, restoring the previous settings
    /// afterwards, also when `f` panics.
    ///
    /// The settings are process-wide for the facade; concurrent callers
    /// observe each other's overrides.
    pub fn local_scope<F, R>(&self, config: &ScopeConfig, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved = ScopeConfig::snapshot(self);
        self.apply(config);
        let outcome = catch_unwind(AssertUnwindSafe(f));
        self.apply(&saved);
        match outcome {
            Ok(value) => value,
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Run `work` over `[first, last)` in chunks of at most `grain` indices
    /// (0 = estimated) and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by a chunk; panics inside `work`
    /// are reported as [`ThreadError::WorkerPanic`](crate::core::ThreadError::WorkerPanic).
    ///
    /// # Example
    ///
    /// ```
    /// use rust_smp_system::prelude::*;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// # fn main() -> Result<()> {
    /// let touched = AtomicUsize::new(0);
    /// ToolsApi::instance().parallel_for(0, 1000, 64, |first, last| {
    ///     touched.fetch_add(last - first, Ordering::Relaxed);
    ///     Ok(())
    /// })?;
    /// assert_eq!(touched.into_inner(), 1000);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parallel_for<F>(&self, first: usize, last: usize, grain: usize, work: F) -> Result<()>
    where
        F: Fn(usize, usize) -> Result<()> + Sync,
    {
        dispatch_for(
            self.backend.as_ref(),
            self.nested_parallelism(),
            first,
            last,
            grain,
            &work,
        )
    }

    /// Run an [`SmpFunctor`] over `[first, last)`, then call its `reduce`
    pub fn parallel_for_functor<F>(
        &self,
        first: usize,
        last: usize,
        grain: usize,
        functor: &mut F,
    ) -> Result<()>
    where
        F: SmpFunctor,
    {
        {
            let runner = FunctorRunner::new(&*functor, self.estimated_number_of_threads());
            self.parallel_for(first, last, grain, |from, to| runner.execute(from, to))?;
            log::trace!(
                "Functor initialised on {} thread(s)",
                runner.initialized_threads()
            );
        }
        functor.reduce()
    }

    /// Map every chunk to a partial result seeded with `identity`, then
    /// fold the partials with `combine`.
    ///
    /// `combine` must be associative; the order in which partials are
    /// combined is unspecified.
    pub fn parallel_reduce<R, M, C>(
        &self,
        first: usize,
        last: usize,
        grain: usize,
        identity: R,
        map: M,
        combine: C,
    ) -> Result<R>
    where
        R: Clone + Send + Sync,
        M: Fn(usize, usize, R) -> Result<R> + Sync,
        C: Fn(R, R) -> R + Sync,
    {
        let partials: ThreadLocal<RefCell<Option<R>>> =
            ThreadLocal::with_capacity(self.estimated_number_of_threads());

        self.parallel_for(first, last, grain, |from, to| {
            let partial = map(from, to, identity.clone())?;
            let slot = partials.get_or(|| RefCell::new(None));
            let mut slot = slot.borrow_mut();
            let merged = match slot.take() {
                Some(previous) => combine(previous, partial),
                None => partial,
            };
            *slot = Some(merged);
            Ok(())
        })?;

        Ok(partials
            .into_iter()
            .filter_map(RefCell::into_inner)
            .fold(identity, &combine))
    }

    /// Launch [`parallel_for`](Self::parallel_for) on a background thread
    pub fn async_parallel_for<F>(
        self: &Arc<Self>,
        first: usize,
        last: usize,
        grain: usize,
        work: F,
    ) -> AsyncHandle<()>
    where
        F: Fn(usize, usize) -> Result<()> + Send + Sync + 'static,
    {
        async_ops::launch_parallel_for(Arc::clone(self), first, last, grain, work)
    }

    /// Launch [`parallel_reduce`](Self::parallel_reduce) on a background thread
    pub fn async_parallel_reduce<R, M, C>(
        self: &Arc<Self>,
        first: usize,
        last: usize,
        grain: usize,
        identity: R,
        map: M,
        combine: C,
    ) -> AsyncHandle<R>
    where
        R: Clone + Send + Sync + 'static,
        M: Fn(usize, usize, R) -> Result<R> + Send + Sync + 'static,
        C: Fn(R, R) -> R + Send + Sync + 'static,
    {
        async_ops::launch_parallel_reduce(
            Arc::clone(self),
            first,
            last,
            grain,
            identity,
            map,
            combine,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StdThreadBackend;
    use crate::core::ThreadError;
    use crate::pool::ThreadPool;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::thread::{self, ThreadId};

    fn api_with_pool(threads: usize) -> ToolsApi {
        let pool = ThreadPool::with_threads(threads).expect("Failed to create thread pool");
        ToolsApi::new(Box::new(StdThreadBackend::with_pool(Arc::new(pool))))
    }

    #[test]
    fn test_defaults() {
        let api = api_with_pool(3);
        assert!(api.nested_parallelism());
        assert_eq!(api.backend_kind(), BackendKind::StdThread);
        assert_eq!(api.backend_name(), "std_thread");
        assert_eq!(api.estimated_default_number_of_threads(), 3);
        assert!(!api.is_parallel_scope());
    }

    #[test]
    fn test_initialize_clamps() {
        let api = api_with_pool(4);
        api.initialize(2);
        assert_eq!(api.desired_number_of_threads(), 2);
        assert_eq!(api.estimated_number_of_threads(), 2);
        api.initialize(64);
        assert_eq!(api.estimated_number_of_threads(), 4);
    }

    #[test]
    fn test_set_backend_validation() {
        let api = api_with_pool(2);
        assert!(api.set_backend("STDThread"));
        assert!(api.set_backend("std_thread"));
        assert!(!api.set_backend("TBB"));
        assert!(!api.set_backend("OpenMP"));
        assert!(!api.set_backend("bogus"));
        assert_eq!(api.backend_kind(), BackendKind::StdThread);
    }

    #[test]
    fn test_local_scope_restores_settings() {
        let api = api_with_pool(4);
        api.initialize(3);

        let inside = api.local_scope(&ScopeConfig::with_threads(1), || {
            (api.estimated_number_of_threads(), api.nested_parallelism())
        });
        assert_eq!(inside, (1, false));
        assert_eq!(api.estimated_number_of_threads(), 3);
        assert!(api.nested_parallelism());
    }

    #[test]
    fn test_local_scope_restores_on_panic() {
        let api = api_with_pool(2);
        let result = catch_unwind(AssertUnwindSafe(|| {
            api.local_scope(&ScopeConfig::with_nested(false), || {
                assert!(!api.nested_parallelism());
                panic!("scope body failed");
            })
        }));
        assert!(result.is_err());
        assert!(api.nested_parallelism());
    }

    #[test]
    fn test_grain_clamp_single_call_on_caller() {
        let api = api_with_pool(4);
        let calls = Mutex::new(Vec::<(usize, usize, ThreadId)>::new());
        api.parallel_for(10, 50, 40, |first, last| {
            calls.lock().push((first, last, thread::current().id()));
            Ok(())
        })
        .expect("parallel_for should succeed");
        assert_eq!(calls.into_inner(), vec![(10, 50, thread::current().id())]);
    }

    #[test]
    fn test_oversubscription_guard() {
        let api = api_with_pool(4);
        api.set_nested_parallelism(false);
        let inner_threads = Mutex::new(Vec::new());

        api.parallel_for(0, 8, 1, |_, _| {
            let outer = thread::current().id();
            api.parallel_for(0, 100, 1, |first, last| {
                assert_eq!((first, last), (0, 100));
                inner_threads.lock().push((outer, thread::current().id()));
                Ok(())
            })
        })
        .expect("parallel_for should succeed");

        let inner_threads = inner_threads.into_inner();
        assert_eq!(inner_threads.len(), 8);
        assert!(inner_threads.iter().all(|(outer, inner)| outer == inner));
    }

    #[test]
    fn test_nested_enabled_fans_out() {
        let api = api_with_pool(2);
        let total = AtomicUsize::new(0);
        api.parallel_for(0, 4, 1, |_, _| {
            api.parallel_for(0, 100, 10, |first, last| {
                total.fetch_add(last - first, Ordering::Relaxed);
                Ok(())
            })
        })
        .expect("nested parallel_for should succeed");
        assert_eq!(total.into_inner(), 400);
    }

    #[test]
    fn test_parallel_for_reports_panics() {
        let api = api_with_pool(2);
        let err = api
            .parallel_for(0, 100, 10, |first, _| {
                if first == 30 {
                    panic!("bad chunk");
                }
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_panic());
        assert!(err.to_string().contains("bad chunk"));
    }

    #[test]
    fn test_parallel_reduce_independent_of_grain() {
        let api = api_with_pool(4);
        let data = vec![1u64; 10_000];
        for grain in [1, 100, 500, 10_000] {
            let sum = api
                .parallel_reduce(
                    0,
                    data.len(),
                    grain,
                    0u64,
                    |first, last, seed| Ok(seed + data[first..last].iter().sum::<u64>()),
                    |a, b| a + b,
                )
                .expect("reduce should succeed");
            assert_eq!(sum, 10_000, "grain {}", grain);
        }
    }

    #[test]
    fn test_parallel_reduce_propagates_errors() {
        let api = api_with_pool(2);
        let result = api.parallel_reduce(
            0,
            100,
            10,
            0i64,
            |first, last, _| Err(ThreadError::execution(first, last, "negative")),
            |a, b| a + b,
        );
        assert!(matches!(result, Err(ThreadError::ExecutionError { .. })));
    }

    #[test]
    fn test_functor_initialized_per_thread_and_reduced() {
        struct Collect {
            threads: ThreadLocal<RefCell<HashSet<usize>>>,
            inits: AtomicUsize,
            chunks: AtomicUsize,
            reduced: usize,
        }

        impl SmpFunctor for Collect {
            fn initialize(&self) -> Result<()> {
                self.inits.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }

            fn execute(&self, first: usize, _last: usize) -> Result<()> {
                self.threads
                    .get_or_default()
                    .borrow_mut()
                    .insert(first);
                self.chunks.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }

            fn reduce(&mut self) -> Result<()> {
                self.reduced = self.threads.iter_mut().map(|set| set.get_mut().len()).sum();
                Ok(())
            }
        }

        let api = api_with_pool(3);
        let mut functor = Collect {
            threads: ThreadLocal::new(),
            inits: AtomicUsize::new(0),
            chunks: AtomicUsize::new(0),
            reduced: 0,
        };
        api.parallel_for_functor(0, 90, 3, &mut functor)
            .expect("functor should succeed");

        assert_eq!(functor.chunks.load(Ordering::Relaxed), 30);
        assert_eq!(functor.reduced, 30);
        let inits = functor.inits.load(Ordering::Relaxed);
        assert!((1..=3).contains(&inits));
    }
}
