//! Thread-local storage for parallel regions
//!
//! [`ThreadLocal`] gives each thread its own lazily created value and lets
//! the owner visit all of them afterwards. It is backed by a lock-minimal
//! open-addressing table keyed by [`thread_key`].

mod hash_table;
pub mod thread_local;

pub use thread_local::ThreadLocal;

use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_THREAD_KEY: AtomicUsize = AtomicUsize::new(1);

std::thread_local! {
    static THREAD_KEY: usize = NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed);
}

/// Non-zero key identifying the calling OS thread for the life of the process
pub fn thread_key() -> usize {
    THREAD_KEY
        .try_with(|key| *key)
        .unwrap_or_else(|_| NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed))
}

/// 32-bit FNV-1a over the native-endian bytes of `key`
pub(crate) fn fnv1a(key: usize) -> usize {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    key.to_ne_bytes()
        .iter()
        .fold(OFFSET_BASIS, |hash, &byte| {
            (hash ^ u32::from(byte)).wrapping_mul(PRIME)
        }) as usize
}
