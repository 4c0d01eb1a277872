//! Behaviour that can only be observed from a separate process
//!
//! Each `child_*` test does nothing in a normal run. The parent tests start
//! this test binary again, filtered to one child and with
//! `SMP_CHILD_TEST` naming it, then inspect the exit status and stderr.

use rust_smp_system::prelude::*;
use rust_smp_system::tools::MAX_THREADS_ENV;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const CHILD_ENV: &str = "SMP_CHILD_TEST";

fn is_child(name: &str) -> bool {
    std::env::var(CHILD_ENV).as_deref() == Ok(name)
}

fn run_child(name: &str, envs: &[(&str, &str)]) -> Output {
    let exe = std::env::current_exe().expect("Failed to locate test binary");
    Command::new(exe)
        .args(["--exact", name, "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, name)
        .envs(envs.iter().copied())
        .output()
        .expect("Failed to run child test")
}

fn init_stderr_logger() {
    let _ = env_logger::Builder::new()
        .parse_filters("error")
        .target(env_logger::Target::Stderr)
        .try_init();
}

// ============================================================================
// Unjoined proxies
// ============================================================================

#[test]
fn child_drop_unjoined_proxy() {
    if !is_child("child_drop_unjoined_proxy") {
        return;
    }
    init_stderr_logger();

    let pool = ThreadPool::with_threads(2).expect("Failed to create thread pool");
    let proxy = pool.allocate_threads(2).expect("Failed to allocate proxy");
    proxy.submit(|| Ok(())).expect("Failed to submit job");
    drop(proxy);
}

#[test]
fn test_dropping_unjoined_proxy_aborts() {
    let output = run_child("child_drop_unjoined_proxy", &[]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "child exited normally: {}", stderr);
    assert!(
        stderr.contains("unjoined job(s); aborting"),
        "missing abort log line: {}",
        stderr
    );
}

#[test]
fn child_scope_joins_after_panic() {
    if !is_child("child_scope_joins_after_panic") {
        return;
    }
    init_stderr_logger();

    let pool = ThreadPool::with_threads(2).expect("Failed to create thread pool");
    let finished = AtomicUsize::new(0);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        pool.scope(2, |proxy| {
            for _ in 0..4 {
                proxy
                    .submit(|| {
                        thread::sleep(Duration::from_millis(20));
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .expect("Failed to submit job");
            }
            panic!("scope body failed");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(finished.load(Ordering::SeqCst), 4);
}

#[test]
fn test_scope_joins_proxy_when_body_panics() {
    let output = run_child("child_scope_joins_after_panic", &[]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "child failed: {}", stderr);
    assert!(!stderr.contains("aborting"), "child aborted: {}", stderr);
}

// ============================================================================
// SMP_MAX_THREADS
// ============================================================================

#[test]
fn child_initialize_applies_env_override() {
    if !is_child("child_initialize_applies_env_override") {
        return;
    }

    for kind in BackendKind::ALL {
        let api = ToolsApi::new(kind.create());
        assert_eq!(api.desired_number_of_threads(), 0);
        assert_eq!(api.estimated_number_of_threads(), 1, "backend {}", kind.name());

        let default = api.estimated_default_number_of_threads();
        api.initialize(default);
        assert_eq!(api.estimated_number_of_threads(), default);

        api.initialize(0);
        assert_eq!(api.estimated_number_of_threads(), 1, "backend {}", kind.name());
    }
}

#[test]
fn test_initialize_applies_env_override() {
    let output = run_child("child_initialize_applies_env_override", &[(MAX_THREADS_ENV, "1")]);
    assert!(
        output.status.success(),
        "child failed: {}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}
