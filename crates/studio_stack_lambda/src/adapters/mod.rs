//! Provider adapters behind sync traits so handlers stay testable with fakes.

pub mod error;
pub mod portfolio;
pub mod studio;

use std::future::Future;

/// Drives an SDK future to completion from synchronous handler code.
///
/// Must be called from within a multi-threaded tokio runtime, which every
/// Lambda binary in this crate starts through `#[tokio::main]`.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

/// Runs a synchronous handler from an async Lambda entry point. Poll loops
/// sleep on the calling thread, so the worker is handed back to the runtime
/// for the duration.
pub fn run_blocking<T>(handler: impl FnOnce() -> T) -> T {
    tokio::task::block_in_place(handler)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn blocking_handler_leaves_the_runtime_free_for_other_tasks() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let other = tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        let observed = run_blocking(|| {
            let started = Instant::now();
            while !ran.load(Ordering::SeqCst) && started.elapsed() < Duration::from_secs(5) {
                std::thread::sleep(Duration::from_millis(10));
            }
            ran.load(Ordering::SeqCst)
        });

        assert!(observed, "spawned task should run while the handler sleeps");
        other.await.expect("spawned task should finish");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn sdk_calls_can_be_driven_inside_a_blocking_handler() {
        let value = run_blocking(|| block_on(async { 7 }));
        assert_eq!(value, 7);
    }
}
