//! # Executor
//!
//! Standard Tokio executor profiles for reel binaries and tools.
//!
//! A content script runs on a single event loop, so the default profile is a
//! current-thread executor; the multi-thread profile drives many simulated tabs
//! at once.
//!
//! ## Profiles
//! * **`current_thread`**: one event loop, like a single tab.
//! * **`multi_thread`**: a worker pool sized from `TOKIO_WORKER_THREADS` or the
//!   available parallelism.
//!
//! ## Example
//!
//! ```rust,ignore
//! #[reel_executor::main(multi_thread)]
//! async fn main() -> anyhow::Result<()> {
//!     println!("Simulating a browser window");
//!     Ok(())
//! }
//! ```

pub use anyhow::Result;
pub use reel_derive::main;

use anyhow::anyhow;
use std::{sync::OnceLock, thread::available_parallelism, time::Duration};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

const DEFAULT_WORKER_THREADS: usize = 4;
const MAX_WORKER_THREADS: usize = 256;
/// 2 `MiB`.
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const MIN_STACK_SIZE: usize = 512 * 1024;
const MAX_STACK_SIZE: usize = 16 * 1024 * 1024;
const THREAD_KEEP_ALIVE: Duration = Duration::from_secs(30);
const DEFAULT_THREAD_NAME: &str = "reel-worker";

static WORKER_THREADS: OnceLock<usize> = OnceLock::new();

fn detected_worker_threads() -> usize {
    *WORKER_THREADS.get_or_init(|| {
        std::env::var("TOKIO_WORKER_THREADS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0 && n <= MAX_WORKER_THREADS)
            .unwrap_or_else(|| {
                available_parallelism().map(std::num::NonZero::get).unwrap_or(DEFAULT_WORKER_THREADS)
            })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    CurrentThread,
    MultiThread,
}

/// Executor settings; every `with_*` setter clamps its input to safe bounds.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub flavor: Flavor,
    /// Ignored by [`Flavor::CurrentThread`].
    pub worker_threads: usize,
    pub stack_size: usize,
    pub thread_name: String,
    pub thread_keep_alive: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::current_thread()
    }
}

impl ExecutorConfig {
    /// A single event loop, the way a tab runs its content script.
    #[must_use = "Use this configuration for a single simulated tab"]
    pub fn current_thread() -> Self {
        Self {
            flavor: Flavor::CurrentThread,
            worker_threads: 1,
            stack_size: DEFAULT_STACK_SIZE,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            thread_keep_alive: THREAD_KEEP_ALIVE,
        }
    }

    /// A worker pool for driving many tabs concurrently.
    #[must_use = "Use this configuration for many concurrent simulated tabs"]
    pub fn multi_thread() -> Self {
        Self {
            flavor: Flavor::MultiThread,
            worker_threads: detected_worker_threads(),
            ..Self::current_thread()
        }
    }

    #[must_use = "Customize the number of worker threads"]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.clamp(1, MAX_WORKER_THREADS);
        self
    }

    #[must_use = "Customize the stack size of worker threads"]
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
        self
    }

    #[must_use = "Customize the worker thread name"]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.thread_name = if name.trim().is_empty() { DEFAULT_THREAD_NAME.to_owned() } else { name };
        self
    }
}

/// Builds a Tokio runtime from `config`, with time and I/O drivers enabled.
///
/// # Errors
///
/// Returns an [`anyhow::Error`] when the OS refuses to create the runtime threads.
pub fn build_executor(config: &ExecutorConfig) -> Result<Runtime> {
    debug!(config = ?config, "Building executor");

    let mut builder = match config.flavor {
        Flavor::CurrentThread => Builder::new_current_thread(),
        Flavor::MultiThread => {
            let mut builder = Builder::new_multi_thread();
            builder
                .worker_threads(config.worker_threads.clamp(1, MAX_WORKER_THREADS))
                .thread_keep_alive(config.thread_keep_alive);
            builder
        },
    };
    builder
        .thread_name(&config.thread_name)
        .thread_stack_size(config.stack_size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE))
        .enable_all();

    builder.build().map_err(|e| anyhow!("Failed to initialize executor: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_clamp_to_bounds() {
        let config = ExecutorConfig::multi_thread().with_worker_threads(0);
        assert_eq!(config.worker_threads, 1);
        let config = config.with_worker_threads(10_000);
        assert_eq!(config.worker_threads, MAX_WORKER_THREADS);

        let config = ExecutorConfig::default().with_stack_size(100);
        assert_eq!(config.stack_size, MIN_STACK_SIZE);
        let config = config.with_thread_name("  ");
        assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
    }

    #[test]
    fn both_profiles_run_timers() {
        for config in [ExecutorConfig::current_thread(), ExecutorConfig::multi_thread().with_worker_threads(2)] {
            let executor = build_executor(&config).unwrap();
            let value = executor.block_on(async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                7
            });
            assert_eq!(value, 7);
        }
    }
}
