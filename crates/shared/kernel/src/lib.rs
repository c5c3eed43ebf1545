//! Kernel utilities shared by reel binaries.
//! Keep this crate lightweight; today it owns layered configuration loading.
//!
//! ## Config loading
//! ```rust,no_run
//! use reel_kernel::config::load_reel_config;
//!
//! let config = load_reel_config(Some("reel.toml")).unwrap();
//! assert!(config.runtime.debounce_ms > 0);
//! ```

pub mod config;

pub use reel_domain as domain;
