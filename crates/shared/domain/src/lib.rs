//! # Domain Models
//!
//! Pure types shared by every reel crate, with minimal dependencies (`serde`, `bitflags`).
//! Keep it lean: no I/O, no async, no DOM access. Just data and simple helpers.

pub mod config;
pub mod constants;
pub mod features;
pub mod slots;
pub mod stats;
