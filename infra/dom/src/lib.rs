//! An in-process document model for driving and testing DOM-facing code without a browser.
//!
//! # Core Concepts
//!
//! - **[`Document`]**: a cheap-to-clone handle to an arena of elements.
//! - **[`ElementId`]**: generational index; ids of swept nodes stay stale forever, so a
//!   held id can always be checked with [`Document::exists`] / [`Document::is_connected`].
//! - **[`MutationObserver`]**: subtree child-list observation with batched delivery at
//!   [`Document::flush`].
//! - **[`Selector`]**: compound simple selectors for [`Document::query_all`].
//!
//! # Example
//!
//! ```rust
//! use reel_dom::{Document, MutationRecord, Selector};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! # fn main() -> Result<(), reel_dom::DomError> {
//! let doc = Document::new();
//! let feed = doc.append_element(doc.body(), "div")?;
//! doc.set_attribute(feed, "id", "feed")?;
//!
//! let added = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&added);
//! let _observer = doc.observe(feed, Arc::new(move |records: &[MutationRecord], _doc: &Document| {
//!     let count: usize = records.iter().map(|r| r.added.len()).sum();
//!     counter.fetch_add(count, Ordering::SeqCst);
//! }))?;
//!
//! doc.append_element(feed, "video")?;
//! assert_eq!(added.load(Ordering::SeqCst), 0);
//! doc.flush();
//! assert_eq!(added.load(Ordering::SeqCst), 1);
//!
//! let videos = doc.query_all(doc.root(), &Selector::parse("video")?);
//! assert_eq!(videos.len(), 1);
//! # Ok(())
//! # }
//! ```

mod document;
mod error;
mod node;
mod observer;
mod selector;

pub use document::{Document, MAX_FLUSH_ROUNDS};
pub use error::{DomError, DomErrorExt};
pub use node::{ElementId, EventHandler, ListenerId};
pub use observer::{MutationCallback, MutationObserver, MutationRecord};
pub use selector::Selector;
