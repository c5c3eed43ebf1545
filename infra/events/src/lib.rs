//! # Tab Bus
//!
//! Fire-and-forget messaging between the settings surface and every open tab.
//!
//! ## Overview
//!
//! A [`TabBus`] connects tabs by their normalized [`Origin`]. Senders address tabs
//! through an [`OriginPattern`] (exact origin, `*.domain` wildcard or `*`), and each
//! [`Message`] carries a [`MessageKind`] tag plus a JSON payload. There is no
//! dead-letter handling and no retry: a tab without a live listener simply misses
//! the message, and [`TabBus::broadcast`] reports how many tabs were reached.
//!
//! # Example
//!
//! ```rust
//! use reel_events::{BusError, Message, MessageKind, Origin, OriginPattern, TabBus};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), BusError> {
//!     let bus = TabBus::new();
//!     let mut tab = bus.connect(Origin::parse("https://www.example.com/feed")?)?;
//!
//!     let pattern = OriginPattern::parse("https://*.example.com")?;
//!     let reached = bus.broadcast(&pattern, Message::with_payload(MessageKind::ToggleFeature, &"focus-mode")?);
//!     assert_eq!(reached, 1);
//!
//!     let message = tab.recv().await.expect("tab is connected");
//!     assert_eq!(message.payload::<String>()?, "focus-mode");
//!     Ok(())
//! }
//! ```

mod bus;
mod endpoint;
mod error;
mod message;
mod origin;

pub use bus::{DEFAULT_CAPACITY, TabBus};
pub use endpoint::TabEndpoint;
pub use error::{BusError, BusErrorExt};
pub use message::{Message, MessageKind, TabId};
pub use origin::{Origin, OriginPattern};
