#![allow(unreachable_pub)]
#![allow(clippy::needless_pass_by_value)]

//! # Macros
//!
//! Procedural macros shared by the reel infrastructure crates.
//!
//! * [`reel_error`] wires an error enum into the workspace error conventions.
//! * [`main`] bootstraps the content-script executor around an `async fn main`.
//!
//! Examples are `ignore`d here because a proc-macro crate cannot use its own
//! macros in doctests; see the consuming crates for compiled usages.

mod macros;

use proc_macro::TokenStream;
use syn::{DeriveInput, ItemFn, parse_macro_input};

/// Attribute macro to bootstrap the reel executor.
///
/// Turns an `async fn main() -> Result<..>` into a synchronous entry point that
/// builds a tokio runtime from a `reel_executor` profile and blocks on the body.
///
/// # Arguments
///
/// * `current_thread` (default) - Cooperative single-threaded scheduling, the
///   execution model the feature engine is designed for.
/// * `multi_thread` - Work-stealing scheduler for hosts that simulate many tabs.
///
/// # Examples
///
/// ```rust,ignore
/// #[reel_executor::main]
/// async fn main() -> anyhow::Result<()> {
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    macros::executor::expand_main(args.into(), input).into()
}

/// Attribute macro for defining crate-level error enums.
///
/// # Conventions
///
/// * Every variant uses named fields.
/// * A `context: Option<Cow<'static, str>>` field carries optional call-site context;
///   it is mandatory for variants that wrap a `source`.
/// * A field named `source` (or marked `#[source]`) wraps an upstream error.
///
/// # Generated Items
///
/// * `#[derive(Debug, thiserror::Error)]` unless already present.
/// * `<Name>Ext` trait adding `.context(...)` to `Result<T, Name>` and to results of
///   every wrapped source error.
/// * `From<Source>` for each wrapping variant.
/// * `From<&'static str>` and `From<String>` when an `Internal` variant exists.
/// * A private `format_context` helper used inside `#[error(...)]` strings.
///
/// # Example
///
/// ```rust,ignore
/// use std::borrow::Cow;
///
/// #[reel_derive::reel_error]
/// pub enum StoreError {
///     #[error("Serialization failed{}: {source}", format_context(.context))]
///     Serialization { source: serde_json::Error, context: Option<Cow<'static, str>> },
///
///     #[error("Internal store error{}: {message}", format_context(.context))]
///     Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
/// }
///
/// fn decode(raw: &str) -> Result<serde_json::Value, StoreError> {
///     serde_json::from_str(raw).context("Decoding cached entry")
/// }
/// ```
#[proc_macro_attribute]
pub fn reel_error(_args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    macros::error::expand(input).into()
}
