use std::borrow::Cow;

/// A specialized [`StoreError`] enum of this crate.
#[reel_derive::reel_error]
pub enum StoreError {
    #[error("Storage area unreachable{}: {message}", format_context(.context))]
    Unreachable { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Storage quota exceeded{}: {message}", format_context(.context))]
    QuotaExceeded { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Value serialization failed{}: {source}", format_context(.context))]
    Serialization { source: serde_json::Error, context: Option<Cow<'static, str>> },

    #[error("Invalid key{}: {message}", format_context(.context))]
    InvalidKey { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("No async runtime{}: {message}", format_context(.context))]
    NoRuntime { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Internal store error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}
